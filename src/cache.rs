//! The in-memory tier handle and its configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Receiver, bounded, select, tick};
use tracing::{debug, error, info};

use crate::CacheError;
use crate::shard::{CacheStats, ShardedStore};
use crate::worker::Worker;

/// Full access batches that may wait for the aggregator before new ones
/// are dropped.
const AGGREGATOR_QUEUE_DEPTH: usize = 64;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Cache`].
///
/// The shard count is fixed at 256 and not configurable.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use ringcache::CacheConfig;
///
/// let config = CacheConfig {
///     capacity: 100_000,
///     sweep_interval: Duration::from_secs(1),
///     ..CacheConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of resident keys.
    ///
    /// Default: 10 000. Must be ≥ 1.
    pub capacity: usize,

    /// Reads buffered before their frequency updates are handed to the
    /// aggregator thread.
    ///
    /// Default: 64. Must be ≥ 1.
    pub frequency_batch_size: usize,

    /// Counters per row of the count-min sketch.
    ///
    /// Default: 4096. Must be ≥ 16.
    pub sketch_width: usize,

    /// Width of an expiration bucket and period of the sweep.
    ///
    /// Default: 5 s. Must be ≥ 1 s.
    pub sweep_interval: Duration,

    /// Reject new keys with [`CacheError::CapacityExceeded`] instead of
    /// evicting when the cache is full.
    ///
    /// Default: `false`.
    pub reject_when_full: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            frequency_batch_size: 64,
            sketch_width: 4096,
            sweep_interval: Duration::from_secs(5),
            reject_when_full: false,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), CacheError> {
        if self.capacity < 1 {
            return Err(CacheError::InvalidConfig("capacity must be >= 1".into()));
        }
        if self.frequency_batch_size < 1 {
            return Err(CacheError::InvalidConfig(
                "frequency_batch_size must be >= 1".into(),
            ));
        }
        if self.sketch_width < 16 {
            return Err(CacheError::InvalidConfig(
                "sketch_width must be >= 16".into(),
            ));
        }
        if self.sweep_interval < Duration::from_secs(1) {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be >= 1s".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Cache handle
// ------------------------------------------------------------------------------------------------

/// A bounded, thread-safe in-memory cache with TTLs and frequency-aware
/// eviction.
///
/// Two background threads run for the lifetime of the handle: the
/// expiration sweeper and the frequency aggregator. Both stop on
/// [`Cache::close`] or when the handle is dropped.
///
/// `Cache` is `Send + Sync`; share it across threads with `Arc<Cache<V>>`.
pub struct Cache<V> {
    store: Arc<ShardedStore<V>>,
    workers: Mutex<Vec<Worker>>,
    closed: AtomicBool,
}

impl<V> std::fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    /// Creates an empty cache and starts its background threads.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if any configuration parameter
    /// is out of range, or [`CacheError::Io`] if a thread cannot be spawned.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;

        let (batch_tx, batch_rx) = bounded::<Vec<u64>>(AGGREGATOR_QUEUE_DEPTH);
        let store = Arc::new(ShardedStore::new(&config, batch_tx));

        let sweeper = spawn_sweeper(Arc::clone(&store), config.sweep_interval)?;
        let aggregator = spawn_aggregator(Arc::clone(&store), batch_rx)?;

        info!(
            capacity = config.capacity,
            sweep_secs = config.sweep_interval.as_secs(),
            "cache started"
        );

        Ok(Self {
            store,
            workers: Mutex::new(vec![sweeper, aggregator]),
            closed: AtomicBool::new(false),
        })
    }

    /// Inserts or replaces `key`. With `ttl` of `None` the entry never
    /// expires.
    ///
    /// If the cache is full and `key` is new, the least frequently read
    /// entry is evicted first (oldest first among equals).
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidArgument`] if `key` is empty.
    /// - [`CacheError::CapacityExceeded`] if the cache is full and
    ///   configured to reject.
    pub fn set(&self, key: &[u8], value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check_open()?;
        check_key(key)?;
        Ok(self.store.set(key, value, ttl)?)
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if the key is absent.
    /// - [`CacheError::Expired`] if its TTL has elapsed but it has not been
    ///   swept yet.
    pub fn get(&self, key: &[u8]) -> Result<V, CacheError> {
        self.check_open()?;
        check_key(key)?;
        Ok(self.store.get(key)?)
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<(), CacheError> {
        self.check_open()?;
        check_key(key)?;
        self.store.delete(key)?;
        Ok(())
    }

    /// Zeroes the counters and forgets all read frequencies.
    pub fn reset_stats(&self) -> Result<(), CacheError> {
        self.check_open()?;
        Ok(self.store.reset_stats()?)
    }

    /// Counters since creation or the last [`reset_stats`](Self::reset_stats),
    /// plus the current entry count. Works after `close`.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Number of resident entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// `true` if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the background threads. Buffered read frequencies are applied
    /// before the aggregator exits.
    ///
    /// Subsequent operations return [`CacheError::Closed`]. Calling `close`
    /// more than once is harmless.
    pub fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_workers()?;
        info!("cache closed");
        Ok(())
    }

    fn check_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl<V> Cache<V> {
    fn stop_workers(&self) -> Result<(), CacheError> {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .map_err(|_| CacheError::Internal("Mutex poisoned".into()))?,
        );
        for mut worker in workers {
            worker.stop();
        }
        Ok(())
    }
}

impl<V> Drop for Cache<V> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            let _ = self.stop_workers();
        }
    }
}

fn check_key(key: &[u8]) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidArgument("key must not be empty".into()));
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Background loops
// ------------------------------------------------------------------------------------------------

/// Sweeps due expiration buckets on every tick.
fn spawn_sweeper<V: Clone + Send + Sync + 'static>(
    store: Arc<ShardedStore<V>>,
    interval: Duration,
) -> std::io::Result<Worker> {
    Worker::spawn("ringcache-sweeper", move |shutdown| {
        let ticker = tick(interval);
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {
                    if let Err(e) = store.sweep_expired(SystemTime::now()) {
                        error!("expiration sweep failed: {e}");
                    }
                }
            }
        }
    })
}

/// Applies access batches to the eviction policy as they arrive.
fn spawn_aggregator<V: Clone + Send + Sync + 'static>(
    store: Arc<ShardedStore<V>>,
    batches: Receiver<Vec<u64>>,
) -> std::io::Result<Worker> {
    Worker::spawn("ringcache-aggregator", move |shutdown| {
        loop {
            select! {
                recv(shutdown) -> _ => break,
                recv(batches) -> batch => match batch {
                    Ok(batch) => {
                        if let Err(e) = store.apply_accesses(&batch) {
                            error!("applying access batch failed: {e}");
                        }
                    }
                    Err(_) => break,
                },
            }
        }

        // Nothing buffered is lost on shutdown.
        let mut drained = 0usize;
        while let Ok(batch) = batches.try_recv() {
            drained += batch.len();
            if let Err(e) = store.apply_accesses(&batch) {
                error!("applying access batch failed: {e}");
            }
        }
        if let Err(e) = store.flush_access_buffer() {
            error!("flushing access buffer failed: {e}");
        }
        debug!(drained, "aggregator drained");
    })
}
