//! Named background threads with an explicit shutdown channel.
//!
//! Each background loop (expiration sweep, frequency aggregation,
//! compaction) owns one [`Worker`]. The loop receives the shutdown end of a
//! zero-capacity channel and `select!`s on it; stopping the worker drops the
//! sending end, which wakes the loop with a disconnect, and then joins the
//! thread.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded};
use tracing::{debug, error};

pub(crate) struct Worker {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns `body` on a thread called `name`.
    pub(crate) fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(Receiver<()>) + Send + 'static,
    {
        let (shutdown, signal) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(signal))?;

        debug!(worker = name, "background worker started");
        Ok(Self {
            name: name.to_string(),
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signals the loop to exit and waits for it. Calling it twice is harmless.
    pub(crate) fn stop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = %self.name, "background worker panicked");
            } else {
                debug!(worker = %self.name, "background worker stopped");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
