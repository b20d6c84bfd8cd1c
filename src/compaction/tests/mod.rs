
use std::path::Path;

use crate::disk::LogConfig;
use crate::log::PersistentLog;

pub(crate) fn open_log(dir: &Path) -> PersistentLog {
    let config = LogConfig {
        ring_capacity: 16,
        bloom_expected_items: 10_000,
        compaction: None,
        ..LogConfig::default()
    };
    PersistentLog::open(dir, &config).unwrap()
}
