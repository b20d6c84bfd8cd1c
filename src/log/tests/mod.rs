
use std::path::Path;

use crate::disk::LogConfig;
use crate::log::PersistentLog;

pub(crate) fn test_config() -> LogConfig {
    LogConfig {
        ring_capacity: 8,
        bloom_expected_items: 10_000,
        compaction: None,
        ..LogConfig::default()
    }
}

pub(crate) fn open_log(dir: &Path) -> PersistentLog {
    PersistentLog::open(dir, &test_config()).unwrap()
}
