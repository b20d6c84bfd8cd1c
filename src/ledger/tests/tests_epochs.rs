#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::ledger::{DeletionLedger, LEDGER_DIR_NAME};

    #[test]
    fn commit_switches_file_and_clears_pending() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(LEDGER_DIR_NAME);
        let (mut ledger, _) = DeletionLedger::open(tmp.path(), false).unwrap();
        ledger.record(1, b"k").unwrap();

        let next = ledger.prepare_epoch().unwrap();
        // Both files exist until the commit.
        assert!(dir.join("deleted-000001.log").exists());
        assert!(dir.join("deleted-000002.log").exists());

        ledger.commit_epoch(next);
        assert_eq!(ledger.seq(), 2);
        assert!(ledger.pending().is_empty());
        assert!(!dir.join("deleted-000001.log").exists());

        ledger.record(9, b"z").unwrap();
        assert_eq!(fs::read(dir.join("deleted-000002.log")).unwrap(), b"9 z\n");
    }

    #[test]
    fn abort_keeps_current_epoch() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(LEDGER_DIR_NAME);
        let (mut ledger, _) = DeletionLedger::open(tmp.path(), false).unwrap();
        ledger.record(3, b"k").unwrap();

        let next = ledger.prepare_epoch().unwrap();
        ledger.abort_epoch(next);

        assert_eq!(ledger.seq(), 1);
        assert_eq!(ledger.pending().len(), 1);
        assert!(!dir.join("deleted-000002.log").exists());
        assert!(dir.join("deleted-000001.log").exists());
    }

    #[test]
    fn newest_file_wins_and_older_are_removed() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(LEDGER_DIR_NAME);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("deleted-000002.log"), b"10 old\n").unwrap();
        fs::write(dir.join("deleted-000010.log"), b"20 new\n").unwrap();
        fs::write(dir.join("deleted-000009.log"), b"30 older\n").unwrap();

        let (ledger, entries) = DeletionLedger::open(tmp.path(), false).unwrap();

        // Numeric order, not directory order: 10 beats 9 and 2.
        assert_eq!(ledger.seq(), 10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"new".to_vec());
        assert!(!dir.join("deleted-000002.log").exists());
        assert!(!dir.join("deleted-000009.log").exists());
    }

    #[test]
    fn rotate_starts_empty_epoch() {
        let tmp = TempDir::new().unwrap();
        {
            let (mut ledger, _) = DeletionLedger::open(tmp.path(), false).unwrap();
            ledger.record(5, b"gone").unwrap();
            ledger.rotate().unwrap();
            assert_eq!(ledger.seq(), 2);
        }

        let (ledger, entries) = DeletionLedger::open(tmp.path(), false).unwrap();
        assert_eq!(ledger.seq(), 2);
        assert!(entries.is_empty());
    }
}
