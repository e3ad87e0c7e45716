//! Recovery tests: clean close → reopen, crash (drop without close),
//! checkpoint + WAL-tail replay, and torn-batch atomicity.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::store::Pattern;
    use crate::store::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn recovery__clean_close_then_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(dir.path());
            store.add(&iri("a"), &iri("p"), &lit("x"), None).expect("add");
            store.add(&iri("b"), &iri("p"), &lit("y"), None).expect("add");
            store.retract(&iri("b"), &iri("p"), &lit("y"), None).expect("retract");
            store.close().expect("close");
        }

        let store = open(dir.path());
        let guard = store.read().expect("read");
        let current: Vec<_> = guard.query_current(Pattern::any()).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(guard.resolve(current[0].ids.s).unwrap(), iri("a").as_slice());
        drop(guard);
        store.close().expect("close");
    }

    #[test]
    fn recovery__crash_without_close_replays_wal() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_no_auto_checkpoint(dir.path());
            for i in 0..50 {
                store
                    .add(&iri(&format!("s{i}")), &iri("p"), &lit(&format!("{i}")), None)
                    .expect("add");
            }
            // Drop without close — no checkpoint was ever written, so
            // reopen rebuilds purely from the WAL.
        }

        let store = open(dir.path());
        assert_eq!(current_ids(&store, Pattern::any()).len(), 50);
        store.close().expect("close");
    }

    #[test]
    fn recovery__checkpoint_plus_wal_tail() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_no_auto_checkpoint(dir.path());
            store.add(&iri("early"), &iri("p"), &lit("1"), None).expect("add");
            store.checkpoint().expect("checkpoint");
            store.add(&iri("late"), &iri("p"), &lit("2"), None).expect("add");
            // Crash: the second add lives only in the WAL tail.
        }

        let store = open(dir.path());
        assert_eq!(current_ids(&store, Pattern::any()).len(), 2);
        store.close().expect("close");
    }

    #[test]
    fn recovery__replay_is_idempotent_over_images() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_no_auto_checkpoint(dir.path());
            store.add(&iri("a"), &iri("p"), &lit("x"), None).expect("add");
            store.retract(&iri("a"), &iri("p"), &lit("x"), None).expect("retract");
            store.add(&iri("a"), &iri("p"), &lit("x"), None).expect("re-add");
            store.close().expect("close with checkpoint");
        }

        // Reopen twice; state must be stable.
        for _ in 0..2 {
            let store = open(dir.path());
            assert_eq!(current_ids(&store, Pattern::any()).len(), 1);
            let stats = store.statistics().expect("stats");
            assert_eq!(stats.versions, 3);
            store.close().expect("close");
        }
    }

    #[test]
    fn recovery__torn_batch_is_invisible() {
        let dir = TempDir::new().unwrap();
        let pre_batch_tx;
        {
            let store = open_no_auto_checkpoint(dir.path());
            store.add(&iri("keep"), &iri("p"), &lit("1"), None).expect("add");
            pre_batch_tx = store.wal_statistics().expect("stats").last_tx_id;

            let mut batch = store.begin_batch().expect("begin");
            for i in 0..1_000 {
                batch
                    .add(&iri(&format!("s{i}")), &iri("p"), &lit(&format!("{i}")), None)
                    .expect("buffer");
            }
            batch.commit().expect("commit");
        }

        // Simulate a crash mid-frame: cut the WAL inside the batch's
        // frame so its CRC cannot verify.
        let wal_dir = dir.path().join("wal");
        let wal_file = std::fs::read_dir(&wal_dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.extension().and_then(|s| s.to_str()) == Some("wal"))
            .expect("wal file");
        let len = std::fs::metadata(&wal_file).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&wal_file).unwrap();
        file.set_len(len - 64).expect("truncate mid-frame");
        drop(file);

        let store = open(dir.path());
        let current = current_ids(&store, Pattern::any());
        assert_eq!(current.len(), 1, "no partially-committed batch row is visible");
        assert_eq!(
            store.wal_statistics().expect("stats").last_tx_id,
            pre_batch_tx,
            "last_tx rolls back to the pre-batch transaction"
        );
        store.close().expect("close");
    }
}
