//! Batch tests: atomic commit, byte-identical rollback, and write-lock
//! exclusivity for the batch's lifetime.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::store::Pattern;
    use crate::store::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn batch__commit_applies_all_ops_in_one_transaction() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        let mut batch = store.begin_batch().expect("begin");
        for i in 0..100 {
            batch
                .add(&iri(&format!("s{i}")), &iri("p"), &lit(&format!("v{i}")), None)
                .expect("buffer add");
        }
        assert_eq!(batch.len(), 100);
        let tx = batch.commit().expect("commit");

        assert_eq!(current_ids(&store, Pattern::any()).len(), 100);
        let wal = store.wal_statistics().expect("stats");
        assert_eq!(wal.last_tx_id, tx, "one transaction for the whole batch");
        store.close().expect("close");
    }

    #[test]
    fn batch__rollback_leaves_store_byte_identical() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_no_auto_checkpoint(dir.path());
            store.add(&iri("base"), &iri("p"), &lit("x"), None).expect("add");
            store.close().expect("close");
        }
        let before = dir_fingerprint(dir.path());

        {
            let store = open_no_auto_checkpoint(dir.path());
            let mut batch = store.begin_batch().expect("begin");
            batch.add(&iri("new"), &iri("p"), &lit("y"), None).expect("buffer");
            batch
                .retract(&iri("base"), &iri("p"), &lit("x"), None)
                .expect("buffer");
            batch.rollback();

            assert_eq!(current_ids(&store, Pattern::any()).len(), 1);
            // Skip close(): it would checkpoint and legitimately change
            // bytes. Dropping only removes the LOCK file.
        }

        let after = dir_fingerprint(dir.path());
        assert_eq!(before, after, "rollback must leave no trace on disk");
    }

    #[test]
    fn batch__drop_without_commit_is_rollback() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());
        {
            let mut batch = store.begin_batch().expect("begin");
            batch.add(&iri("a"), &iri("p"), &lit("x"), None).expect("buffer");
            // Dropped here.
        }
        assert!(current_ids(&store, Pattern::any()).is_empty());
        store.close().expect("close");
    }

    #[test]
    fn batch__mixed_adds_and_retracts_apply_in_order() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());
        store.add(&iri("a"), &iri("p"), &lit("old"), None).expect("add");

        let mut batch = store.begin_batch().expect("begin");
        batch.retract(&iri("a"), &iri("p"), &lit("old"), None).expect("buffer");
        batch.add(&iri("a"), &iri("p"), &lit("new"), None).expect("buffer");
        batch.commit().expect("commit");

        let guard = store.read().expect("read");
        let current: Vec<_> = guard.query_current(Pattern::any()).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(guard.resolve(current[0].ids.o).unwrap(), lit("new").as_slice());
        drop(guard);
        store.close().expect("close");
    }

    #[test]
    fn batch__empty_commit_is_allowed() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());
        let batch = store.begin_batch().expect("begin");
        assert!(batch.is_empty());
        batch.commit().expect("empty commit");
        store.close().expect("close");
    }

    #[test]
    fn batch__readers_resume_after_commit() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        let mut batch = store.begin_batch().expect("begin");
        batch.add(&iri("a"), &iri("p"), &lit("x"), None).expect("buffer");
        batch.commit().expect("commit");

        // The write lock is released; reads proceed.
        let guard = store.read().expect("read");
        assert_eq!(guard.query_current(Pattern::any()).count(), 1);
        drop(guard);
        store.close().expect("close");
    }
}
