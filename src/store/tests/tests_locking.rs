//! Locking and mode tests: exclusive-writer LOCK file, read-only
//! opens, concurrent readers, and the format-version gate.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::store::tests::helpers::*;
    use crate::store::{Pattern, QuadStore, StoreConfig, StoreError};
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn locking__second_writer_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        let err = QuadStore::open(dir.path(), StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));

        store.close().expect("close");
        // After close the lock is released and opening succeeds.
        let store = open(dir.path());
        store.close().expect("close");
    }

    #[test]
    fn locking__read_only_open_skips_the_lock() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(dir.path());
            store.add(&iri("a"), &iri("p"), &lit("x"), None).expect("add");
            store.close().expect("close");
        }

        let ro = QuadStore::open(
            dir.path(),
            StoreConfig {
                read_only: true,
                ..StoreConfig::default()
            },
        )
        .expect("read-only open");
        assert!(ro.is_read_only());
        assert_eq!(current_ids(&ro, Pattern::any()).len(), 1);
        assert!(matches!(
            ro.add(&iri("b"), &iri("p"), &lit("y"), None),
            Err(StoreError::ReadOnly)
        ));

        // A read-only open does not block a writer.
        let rw = open(dir.path());
        rw.close().expect("close");
    }

    #[test]
    fn locking__concurrent_readers_share_a_snapshot_world() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(dir.path()));
        for i in 0..20 {
            store
                .add(&iri(&format!("s{i}")), &iri("p"), &lit(&format!("{i}")), None)
                .expect("add");
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let guard = store.read().expect("read");
                guard.query_current(Pattern::any()).count()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().expect("join"), 20);
        }
        store.close().expect("close");
    }

    #[test]
    fn locking__newer_format_refuses_writes() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(dir.path());
            store.add(&iri("a"), &iri("p"), &lit("x"), None).expect("add");
            store.close().expect("close");
        }

        // Bump the on-disk format version past what this build knows.
        let meta_path = dir.path().join("meta.json");
        let text = std::fs::read_to_string(&meta_path).unwrap();
        let bumped = text.replace("\"format_version\": 1", "\"format_version\": 99");
        assert_ne!(text, bumped, "fixture must actually change the version");
        std::fs::write(&meta_path, bumped).unwrap();

        // Writing is refused outright.
        assert!(matches!(
            QuadStore::open(dir.path(), StoreConfig::default()),
            Err(StoreError::NewerFormat { found: 99, .. })
        ));

        // Read-only access still works.
        let ro = QuadStore::open(
            dir.path(),
            StoreConfig {
                read_only: true,
                ..StoreConfig::default()
            },
        )
        .expect("read-only open of newer format");
        assert_eq!(current_ids(&ro, Pattern::any()).len(), 1);
    }

    #[test]
    fn locking__stale_lock_reports_holder() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("LOCK"), b"otherhost:12345").unwrap();

        match QuadStore::open(dir.path(), StoreConfig::default()) {
            Err(StoreError::Locked { holder, .. }) => {
                assert_eq!(holder, "otherhost:12345");
            }
            Err(other) => panic!("expected Locked, got {other}"),
            Ok(_) => panic!("expected Locked, open succeeded"),
        }
    }
}
