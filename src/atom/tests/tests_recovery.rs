//! Recovery tests: reopening segment files, id stability across reopen,
//! and torn-tail truncation.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::atom::{AtomError, AtomStore};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn atom__ids_stable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let (a, b);
        {
            let mut store = AtomStore::open(dir.path()).expect("open");
            a = store.intern(b"<http://e/a>").unwrap();
            b = store.intern(b"\"lit\"").unwrap();
            store.sync().unwrap();
        }

        let mut store = AtomStore::open(dir.path()).expect("reopen");
        assert_eq!(store.resolve(a).unwrap(), b"<http://e/a>");
        assert_eq!(store.resolve(b).unwrap(), b"\"lit\"");
        // Interning again after reopen must find the same ids.
        assert_eq!(store.intern(b"<http://e/a>").unwrap(), a);
        assert_eq!(store.intern(b"\"lit\"").unwrap(), b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn atom__torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let mut store = AtomStore::open(dir.path()).expect("open");
            id = store.intern(b"<http://e/a>").unwrap();
            store.sync().unwrap();
        }

        // Append half an entry to the youngest segment — a torn write.
        let seg = dir.path().join("seg-000001.atm");
        let mut file = OpenOptions::new().append(true).open(&seg).unwrap();
        file.write_all(&[0x10, 0x00, 0x00, 0x00, b'<', b'h']).unwrap();
        drop(file);

        let mut store = AtomStore::open(dir.path()).expect("reopen with torn tail");
        assert_eq!(store.len(), 1);
        assert_eq!(store.resolve(id).unwrap(), b"<http://e/a>");

        // The store keeps accepting interns after truncation.
        let fresh = store.intern(b"<http://e/b>").unwrap();
        assert_eq!(store.resolve(fresh).unwrap(), b"<http://e/b>");
    }

    #[test]
    fn atom__interior_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = AtomStore::open(dir.path()).expect("open");
            store.intern(b"<http://e/a>").unwrap();
            store.intern(b"<http://e/b>").unwrap();
            store.sync().unwrap();
        }

        // Flip a byte inside the first entry's payload.
        let seg = dir.path().join("seg-000001.atm");
        let mut bytes = std::fs::read(&seg).unwrap();
        bytes[21] ^= 0xFF;
        std::fs::write(&seg, &bytes).unwrap();

        // The corrupted entry is no longer the tail, so open must fail.
        let err = AtomStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, AtomError::Corrupted { .. }));
    }

    #[test]
    fn atom__bad_magic_is_fatal() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = AtomStore::open(dir.path()).expect("open");
            store.intern(b"<http://e/a>").unwrap();
            store.sync().unwrap();
        }

        let seg = dir.path().join("seg-000001.atm");
        let mut bytes = std::fs::read(&seg).unwrap();
        bytes[0] = 0x00;
        std::fs::write(&seg, &bytes).unwrap();

        assert!(matches!(
            AtomStore::open(dir.path()),
            Err(AtomError::Corrupted { .. })
        ));
    }
}
