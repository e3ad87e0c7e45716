//! Basic atom store tests: interning, idempotency, resolution, lookup,
//! iteration, and statistics.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::atom::{AtomError, AtomStore};
    use tempfile::TempDir;

    #[test]
    fn atom__intern_then_resolve() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let id = store.intern(b"<http://example.org/a>").expect("intern");
        assert_ne!(id, 0, "id 0 is reserved for the default graph");
        assert_eq!(store.resolve(id).unwrap(), b"<http://example.org/a>");
        assert_eq!(store.resolve_str(id).unwrap(), "<http://example.org/a>");
    }

    #[test]
    fn atom__intern_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let a = store.intern(b"\"hello\"@en").unwrap();
        let b = store.intern(b"\"hello\"@en").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn atom__distinct_terms_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let a = store.intern(b"<http://e/a>").unwrap();
        let b = store.intern(b"<http://e/b>").unwrap();
        let lit = store.intern(b"\"a\"").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, lit);
        assert_ne!(b, lit);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn atom__lookup_without_write() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let id = store.intern(b"_:b0").unwrap();
        assert_eq!(store.lookup(b"_:b0"), Some(id));
        assert_eq!(store.lookup(b"_:never"), None);
        assert_eq!(store.len(), 1, "lookup must not intern");
    }

    #[test]
    fn atom__unknown_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = AtomStore::open(dir.path()).expect("open");

        assert!(matches!(store.resolve(0), Err(AtomError::UnknownId(0))));
        assert!(matches!(
            store.resolve(0xFFFF_FFFF),
            Err(AtomError::UnknownId(_))
        ));
    }

    #[test]
    fn atom__non_utf8_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let err = store.intern(&[0x22, 0xFF, 0xFE, 0x22]).unwrap_err();
        assert!(matches!(err, AtomError::NotUtf8));
    }

    #[test]
    fn atom__iter_yields_all_in_intern_order() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");

        let terms: Vec<&[u8]> = vec![b"<http://e/a>", b"<http://e/b>", b"\"x\"^^<http://w3/int>"];
        let ids: Vec<_> = terms.iter().map(|t| store.intern(t).unwrap()).collect();

        let collected: Vec<_> = store.iter().collect();
        assert_eq!(collected.len(), 3);
        for (i, (id, bytes)) in collected.iter().enumerate() {
            assert_eq!(*id, ids[i]);
            assert_eq!(*bytes, terms[i]);
        }
    }

    #[test]
    fn atom__stats_track_counts_and_bytes() {
        let dir = TempDir::new().unwrap();
        let mut store = AtomStore::open(dir.path()).expect("open");
        assert!(store.is_empty());

        store.intern(b"<http://e/a>").unwrap();
        store.intern(b"<http://e/b>").unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.bytes_len() > 0);
    }
}
