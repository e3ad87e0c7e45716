//! Pool tests: role lifecycle, rentals, clears, and switches.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::pool::{PoolError, StorePool};
    use crate::store::{Pattern, StoreConfig};
    use tempfile::TempDir;

    fn iri(name: &str) -> Vec<u8> {
        format!("<http://example.org/{name}>").into_bytes()
    }

    fn pool(dir: &TempDir) -> StorePool {
        StorePool::new(dir.path(), StoreConfig::default()).expect("pool")
    }

    fn count(store: &crate::store::QuadStore) -> usize {
        store
            .read()
            .expect("read")
            .query_current(Pattern::any())
            .count()
    }

    #[test]
    fn pool__get_caches_one_store_per_role() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        let a = pool.get("primary").expect("get");
        a.add(&iri("s"), &iri("p"), &iri("o"), None).expect("add");

        // A second get shares the same store.
        let b = pool.get("primary").expect("get again");
        assert_eq!(count(&b), 1);
        assert!(pool.contains("primary"));
        assert!(!pool.contains("secondary"));
    }

    #[test]
    fn pool__roles_are_isolated() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        pool.get("primary")
            .expect("get")
            .add(&iri("s"), &iri("p"), &iri("o"), None)
            .expect("add");

        assert_eq!(count(&pool.get("secondary").expect("get")), 0);
    }

    #[test]
    fn pool__switch_swaps_role_contents() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        pool.get("primary")
            .expect("get")
            .add(&iri("in-primary"), &iri("p"), &iri("o"), None)
            .expect("add");
        pool.get("secondary").expect("create secondary");

        pool.switch("primary", "secondary").expect("switch");

        assert_eq!(count(&pool.get("primary").expect("get")), 0);
        assert_eq!(count(&pool.get("secondary").expect("get")), 1);
    }

    #[test]
    fn pool__switch_leaves_existing_readers_on_old_snapshot() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        let old_primary = pool.get("primary").expect("get");
        old_primary
            .add(&iri("s"), &iri("p"), &iri("o"), None)
            .expect("add");
        pool.get("secondary").expect("create secondary");

        pool.switch("primary", "secondary").expect("switch");

        // The handle obtained before the switch still reads old data.
        assert_eq!(count(&old_primary), 1);
    }

    #[test]
    fn pool__switch_unknown_role_fails() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        pool.get("primary").expect("get");
        assert!(matches!(
            pool.switch("primary", "ghost"),
            Err(PoolError::UnknownRole(_))
        ));
    }

    #[test]
    fn pool__clear_empties_a_role() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        pool.get("primary")
            .expect("get")
            .add(&iri("s"), &iri("p"), &iri("o"), None)
            .expect("add");
        pool.clear("primary").expect("clear");
        assert_eq!(count(&pool.get("primary").expect("get")), 0);
    }

    #[test]
    fn pool__rented_store_is_empty_and_recycled() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);

        {
            let rented = pool.rent().expect("rent");
            rented.add(&iri("tmp"), &iri("p"), &iri("o"), None).expect("add");
            assert_eq!(count(&rented), 1);
            // Returned (and cleared) on drop.
        }

        let rented = pool.rent().expect("rent again");
        assert_eq!(count(&rented), 0, "recycled rental must be empty");
    }

    #[test]
    fn pool__invalid_role_names_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        assert!(matches!(pool.get(""), Err(PoolError::InvalidRole(_))));
        assert!(matches!(pool.get(".hidden"), Err(PoolError::InvalidRole(_))));
        assert!(matches!(pool.get("a/b"), Err(PoolError::InvalidRole(_))));
    }
}
