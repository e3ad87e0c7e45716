//! Pruner tests: history modes, filters, dry runs, and the pointwise
//! preservation guarantees.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::model::TIME_MAX;
    use crate::pool::{
        GraphFilter, HistoryMode, PredicateFilter, PruneOptions, Pruner, StorePool,
    };
    use crate::store::{Pattern, QuadStore, StoreConfig};
    use tempfile::TempDir;

    fn iri(name: &str) -> Vec<u8> {
        format!("<http://example.org/{name}>").into_bytes()
    }

    fn lit(text: &str) -> Vec<u8> {
        format!("\"{text}\"").into_bytes()
    }

    fn pool(dir: &TempDir) -> StorePool {
        StorePool::new(dir.path(), StoreConfig::default()).expect("pool")
    }

    /// Seeds: one live quad, one retracted quad, one bounded-validity
    /// quad (expired), one quad in a named graph.
    fn seed(store: &QuadStore) {
        store.add(&iri("live"), &iri("p"), &lit("1"), None).expect("add");
        store.add(&iri("dead"), &iri("p"), &lit("2"), None).expect("add");
        store.retract(&iri("dead"), &iri("p"), &lit("2"), None).expect("retract");
        store
            .add_with_validity(&iri("old"), &iri("q"), &lit("3"), None, 100, 200)
            .expect("add");
        store
            .add(&iri("g-live"), &iri("p"), &lit("4"), Some(&iri("g1")))
            .expect("add");
    }

    fn current(store: &QuadStore) -> Vec<String> {
        let guard = store.read().expect("read");
        let mut out: Vec<String> = guard
            .query_current(Pattern::any())
            .map(|q| guard.resolve_str(q.ids.s).expect("resolve").to_string())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn pruner__flatten_preserves_current_pointwise() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        let before = current(&pool.get("primary").expect("get"));
        let report =
            Pruner::prune_role(&pool, "primary", &PruneOptions::flatten()).expect("prune");

        let after = current(&pool.get("primary").expect("get"));
        assert_eq!(before, after, "FlattenToCurrent must not change query_current");
        assert!(report.versions_kept < report.versions_scanned);

        // The retracted quad's versions are gone entirely.
        let guard = pool.get("primary").expect("get");
        let guard = guard.read().expect("read");
        let all: Vec<_> = guard.query_all_versions(Pattern::any()).collect();
        assert_eq!(all.len() as u64, report.versions_kept);
    }

    #[test]
    fn pruner__preserve_all_keeps_every_version() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        // Ids differ between stores, so compare version "shapes":
        // resolved subject plus both intervals.
        fn shapes(store: &QuadStore) -> Vec<(String, u64, u64, u64, u64)> {
            let guard = store.read().expect("read");
            let mut out: Vec<_> = guard
                .query_all_versions(Pattern::any())
                .map(|v| {
                    (
                        guard.resolve_str(v.ids.s).expect("resolve").to_string(),
                        v.valid_from,
                        v.valid_to,
                        v.tx_from,
                        v.tx_to,
                    )
                })
                .collect();
            out.sort();
            out
        }

        let before_shapes = shapes(&pool.get("primary").expect("get"));
        let before_as_of_150 = {
            let store = pool.get("primary").expect("get");
            let guard = store.read().expect("read");
            guard.query_as_of(150, Pattern::any()).count()
        };

        let report =
            Pruner::prune_role(&pool, "primary", &PruneOptions::preserve_all()).expect("prune");
        assert_eq!(report.versions_scanned, report.versions_kept);

        let pruned = pool.get("primary").expect("get");
        assert_eq!(
            shapes(&pruned),
            before_shapes,
            "PreserveAll must copy every version verbatim"
        );
        let guard = pruned.read().expect("read");
        assert_eq!(
            guard.query_as_of(150, Pattern::any()).count(),
            before_as_of_150,
            "PreserveAll must keep historical queries pointwise"
        );
    }

    #[test]
    fn pruner__preserve_versions_drops_closed_rows() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        let options = PruneOptions {
            mode: HistoryMode::PreserveVersions,
            filters: Vec::new(),
            dry_run: false,
        };
        Pruner::prune_role(&pool, "primary", &options).expect("prune");

        let store = pool.get("primary").expect("get");
        let guard = store.read().expect("read");
        for v in guard.query_all_versions(Pattern::any()) {
            assert_eq!(v.tx_to, TIME_MAX, "no closed row survives PreserveVersions");
        }
        // The expired-validity row is still on the books and survives.
        assert_eq!(guard.query_as_of(150, Pattern::any()).count(), 1);
    }

    #[test]
    fn pruner__graph_filter_excludes_named_graph() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        let options = PruneOptions {
            mode: HistoryMode::FlattenToCurrent,
            filters: vec![Box::new(GraphFilter::exclude(vec![iri("g1")]))],
            dry_run: false,
        };
        Pruner::prune_role(&pool, "primary", &options).expect("prune");

        let after = current(&pool.get("primary").expect("get"));
        assert!(!after.contains(&"<http://example.org/g-live>".to_string()));
        assert!(after.contains(&"<http://example.org/live>".to_string()));
    }

    #[test]
    fn pruner__predicate_filter_includes_only_listed() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        let options = PruneOptions {
            mode: HistoryMode::PreserveVersions,
            filters: vec![Box::new(PredicateFilter::include(vec![iri("q")]))],
            dry_run: false,
        };
        Pruner::prune_role(&pool, "primary", &options).expect("prune");

        let store = pool.get("primary").expect("get");
        let guard = store.read().expect("read");
        let all: Vec<_> = guard.query_all_versions(Pattern::any()).collect();
        assert_eq!(all.len(), 1);
        assert_eq!(guard.resolve_str(all[0].ids.p).expect("resolve"), "<http://example.org/q>");
    }

    #[test]
    fn pruner__dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        seed(&pool.get("primary").expect("get"));

        let before = current(&pool.get("primary").expect("get"));
        let options = PruneOptions {
            mode: HistoryMode::FlattenToCurrent,
            filters: Vec::new(),
            dry_run: true,
        };
        let report = Pruner::prune_role(&pool, "primary", &options).expect("dry run");

        assert!(report.dry_run);
        assert!(report.versions_scanned > report.versions_kept);
        assert_eq!(report.target_atom_bytes, 0);
        assert_eq!(current(&pool.get("primary").expect("get")), before);
        assert!(!pool.contains("primary-pruning"), "no scratch role for dry runs");
    }

    #[test]
    fn pruner__orphan_atoms_do_not_survive_flatten() {
        let dir = TempDir::new().unwrap();
        let pool = pool(&dir);
        let store = pool.get("primary").expect("get");

        // A retracted quad whose subject appears nowhere else.
        store.add(&iri("orphan"), &iri("p"), &lit("x"), None).expect("add");
        store.retract(&iri("orphan"), &iri("p"), &lit("x"), None).expect("retract");
        store.add(&iri("live"), &iri("p"), &lit("y"), None).expect("add");
        drop(store);

        Pruner::prune_role(&pool, "primary", &PruneOptions::flatten()).expect("prune");

        let store = pool.get("primary").expect("get");
        let guard = store.read().expect("read");
        assert!(guard.lookup(&iri("orphan")).is_none(), "orphan atom was GC'd");
        assert!(guard.lookup(&iri("live")).is_some());
    }
}
