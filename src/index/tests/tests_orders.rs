//! Ordering tests: key composition/decomposition round-trips, bound
//! prefix computation, and IndexSet lock-step maintenance.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::index::{ALL_ORDERS, IndexOrder, IndexSet, VersionMeta};
    use crate::model::{QuadIds, TIME_MAX, VersionedQuad};

    fn sample_quad() -> VersionedQuad {
        VersionedQuad {
            ids: QuadIds::new(11, 22, 33, 44),
            valid_from: 100,
            valid_to: TIME_MAX,
            tx_from: 7,
            tx_to: TIME_MAX,
        }
    }

    #[test]
    fn orders__key_decompose_roundtrip() {
        let ids = QuadIds::new(1, 2, 3, 4);
        for order in ALL_ORDERS {
            let key = order.key(ids, 55, 66);
            let (back, tx_from, valid_from) = order.decompose(&key);
            assert_eq!(back, ids, "{order:?}");
            assert_eq!(tx_from, 55, "{order:?}");
            assert_eq!(valid_from, 66, "{order:?}");
        }
    }

    #[test]
    fn orders__bound_prefix_prefers_matching_shape() {
        // (s p ?) — SPO binds two leading positions.
        assert_eq!(IndexOrder::Spo.bound_prefix(true, true, false, false), 2);
        // (? p o) — POS binds two, SPO binds none.
        assert_eq!(IndexOrder::Pos.bound_prefix(false, true, true, false), 2);
        assert_eq!(IndexOrder::Spo.bound_prefix(false, true, true, false), 0);
        // (? ? o) — OSP leads with the object.
        assert_eq!(IndexOrder::Osp.bound_prefix(false, false, true, false), 1);
        // Graph-scoped: GSPO leads with g.
        assert_eq!(IndexOrder::Gspo.bound_prefix(true, false, false, true), 2);
        // TSPO never wins on bound terms; it exists for temporal scans.
        assert_eq!(IndexOrder::Tspo.bound_prefix(true, true, true, true), 0);
    }

    #[test]
    fn orders__index_set_keeps_trees_in_lockstep() {
        let mut set = IndexSet::new();
        let q = sample_quad();
        set.insert_version(&q, q.tx_from);

        assert_eq!(set.version_count(), 1);
        for order in ALL_ORDERS {
            let key = order.key(q.ids, q.tx_from, q.valid_from);
            let meta = set.tree(order).get(&key).expect("present in every ordering");
            assert_eq!(meta.tx_to, TIME_MAX);
        }

        // Retraction closes tx_to everywhere.
        let closed = VersionMeta {
            valid_to: TIME_MAX,
            tx_to: 9,
        };
        assert!(set.update_version(q.ids, q.tx_from, q.valid_from, closed, 9));
        for order in ALL_ORDERS {
            let key = order.key(q.ids, q.tx_from, q.valid_from);
            assert_eq!(set.tree(order).get(&key), Some(closed), "{order:?}");
        }

        // Physical delete removes everywhere.
        assert!(set.delete_version(q.ids, q.tx_from, q.valid_from));
        assert_eq!(set.version_count(), 0);
        for order in ALL_ORDERS {
            let key = order.key(q.ids, q.tx_from, q.valid_from);
            assert_eq!(set.tree(order).get(&key), None, "{order:?}");
        }
    }

    #[test]
    fn orders__update_of_absent_version_reports_false() {
        let mut set = IndexSet::new();
        let q = sample_quad();
        let closed = VersionMeta {
            valid_to: 5,
            tx_to: 5,
        };
        assert!(!set.update_version(q.ids, q.tx_from, q.valid_from, closed, 9));
    }
}
