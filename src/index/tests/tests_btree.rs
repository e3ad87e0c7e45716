//! B+Tree unit tests: insert/get/update/delete, cursor seeks across
//! leaf splits, and replay idempotency via `last_applied_tx`.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::index::btree::BTree;
    use crate::index::{QuadKey, VersionMeta};
    use crate::model::TIME_MAX;

    fn key(a: u64, b: u64, c: u64) -> QuadKey {
        [a, b, c, 0, 1, 0]
    }

    fn open_meta() -> VersionMeta {
        VersionMeta {
            valid_to: TIME_MAX,
            tx_to: TIME_MAX,
        }
    }

    #[test]
    fn btree__insert_then_get() {
        let mut tree = BTree::new();
        tree.insert_if_newer(key(1, 2, 3), open_meta(), 1);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&key(1, 2, 3)), Some(open_meta()));
        assert_eq!(tree.get(&key(1, 2, 4)), None);
    }

    #[test]
    fn btree__cursor_is_sorted_across_splits() {
        let mut tree = BTree::new();
        // Insert far more than one leaf's worth, in reverse order.
        for i in (0..2_000u64).rev() {
            tree.insert_if_newer(key(i, i % 7, i % 3), open_meta(), i + 1);
        }
        assert_eq!(tree.len(), 2_000);

        let collected: Vec<QuadKey> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected.len(), 2_000);
        for pair in collected.windows(2) {
            assert!(pair[0] < pair[1], "cursor must yield strictly ascending keys");
        }
    }

    #[test]
    fn btree__seek_positions_at_first_ge() {
        let mut tree = BTree::new();
        for s in [10u64, 20, 30] {
            for p in [1u64, 2] {
                tree.insert_if_newer(key(s, p, 0), open_meta(), 1);
            }
        }

        // Exact prefix hit.
        let mut cursor = tree.seek(&[20]);
        let (k, _) = cursor.next().expect("entry at s=20");
        assert_eq!(k[0], 20);
        assert_eq!(k[1], 1);

        // Between keys: lands on the next greater.
        let mut cursor = tree.seek(&[15]);
        let (k, _) = cursor.next().expect("entry after s=15");
        assert_eq!(k[0], 20);

        // Past the end: exhausted immediately.
        let mut cursor = tree.seek(&[31]);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn btree__prefix_scan_stops_at_prefix_end() {
        let mut tree = BTree::new();
        for s in [5u64, 6, 7] {
            for p in 0..10u64 {
                tree.insert_if_newer(key(s, p, 0), open_meta(), 1);
            }
        }

        let mut cursor = tree.seek(&[6]);
        let mut n = 0;
        while let Some((k, _)) = cursor.next() {
            if k[0] != 6 {
                break;
            }
            n += 1;
        }
        assert_eq!(n, 10);
        assert_eq!(tree.estimate_prefix(&[6], 64), 10);
        assert_eq!(tree.estimate_prefix(&[6], 4), 4, "estimate honours its cap");
    }

    #[test]
    fn btree__update_rewrites_meta_in_place() {
        let mut tree = BTree::new();
        tree.insert_if_newer(key(1, 1, 1), open_meta(), 1);

        let closed = VersionMeta {
            valid_to: TIME_MAX,
            tx_to: 9,
        };
        assert!(tree.update_if_newer(key(1, 1, 1), closed, 9));
        assert_eq!(tree.get(&key(1, 1, 1)), Some(closed));
        assert_eq!(tree.len(), 1, "update must not create an entry");

        assert!(!tree.update_if_newer(key(9, 9, 9), closed, 10));
    }

    #[test]
    fn btree__delete_removes_entry() {
        let mut tree = BTree::new();
        for i in 0..100u64 {
            tree.insert_if_newer(key(i, 0, 0), open_meta(), 1);
        }
        assert!(tree.delete(&key(50, 0, 0)));
        assert!(!tree.delete(&key(50, 0, 0)), "second delete finds nothing");
        assert_eq!(tree.len(), 99);
        assert_eq!(tree.get(&key(50, 0, 0)), None);

        // The cursor skips the hole cleanly.
        let collected: Vec<QuadKey> = tree.iter().map(|(k, _)| k).collect();
        assert_eq!(collected.len(), 99);
        assert!(!collected.iter().any(|k| k[0] == 50));
    }

    #[test]
    fn btree__replayed_transaction_is_skipped() {
        let mut tree = BTree::new();
        tree.insert_if_newer(key(1, 1, 1), open_meta(), 5);

        // A stale re-apply of tx 5 with different meta must not clobber
        // the stored value.
        let clobber = VersionMeta {
            valid_to: 0,
            tx_to: 0,
        };
        tree.insert_if_newer(key(1, 1, 1), clobber, 5);
        assert_eq!(tree.get(&key(1, 1, 1)), Some(open_meta()));
        assert_eq!(tree.last_applied_tx(), 5);

        // A genuinely newer transaction does take effect.
        tree.insert_if_newer(key(1, 1, 1), clobber, 6);
        assert_eq!(tree.get(&key(1, 1, 1)), Some(clobber));
        assert_eq!(tree.last_applied_tx(), 6);
    }

    #[test]
    fn btree__empty_tree_cursors_are_exhausted() {
        let tree = BTree::new();
        assert!(tree.is_empty());
        assert!(tree.iter().next().is_none());
        assert!(tree.seek(&[0]).next().is_none());
        assert!(tree.seek(&[u64::MAX]).next().is_none());
    }
}
