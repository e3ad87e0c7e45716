//! B+Tree over fixed-width quad keys.
//!
//! An in-memory page tree with the classic B+ shape: branch pages hold
//! separators and child ids, leaf pages hold sorted `(key, meta)` runs
//! and are chained left-to-right for sequential scans. All executor
//! access goes through [`Cursor`]: a `seek` positions at the first key
//! `>=` a prefix, then `next`/`peek` advance in key order across leaf
//! boundaries in amortised O(1).
//!
//! Pages live in an arena (`Vec<Page>`) and are addressed by index, so
//! the tree contains no self-referential borrows. Every leaf tracks
//! `last_applied_tx` — the newest transaction that touched it — which
//! makes WAL replay idempotent: an op whose transaction a leaf has
//! already applied is skipped.
//!
//! Deletion removes the entry from its leaf without rebalancing.
//! Underfull leaves cost a little scan time, never correctness; the
//! pruner rebuilds stores wholesale, which is where real shrinking
//! happens.

use crate::model::TxId;

use super::{KEY_WORDS, QuadKey, VersionMeta};

/// Max entries in a leaf before it splits.
const LEAF_CAP: usize = 256;

/// Max children in a branch before it splits.
const BRANCH_CAP: usize = 128;

type PageId = u32;

#[derive(Debug)]
pub(super) struct Leaf {
    pub(super) keys: Vec<QuadKey>,
    pub(super) vals: Vec<VersionMeta>,
    pub(super) next: Option<PageId>,
    pub(super) last_applied_tx: TxId,
}

#[derive(Debug)]
struct Branch {
    /// `children[i]` holds keys `< seps[i]`; `children[i+1]` holds keys
    /// `>= seps[i]`.
    seps: Vec<QuadKey>,
    children: Vec<PageId>,
}

#[derive(Debug)]
enum Page {
    Leaf(Leaf),
    Branch(Branch),
}

/// A B+Tree mapping [`QuadKey`]s to [`VersionMeta`].
#[derive(Debug)]
pub struct BTree {
    pages: Vec<Page>,
    root: PageId,
    first_leaf: PageId,
    count: u64,
}

impl BTree {
    /// An empty tree: a single empty leaf as root.
    pub fn new() -> Self {
        Self {
            pages: vec![Page::Leaf(Leaf {
                keys: Vec::new(),
                vals: Vec::new(),
                next: None,
                last_applied_tx: 0,
            })],
            root: 0,
            first_leaf: 0,
            count: 0,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// True if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Highest `last_applied_tx` across all leaves.
    pub fn last_applied_tx(&self) -> TxId {
        self.pages
            .iter()
            .filter_map(|p| match p {
                Page::Leaf(l) => Some(l.last_applied_tx),
                Page::Branch(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    // --------------------------------------------------------------------------------------------
    // Mutation
    // --------------------------------------------------------------------------------------------

    /// Inserts `key` (or overwrites its meta), attributing the change to
    /// transaction `tx`.
    ///
    /// If the target leaf has already applied `tx` and the key is
    /// present, the call is a no-op — this is what makes WAL replay
    /// after a crash-during-checkpoint safe.
    pub fn insert_if_newer(&mut self, key: QuadKey, val: VersionMeta, tx: TxId) {
        if let Some((sep, right)) = self.insert_rec(self.root, key, val, tx) {
            let new_root = self.push_page(Page::Branch(Branch {
                seps: vec![sep],
                children: vec![self.root, right],
            }));
            self.root = new_root;
        }
    }

    /// Rewrites the meta of an existing key, attributing the change to
    /// transaction `tx`. Returns `true` if the key was present.
    pub fn update_if_newer(&mut self, key: QuadKey, val: VersionMeta, tx: TxId) -> bool {
        let leaf_id = self.find_leaf(&key);
        let Page::Leaf(leaf) = &mut self.pages[leaf_id as usize] else {
            return false;
        };
        match leaf.keys.binary_search(&key) {
            Ok(i) => {
                leaf.vals[i] = val;
                leaf.last_applied_tx = leaf.last_applied_tx.max(tx);
                true
            }
            Err(_) => false,
        }
    }

    /// Physically removes `key`. Returns `true` if it was present.
    pub fn delete(&mut self, key: &QuadKey) -> bool {
        let leaf_id = self.find_leaf(key);
        let Page::Leaf(leaf) = &mut self.pages[leaf_id as usize] else {
            return false;
        };
        match leaf.keys.binary_search(key) {
            Ok(i) => {
                leaf.keys.remove(i);
                leaf.vals.remove(i);
                self.count -= 1;
                true
            }
            Err(_) => false,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Lookup
    // --------------------------------------------------------------------------------------------

    /// Exact-match lookup.
    pub fn get(&self, key: &QuadKey) -> Option<VersionMeta> {
        let leaf_id = self.find_leaf(key);
        let Page::Leaf(leaf) = &self.pages[leaf_id as usize] else {
            return None;
        };
        leaf.keys.binary_search(key).ok().map(|i| leaf.vals[i])
    }

    /// Positions a cursor at the first key `>=` `prefix` (padded with
    /// zeros to full key width).
    pub fn seek(&self, prefix: &[u64]) -> Cursor<'_> {
        let mut target = [0u64; KEY_WORDS];
        target[..prefix.len().min(KEY_WORDS)]
            .copy_from_slice(&prefix[..prefix.len().min(KEY_WORDS)]);

        let leaf_id = self.find_leaf(&target);
        let Page::Leaf(leaf) = &self.pages[leaf_id as usize] else {
            return Cursor {
                tree: self,
                leaf: None,
                idx: 0,
            };
        };
        let idx = leaf.keys.partition_point(|k| k < &target);
        let mut cursor = Cursor {
            tree: self,
            leaf: Some(leaf_id),
            idx,
        };
        cursor.skip_exhausted();
        cursor
    }

    /// A cursor over the whole tree, smallest key first.
    pub fn iter(&self) -> Cursor<'_> {
        let mut cursor = Cursor {
            tree: self,
            leaf: Some(self.first_leaf),
            idx: 0,
        };
        cursor.skip_exhausted();
        cursor
    }

    /// Counts entries whose key starts with `prefix`, up to `cap`.
    ///
    /// The planner uses this as a cheap selectivity estimate when two
    /// orderings tie on bound-prefix length.
    pub fn estimate_prefix(&self, prefix: &[u64], cap: usize) -> usize {
        let mut cursor = self.seek(prefix);
        let mut n = 0;
        while n < cap {
            match cursor.peek() {
                Some((key, _)) if key[..prefix.len()] == *prefix => {
                    n += 1;
                    cursor.next();
                }
                _ => break,
            }
        }
        n
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn push_page(&mut self, page: Page) -> PageId {
        self.pages.push(page);
        (self.pages.len() - 1) as PageId
    }

    /// Descends from the root to the leaf that owns `key`.
    fn find_leaf(&self, key: &QuadKey) -> PageId {
        let mut page = self.root;
        loop {
            match &self.pages[page as usize] {
                Page::Leaf(_) => return page,
                Page::Branch(b) => {
                    let idx = b.seps.partition_point(|s| s <= key);
                    page = b.children[idx];
                }
            }
        }
    }

    fn insert_rec(
        &mut self,
        page: PageId,
        key: QuadKey,
        val: VersionMeta,
        tx: TxId,
    ) -> Option<(QuadKey, PageId)> {
        let (child_idx, child) = match &self.pages[page as usize] {
            Page::Leaf(_) => return self.insert_into_leaf(page, key, val, tx),
            Page::Branch(b) => {
                let idx = b.seps.partition_point(|s| s <= &key);
                (idx, b.children[idx])
            }
        };

        if let Some((sep, right)) = self.insert_rec(child, key, val, tx) {
            let Page::Branch(b) = &mut self.pages[page as usize] else {
                return None;
            };
            b.seps.insert(child_idx, sep);
            b.children.insert(child_idx + 1, right);
            if b.children.len() > BRANCH_CAP {
                return Some(self.split_branch(page));
            }
        }
        None
    }

    fn insert_into_leaf(
        &mut self,
        page: PageId,
        key: QuadKey,
        val: VersionMeta,
        tx: TxId,
    ) -> Option<(QuadKey, PageId)> {
        let needs_split;
        {
            let Page::Leaf(leaf) = &mut self.pages[page as usize] else {
                return None;
            };
            match leaf.keys.binary_search(&key) {
                Ok(i) => {
                    // Replay of a transaction this page already applied:
                    // leave the stored meta alone.
                    if tx > leaf.last_applied_tx {
                        leaf.vals[i] = val;
                        leaf.last_applied_tx = tx;
                    }
                    return None;
                }
                Err(i) => {
                    leaf.keys.insert(i, key);
                    leaf.vals.insert(i, val);
                    leaf.last_applied_tx = leaf.last_applied_tx.max(tx);
                    needs_split = leaf.keys.len() > LEAF_CAP;
                }
            }
        }
        self.count += 1;
        if needs_split {
            Some(self.split_leaf(page))
        } else {
            None
        }
    }

    fn split_leaf(&mut self, page: PageId) -> (QuadKey, PageId) {
        let (right_leaf, sep);
        {
            let Page::Leaf(leaf) = &mut self.pages[page as usize] else {
                unreachable!("split_leaf on a branch page");
            };
            let mid = leaf.keys.len() / 2;
            let keys = leaf.keys.split_off(mid);
            let vals = leaf.vals.split_off(mid);
            sep = keys[0];
            right_leaf = Leaf {
                keys,
                vals,
                next: leaf.next,
                last_applied_tx: leaf.last_applied_tx,
            };
        }
        let right_id = self.push_page(Page::Leaf(right_leaf));
        if let Page::Leaf(leaf) = &mut self.pages[page as usize] {
            leaf.next = Some(right_id);
        }
        (sep, right_id)
    }

    fn split_branch(&mut self, page: PageId) -> (QuadKey, PageId) {
        let (right_branch, sep);
        {
            let Page::Branch(b) = &mut self.pages[page as usize] else {
                unreachable!("split_branch on a leaf page");
            };
            let mid = b.seps.len() / 2;
            sep = b.seps[mid];
            let seps = b.seps.split_off(mid + 1);
            b.seps.pop();
            let children = b.children.split_off(mid + 1);
            right_branch = Branch { seps, children };
        }
        let right_id = self.push_page(Page::Branch(right_branch));
        (sep, right_id)
    }

    // --------------------------------------------------------------------------------------------
    // Bulk load / leaf access (checkpoint images)
    // --------------------------------------------------------------------------------------------

    /// Rebuilds a tree from pre-sorted leaf pages, building branch
    /// levels bottom-up. Used by the checkpoint image reader.
    pub(super) fn from_leaves(leaf_pages: Vec<Leaf>) -> Self {
        if leaf_pages.is_empty() {
            return Self::new();
        }

        let mut tree = Self {
            pages: Vec::with_capacity(leaf_pages.len() * 2),
            root: 0,
            first_leaf: 0,
            count: 0,
        };

        // Level 0: the leaves, chained in order.
        let mut level: Vec<(QuadKey, PageId)> = Vec::with_capacity(leaf_pages.len());
        for leaf in leaf_pages {
            tree.count += leaf.keys.len() as u64;
            let first = leaf.keys.first().copied().unwrap_or([0; KEY_WORDS]);
            let id = tree.push_page(Page::Leaf(leaf));
            if let Some(&(_, prev)) = level.last()
                && let Page::Leaf(prev_leaf) = &mut tree.pages[prev as usize]
            {
                prev_leaf.next = Some(id);
            }
            level.push((first, id));
        }
        tree.first_leaf = level[0].1;

        // Upper levels until a single root remains.
        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len() / BRANCH_CAP + 1);
            for chunk in level.chunks(BRANCH_CAP) {
                let children: Vec<PageId> = chunk.iter().map(|&(_, id)| id).collect();
                let seps: Vec<QuadKey> = chunk[1..].iter().map(|&(k, _)| k).collect();
                let first = chunk[0].0;
                let id = tree.push_page(Page::Branch(Branch { seps, children }));
                next_level.push((first, id));
            }
            level = next_level;
        }
        tree.root = level[0].1;
        tree
    }

    /// Iterates leaf pages left to right. Used by the checkpoint image
    /// writer.
    pub(super) fn leaf_pages(&self) -> LeafPages<'_> {
        LeafPages {
            tree: self,
            next: Some(self.first_leaf),
        }
    }
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// Cursor
// ------------------------------------------------------------------------------------------------

/// A positioned iterator over the leaf chain.
///
/// Valid only while the tree is unmodified — the executor holds the
/// store's read lock for the lifetime of every cursor it opens.
pub struct Cursor<'a> {
    tree: &'a BTree,
    leaf: Option<PageId>,
    idx: usize,
}

impl<'a> Cursor<'a> {
    /// The entry under the cursor, without advancing.
    pub fn peek(&self) -> Option<(&'a QuadKey, VersionMeta)> {
        let leaf_id = self.leaf?;
        let Page::Leaf(leaf) = &self.tree.pages[leaf_id as usize] else {
            return None;
        };
        leaf.keys.get(self.idx).map(|k| (k, leaf.vals[self.idx]))
    }

    /// Returns the entry under the cursor and advances past it.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(QuadKey, VersionMeta)> {
        let (key, val) = self.peek().map(|(k, v)| (*k, v))?;
        self.idx += 1;
        self.skip_exhausted();
        Some((key, val))
    }

    /// Moves off exhausted (or deletion-emptied) leaves onto the next
    /// non-empty one.
    fn skip_exhausted(&mut self) {
        while let Some(leaf_id) = self.leaf {
            let Page::Leaf(leaf) = &self.tree.pages[leaf_id as usize] else {
                self.leaf = None;
                return;
            };
            if self.idx < leaf.keys.len() {
                return;
            }
            self.leaf = leaf.next;
            self.idx = 0;
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = (QuadKey, VersionMeta);

    fn next(&mut self) -> Option<Self::Item> {
        Cursor::next(self)
    }
}

/// Iterator over a tree's leaf pages, left to right.
pub(super) struct LeafPages<'a> {
    tree: &'a BTree,
    next: Option<PageId>,
}

impl<'a> Iterator for LeafPages<'a> {
    type Item = &'a Leaf;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let Page::Leaf(leaf) = &self.tree.pages[id as usize] else {
            self.next = None;
            return None;
        };
        self.next = leaf.next;
        Some(leaf)
    }
}
