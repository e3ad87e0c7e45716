//! Index store — multi-ordering B+Trees over quads.
//!
//! Every quad version is stored in **five** B+Trees, one per key
//! ordering, so that any combination of bound terms in a SPARQL pattern
//! can be answered by a prefix seek:
//!
//! | Ordering | Key layout                                   | Serves |
//! |----------|----------------------------------------------|--------|
//! | SPO      | `[s, p, o, g, tx_from, valid_from]`          | `(s …)`, `(s p …)`, `(s p o)` |
//! | POS      | `[p, o, s, g, tx_from, valid_from]`          | `(? p ?)`, `(? p o)` |
//! | OSP      | `[o, s, p, g, tx_from, valid_from]`          | `(? ? o)`, `(s ? o)` |
//! | GSPO     | `[g, s, p, o, tx_from, valid_from]`          | graph-scoped scans |
//! | TSPO     | `[valid_from, s, p, o, g, tx_from]`          | temporal-leading scans |
//!
//! Keys are fixed-width `[u64; 6]` tuples, so comparison is branch-free
//! word comparison. The value attached to each key is the mutable half of
//! the version record ([`VersionMeta`]): `valid_to` and `tx_to`, which a
//! retraction closes in place.
//!
//! All five trees hold the same quad set; [`IndexSet`] keeps them in
//! lock-step within a transaction. The **cursor** ([`btree::Cursor`]) is
//! the only interface the executor uses for index access — every pattern
//! scan compiles to one `seek` plus sequential `next` calls.
//!
//! Checkpointing serializes each tree's leaf chain into a CRC-framed,
//! delta-compressed image (`image.rs`); recovery bulk-loads the image and
//! replays the WAL tail over it, which is idempotent because every leaf
//! page tracks `last_applied_tx`.

pub mod btree;
mod image;

#[cfg(test)]
mod tests;

pub use btree::{BTree, Cursor};

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::model::{QuadIds, Timestamp, TxId, VersionedQuad};

/// Number of words in a B+Tree key.
pub const KEY_WORDS: usize = 6;

/// A fixed-width index key: four permuted quad ids plus the version
/// record's immutable half.
pub type QuadKey = [u64; KEY_WORDS];

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A checkpoint image failed validation.
    #[error("index image corrupted: {0}")]
    Corrupted(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Version metadata
// ------------------------------------------------------------------------------------------------

/// The mutable half of a version record, stored as the B+Tree value.
///
/// `valid_from` and `tx_from` live in the key; the two closing bounds
/// live here so a retraction is an in-place value update rather than a
/// key rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionMeta {
    /// End of the valid-time interval (exclusive); `TIME_MAX` if open.
    pub valid_to: Timestamp,
    /// When a later transaction superseded this version (exclusive);
    /// `TIME_MAX` if still on the books.
    pub tx_to: Timestamp,
}

impl VersionMeta {
    /// Metadata for a freshly added, fully open version.
    pub fn open(valid_to: Timestamp) -> Self {
        Self {
            valid_to,
            tx_to: crate::model::TIME_MAX,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Orderings
// ------------------------------------------------------------------------------------------------

/// The five maintained key orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    /// Subject, predicate, object, graph.
    Spo,
    /// Predicate, object, subject, graph.
    Pos,
    /// Object, subject, predicate, graph.
    Osp,
    /// Graph, subject, predicate, object.
    Gspo,
    /// Valid-from, subject, predicate, object, graph.
    Tspo,
}

/// All orderings, in [`IndexSet`] storage order.
pub const ALL_ORDERS: [IndexOrder; 5] = [
    IndexOrder::Spo,
    IndexOrder::Pos,
    IndexOrder::Osp,
    IndexOrder::Gspo,
    IndexOrder::Tspo,
];

impl IndexOrder {
    /// The checkpoint image file name for this ordering.
    pub fn file_name(self) -> &'static str {
        match self {
            IndexOrder::Spo => "spo.btree",
            IndexOrder::Pos => "pos.btree",
            IndexOrder::Osp => "osp.btree",
            IndexOrder::Gspo => "gspo.btree",
            IndexOrder::Tspo => "tspo.btree",
        }
    }

    /// On-disk discriminant used in image headers.
    pub fn tag(self) -> u8 {
        match self {
            IndexOrder::Spo => 0,
            IndexOrder::Pos => 1,
            IndexOrder::Osp => 2,
            IndexOrder::Gspo => 3,
            IndexOrder::Tspo => 4,
        }
    }

    /// Ordering for an on-disk discriminant.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexOrder::Spo),
            1 => Some(IndexOrder::Pos),
            2 => Some(IndexOrder::Osp),
            3 => Some(IndexOrder::Gspo),
            4 => Some(IndexOrder::Tspo),
            _ => None,
        }
    }

    /// Builds this ordering's key for a quad version.
    pub fn key(self, ids: QuadIds, tx_from: Timestamp, valid_from: Timestamp) -> QuadKey {
        let QuadIds { s, p, o, g } = ids;
        match self {
            IndexOrder::Spo => [s, p, o, g, tx_from, valid_from],
            IndexOrder::Pos => [p, o, s, g, tx_from, valid_from],
            IndexOrder::Osp => [o, s, p, g, tx_from, valid_from],
            IndexOrder::Gspo => [g, s, p, o, tx_from, valid_from],
            IndexOrder::Tspo => [valid_from, s, p, o, g, tx_from],
        }
    }

    /// Recovers the quad and version origin from one of this ordering's
    /// keys — the inverse of [`IndexOrder::key`].
    pub fn decompose(self, key: &QuadKey) -> (QuadIds, Timestamp, Timestamp) {
        match self {
            IndexOrder::Spo => (QuadIds::new(key[0], key[1], key[2], key[3]), key[4], key[5]),
            IndexOrder::Pos => (QuadIds::new(key[2], key[0], key[1], key[3]), key[4], key[5]),
            IndexOrder::Osp => (QuadIds::new(key[1], key[2], key[0], key[3]), key[4], key[5]),
            IndexOrder::Gspo => (QuadIds::new(key[1], key[2], key[3], key[0]), key[4], key[5]),
            IndexOrder::Tspo => (QuadIds::new(key[1], key[2], key[3], key[4]), key[5], key[0]),
        }
    }

    /// How many leading key positions a pattern binds in this ordering,
    /// given which of (s, p, o, g) are ground.
    ///
    /// The planner picks the ordering with the longest bound prefix.
    pub fn bound_prefix(self, s: bool, p: bool, o: bool, g: bool) -> usize {
        let positions: [bool; 4] = match self {
            IndexOrder::Spo => [s, p, o, g],
            IndexOrder::Pos => [p, o, s, g],
            IndexOrder::Osp => [o, s, p, g],
            IndexOrder::Gspo => [g, s, p, o],
            // TSPO leads with a timestamp, which patterns never bind.
            IndexOrder::Tspo => [false, false, false, false],
        };
        positions.iter().take_while(|&&b| b).count()
    }
}

// ------------------------------------------------------------------------------------------------
// Index set
// ------------------------------------------------------------------------------------------------

/// The five B+Trees, kept in lock-step.
///
/// Mutations go through [`IndexSet`] so no tree can drift from the
/// others; reads pick a single tree via [`IndexSet::tree`].
#[derive(Debug)]
pub struct IndexSet {
    trees: [BTree; 5],
}

impl IndexSet {
    /// Five empty trees.
    pub fn new() -> Self {
        Self {
            trees: [
                BTree::new(),
                BTree::new(),
                BTree::new(),
                BTree::new(),
                BTree::new(),
            ],
        }
    }

    /// The tree for one ordering.
    pub fn tree(&self, order: IndexOrder) -> &BTree {
        &self.trees[order.tag() as usize]
    }

    /// Inserts a quad version into every ordering.
    ///
    /// Idempotent for replay: a tree whose affected leaf has already
    /// applied `tx` skips the insert.
    pub fn insert_version(&mut self, q: &VersionedQuad, applying_tx: TxId) {
        let meta = VersionMeta {
            valid_to: q.valid_to,
            tx_to: q.tx_to,
        };
        for order in ALL_ORDERS {
            let key = order.key(q.ids, q.tx_from, q.valid_from);
            self.trees[order.tag() as usize].insert_if_newer(key, meta, applying_tx);
        }
    }

    /// Rewrites the version metadata of an existing version in every
    /// ordering. Returns `true` if the version was present.
    pub fn update_version(
        &mut self,
        ids: QuadIds,
        tx_from: Timestamp,
        valid_from: Timestamp,
        meta: VersionMeta,
        applying_tx: TxId,
    ) -> bool {
        let mut found = false;
        for order in ALL_ORDERS {
            let key = order.key(ids, tx_from, valid_from);
            found |= self.trees[order.tag() as usize].update_if_newer(key, meta, applying_tx);
        }
        found
    }

    /// Physically removes a version from every ordering. Returns `true`
    /// if the version was present. Only the batch rollback and tests use
    /// this; normal retraction closes `tx_to` instead.
    pub fn delete_version(&mut self, ids: QuadIds, tx_from: Timestamp, valid_from: Timestamp) -> bool {
        let mut found = false;
        for order in ALL_ORDERS {
            let key = order.key(ids, tx_from, valid_from);
            found |= self.trees[order.tag() as usize].delete(&key);
        }
        found
    }

    /// Number of stored versions (identical across orderings).
    pub fn version_count(&self) -> u64 {
        self.trees[0].len()
    }

    /// Highest transaction id any page has applied.
    pub fn last_applied_tx(&self) -> TxId {
        self.trees.iter().map(|t| t.last_applied_tx()).max().unwrap_or(0)
    }

    /// Writes every tree's checkpoint image under `dir`.
    pub fn checkpoint(&mut self, dir: impl AsRef<Path>) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir.as_ref())?;
        for order in ALL_ORDERS {
            let path = dir.as_ref().join(order.file_name());
            image::write_image(&self.trees[order.tag() as usize], order, &path)?;
        }
        debug!(versions = self.version_count(), "index checkpoint written");
        Ok(())
    }

    /// Loads every tree from its checkpoint image under `dir`.
    ///
    /// Missing images yield empty trees (a store that has never
    /// checkpointed rebuilds purely from the WAL).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let mut set = Self::new();
        for order in ALL_ORDERS {
            let path = dir.as_ref().join(order.file_name());
            if path.is_file() {
                set.trees[order.tag() as usize] = image::read_image(&path, order)?;
            }
        }
        Ok(set)
    }
}

impl Default for IndexSet {
    fn default() -> Self {
        Self::new()
    }
}
