//! Read guards and pattern scans — the snapshot-isolated read surface.
//!
//! A [`ReadGuard`] wraps the store's read lock and pins the snapshot
//! instant taken at acquisition. All temporal queries interpret "now"
//! as that instant, so a long-running query sees one consistent moment
//! no matter how long it iterates. Borrowed atom bytes and cursors are
//! bounded by the guard's lifetime; the borrow checker enforces what
//! the storage contract demands.

use std::sync::RwLockReadGuard;

use smallvec::SmallVec;

use crate::atom::AtomStore;
use crate::index::{IndexOrder, IndexSet, btree::Cursor};
use crate::model::{self, AtomId, Timestamp, VersionedQuad};

use super::{StoreError, StoreInner};

// ------------------------------------------------------------------------------------------------
// Pattern
// ------------------------------------------------------------------------------------------------

/// A quad pattern: `None` positions are wildcards.
///
/// `g == Some(0)` selects the default graph specifically; `g == None`
/// matches every graph, default included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pattern {
    /// Subject, or wildcard.
    pub s: Option<AtomId>,
    /// Predicate, or wildcard.
    pub p: Option<AtomId>,
    /// Object, or wildcard.
    pub o: Option<AtomId>,
    /// Graph, or wildcard.
    pub g: Option<AtomId>,
}

impl Pattern {
    /// The all-wildcard pattern.
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern over (s, p, o) in any graph.
    pub fn triple(s: Option<AtomId>, p: Option<AtomId>, o: Option<AtomId>) -> Self {
        Self { s, p, o, g: None }
    }

    /// Pattern over (s, p, o, g).
    pub fn quad(
        s: Option<AtomId>,
        p: Option<AtomId>,
        o: Option<AtomId>,
        g: Option<AtomId>,
    ) -> Self {
        Self { s, p, o, g }
    }

    fn matches(&self, ids: crate::model::QuadIds) -> bool {
        self.s.is_none_or(|v| v == ids.s)
            && self.p.is_none_or(|v| v == ids.p)
            && self.o.is_none_or(|v| v == ids.o)
            && self.g.is_none_or(|v| v == ids.g)
    }

    /// Picks the ordering with the longest bound key prefix; ties go to
    /// the ordering whose prefix currently matches fewer entries.
    fn choose_index(&self, indexes: &IndexSet) -> (IndexOrder, SmallVec<[u64; 4]>) {
        const CANDIDATES: [IndexOrder; 4] = [
            IndexOrder::Spo,
            IndexOrder::Pos,
            IndexOrder::Osp,
            IndexOrder::Gspo,
        ];
        let (s, p, o, g) = (
            self.s.is_some(),
            self.p.is_some(),
            self.o.is_some(),
            self.g.is_some(),
        );

        let mut best = IndexOrder::Spo;
        let mut best_len = IndexOrder::Spo.bound_prefix(s, p, o, g);
        let mut best_estimate = usize::MAX;
        for order in CANDIDATES {
            let len = order.bound_prefix(s, p, o, g);
            if len < best_len {
                continue;
            }
            let prefix = self.prefix_for(order, len);
            let estimate = indexes.tree(order).estimate_prefix(&prefix, 64);
            if len > best_len || estimate < best_estimate {
                best = order;
                best_len = len;
                best_estimate = estimate;
            }
        }
        (best, self.prefix_for(best, best_len))
    }

    fn prefix_for(&self, order: IndexOrder, len: usize) -> SmallVec<[u64; 4]> {
        let positions: [Option<AtomId>; 4] = match order {
            IndexOrder::Spo => [self.s, self.p, self.o, self.g],
            IndexOrder::Pos => [self.p, self.o, self.s, self.g],
            IndexOrder::Osp => [self.o, self.s, self.p, self.g],
            IndexOrder::Gspo => [self.g, self.s, self.p, self.o],
            IndexOrder::Tspo => [None, None, None, None],
        };
        positions
            .into_iter()
            .take(len)
            .map_while(|v| v)
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// Read guard
// ------------------------------------------------------------------------------------------------

/// A pinned snapshot of the store.
///
/// Acquired via [`super::QuadStore::read`]. While alive, writers are
/// excluded, so everything reachable through the guard is immutable.
pub struct ReadGuard<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
    snapshot_time: Timestamp,
}

impl<'a> ReadGuard<'a> {
    pub(super) fn new(inner: RwLockReadGuard<'a, StoreInner>) -> Self {
        // Never behind the commit clock: a burst of commits inside one
        // microsecond pushes tx stamps ahead of the wall clock, and a
        // snapshot taken in that same microsecond must still see them.
        let snapshot_time = model::now_micros().max(inner.last_tx_time());
        Self {
            inner,
            snapshot_time,
        }
    }

    pub(super) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    /// The instant this snapshot was pinned — the "now" of every
    /// temporal query made through this guard.
    pub fn snapshot_time(&self) -> Timestamp {
        self.snapshot_time
    }

    /// The atom store, for id resolution.
    pub fn atoms(&self) -> &AtomStore {
        &self.inner.atoms
    }

    /// The index set, for direct cursor access (the executor's scans).
    pub fn indexes(&self) -> &IndexSet {
        &self.inner.indexes
    }

    /// Resolves an atom id to its canonical term bytes.
    pub fn resolve(&self, id: AtomId) -> Result<&[u8], StoreError> {
        Ok(self.inner.atoms.resolve(id)?)
    }

    /// Resolves an atom id to its canonical term text.
    pub fn resolve_str(&self, id: AtomId) -> Result<&str, StoreError> {
        Ok(self.inner.atoms.resolve_str(id)?)
    }

    /// Looks up the id of an already-interned term.
    pub fn lookup(&self, term: &[u8]) -> Option<AtomId> {
        self.inner.atoms.lookup(term)
    }

    // --------------------------------------------------------------------------------------------
    // Temporal queries
    // --------------------------------------------------------------------------------------------

    /// Quads current at the snapshot instant: both intervals contain
    /// "now".
    pub fn query_current(&self, pattern: Pattern) -> impl Iterator<Item = VersionedQuad> + '_ {
        let now = self.snapshot_time;
        self.query_all_versions(pattern)
            .filter(move |q| q.visible_at(now, now))
    }

    /// Quads as of instant `t`: the valid interval contains `t`, among
    /// rows still on the books at the snapshot instant.
    ///
    /// Valid-time travel over current belief — a version whose
    /// transaction interval was closed by a retraction no longer
    /// answers, even for a `t` it once covered; its correction row
    /// does.
    pub fn query_as_of(
        &self,
        t: Timestamp,
        pattern: Pattern,
    ) -> impl Iterator<Item = VersionedQuad> + '_ {
        let now = self.snapshot_time;
        self.query_all_versions(pattern)
            .filter(move |q| q.visible_at(t, now))
    }

    /// Quads whose valid interval overlaps `[from, until)` among rows
    /// still on the books at the snapshot instant.
    pub fn query_during(
        &self,
        from: Timestamp,
        until: Timestamp,
        pattern: Pattern,
    ) -> impl Iterator<Item = VersionedQuad> + '_ {
        let now = self.snapshot_time;
        self.query_all_versions(pattern)
            .filter(move |q| q.valid_overlaps(from, until) && q.tx_from <= now && now < q.tx_to)
    }

    /// Every stored version of matching quads. Within one quad the
    /// versions come back oldest-first (keys order by `tx_from`).
    pub fn query_all_versions(&self, pattern: Pattern) -> VersionScan<'_> {
        let (order, prefix) = pattern.choose_index(&self.inner.indexes);
        let cursor = self.inner.indexes.tree(order).seek(&prefix);
        VersionScan {
            cursor,
            order,
            prefix,
            pattern,
        }
    }

    /// The distinct named graphs (g ≠ default) present in any version.
    pub fn named_graphs(&self) -> Vec<AtomId> {
        let tree = self.inner.indexes.tree(IndexOrder::Gspo);
        let mut graphs = Vec::new();
        let mut cursor = tree.seek(&[1]);
        while let Some((key, _)) = cursor.peek() {
            let g = key[0];
            graphs.push(g);
            let Some(next) = g.checked_add(1) else { break };
            cursor = tree.seek(&[next]);
        }
        graphs
    }
}

// ------------------------------------------------------------------------------------------------
// Version scan
// ------------------------------------------------------------------------------------------------

/// A pattern scan over the chosen index: one cursor seek plus a
/// sequential walk, ending when the bound prefix diverges.
pub struct VersionScan<'a> {
    cursor: Cursor<'a>,
    order: IndexOrder,
    prefix: SmallVec<[u64; 4]>,
    pattern: Pattern,
}

impl Iterator for VersionScan<'_> {
    type Item = VersionedQuad;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, meta)) = self.cursor.next() {
            if key[..self.prefix.len()] != self.prefix[..] {
                return None;
            }
            let (ids, tx_from, valid_from) = self.order.decompose(&key);
            if !self.pattern.matches(ids) {
                continue;
            }
            return Some(VersionedQuad {
                ids,
                valid_from,
                valid_to: meta.valid_to,
                tx_from,
                tx_to: meta.tx_to,
            });
        }
        None
    }
}
