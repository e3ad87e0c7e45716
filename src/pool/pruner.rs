//! Pruner — compacting copy with history modes and filters.
//!
//! Retraction never deletes bytes, so a long-lived store accumulates
//! closed version rows and orphaned atoms. The pruner reclaims both by
//! **rebuilding**: it reads every version from a source store under one
//! read guard, keeps what the history mode and filters allow, and
//! writes the survivors into a scratch store through batches. Because
//! the scratch store interns only the terms its rows reference, orphan
//! atoms vanish as a side effect.
//!
//! The operation is externally transactional:
//!
//! 1. copy into the scratch role (failure: abort, source untouched);
//! 2. one atomic [`StorePool::switch`] of the two roles;
//! 3. clear the now-unused replica.
//!
//! Readers that were on the old store stay on their snapshot until they
//! release it.
//!
//! # History modes
//!
//! - [`HistoryMode::FlattenToCurrent`] — keep only rows current at the
//!   prune instant; `query_current` is preserved pointwise.
//! - [`HistoryMode::PreserveVersions`] — keep every row still on the
//!   books (distinct valid-time versions), drop rows closed in
//!   transaction time.
//! - [`HistoryMode::PreserveAll`] — verbatim copy; every historical
//!   query is preserved pointwise.

use thiserror::Error;
use tracing::info;

use crate::model::{TIME_MAX, VersionedQuad};
use crate::store::{Pattern, QuadStore, ReadGuard, StoreError};

use super::{PoolError, StorePool};

/// Batch size for writes into the target store.
const COPY_BATCH: usize = 4_096;

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// How much history survives a prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Drop retracted and superseded versions; keep the current world.
    FlattenToCurrent,
    /// Keep distinct valid-time versions, drop retracted rows.
    PreserveVersions,
    /// Copy every version row verbatim.
    PreserveAll,
}

/// A composable predicate over candidate rows.
///
/// Filters see the source guard so they can resolve atom ids to term
/// bytes. Returning `false` drops the row.
pub trait QuadFilter: Send + Sync {
    /// Whether `version` should survive the prune.
    fn keep(&self, guard: &ReadGuard<'_>, version: &VersionedQuad) -> bool;
}

/// Keeps (or drops) rows by graph term.
pub struct GraphFilter {
    graphs: Vec<Vec<u8>>,
    include: bool,
}

impl GraphFilter {
    /// Keep only rows in the listed graphs. The default graph is
    /// selected with the empty byte string.
    pub fn include(graphs: Vec<Vec<u8>>) -> Self {
        Self {
            graphs,
            include: true,
        }
    }

    /// Drop rows in the listed graphs.
    pub fn exclude(graphs: Vec<Vec<u8>>) -> Self {
        Self {
            graphs,
            include: false,
        }
    }

    fn matches(&self, guard: &ReadGuard<'_>, version: &VersionedQuad) -> bool {
        let term: &[u8] = if version.ids.g == 0 {
            b""
        } else {
            guard.resolve(version.ids.g).unwrap_or(b"")
        };
        self.graphs.iter().any(|g| g.as_slice() == term)
    }
}

impl QuadFilter for GraphFilter {
    fn keep(&self, guard: &ReadGuard<'_>, version: &VersionedQuad) -> bool {
        self.matches(guard, version) == self.include
    }
}

/// Keeps (or drops) rows by predicate term.
pub struct PredicateFilter {
    predicates: Vec<Vec<u8>>,
    include: bool,
}

impl PredicateFilter {
    /// Keep only rows whose predicate is listed.
    pub fn include(predicates: Vec<Vec<u8>>) -> Self {
        Self {
            predicates,
            include: true,
        }
    }

    /// Drop rows whose predicate is listed.
    pub fn exclude(predicates: Vec<Vec<u8>>) -> Self {
        Self {
            predicates,
            include: false,
        }
    }
}

impl QuadFilter for PredicateFilter {
    fn keep(&self, guard: &ReadGuard<'_>, version: &VersionedQuad) -> bool {
        let term = guard.resolve(version.ids.p).unwrap_or(b"");
        self.predicates.iter().any(|p| p.as_slice() == term) == self.include
    }
}

/// Options for one prune run.
pub struct PruneOptions {
    /// How much history to keep.
    pub mode: HistoryMode,
    /// Row predicates, all of which must pass.
    pub filters: Vec<Box<dyn QuadFilter>>,
    /// Compute the report without writing or switching.
    pub dry_run: bool,
}

impl PruneOptions {
    /// Flatten with no filters.
    pub fn flatten() -> Self {
        Self {
            mode: HistoryMode::FlattenToCurrent,
            filters: Vec::new(),
            dry_run: false,
        }
    }

    /// Verbatim copy with no filters.
    pub fn preserve_all() -> Self {
        Self {
            mode: HistoryMode::PreserveAll,
            filters: Vec::new(),
            dry_run: false,
        }
    }
}

/// What a prune run did (or, for a dry run, would do).
#[derive(Debug, Clone, Copy)]
pub struct PruneReport {
    /// Version rows examined in the source.
    pub versions_scanned: u64,
    /// Version rows written to (or counted for) the target.
    pub versions_kept: u64,
    /// Atom bytes in the source store.
    pub source_atom_bytes: u64,
    /// Atom bytes in the target after the copy (0 for dry runs).
    pub target_atom_bytes: u64,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors returned by prune runs.
#[derive(Debug, Error)]
pub enum PruneError {
    /// Error from the pool (role lookup, switch, clear).
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Error from either store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ------------------------------------------------------------------------------------------------
// Pruner
// ------------------------------------------------------------------------------------------------

/// Rebuilds stores with less history and no orphans.
pub struct Pruner;

impl Pruner {
    /// Prunes the store behind `role` inside `pool`.
    ///
    /// The compacted copy is built in the scratch role `<role>-pruning`;
    /// on success the two roles are switched and the replica cleared.
    /// A dry run only scans and reports.
    pub fn prune_role(
        pool: &StorePool,
        role: &str,
        options: &PruneOptions,
    ) -> Result<PruneReport, PruneError> {
        let source = pool.get(role)?;

        if options.dry_run {
            return Ok(Self::scan_only(&source, options)?);
        }

        let scratch_role = format!("{role}-pruning");
        if pool.contains(&scratch_role) {
            pool.clear(&scratch_role)?;
        }
        let target = pool.get(&scratch_role)?;

        let report = Self::copy(&source, &target, options)?;

        // Commit: one atomic role swap, then drop the old data.
        pool.switch(role, &scratch_role)?;
        pool.clear(&scratch_role)?;
        info!(
            role,
            scanned = report.versions_scanned,
            kept = report.versions_kept,
            "prune complete"
        );
        Ok(report)
    }

    /// Copies `source` into `target` per the options. Both stores are
    /// used directly; no switching happens. Exposed for callers that
    /// manage their own store lifecycle.
    pub fn copy(
        source: &QuadStore,
        target: &QuadStore,
        options: &PruneOptions,
    ) -> Result<PruneReport, PruneError> {
        let guard = source.read()?;
        let now = guard.snapshot_time();
        let mut scanned = 0u64;
        let mut kept = 0u64;

        let mut batch = target.begin_batch()?;
        let mut in_batch = 0usize;
        for version in guard.query_all_versions(Pattern::any()) {
            scanned += 1;
            if !Self::survives(&guard, &version, options, now) {
                continue;
            }
            kept += 1;

            let s = guard.resolve(version.ids.s)?;
            let p = guard.resolve(version.ids.p)?;
            let o = guard.resolve(version.ids.o)?;
            let g = if version.ids.g == 0 {
                None
            } else {
                Some(guard.resolve(version.ids.g)?)
            };

            match options.mode {
                // Flattened rows restart transaction time; their valid
                // interval is preserved.
                HistoryMode::FlattenToCurrent => {
                    batch.add_with_validity(s, p, o, g, version.valid_from, version.valid_to)?;
                }
                HistoryMode::PreserveVersions => {
                    batch.add_with_validity(s, p, o, g, version.valid_from, version.valid_to)?;
                }
                HistoryMode::PreserveAll => {
                    batch.copy_version(s, p, o, g, &version)?;
                }
            }

            in_batch += 1;
            if in_batch >= COPY_BATCH {
                batch.commit()?;
                batch = target.begin_batch()?;
                in_batch = 0;
            }
        }
        batch.commit()?;
        target.checkpoint()?;

        Ok(PruneReport {
            versions_scanned: scanned,
            versions_kept: kept,
            source_atom_bytes: guard.atoms().bytes_len(),
            target_atom_bytes: target.read()?.atoms().bytes_len(),
            dry_run: false,
        })
    }

    fn scan_only(source: &QuadStore, options: &PruneOptions) -> Result<PruneReport, StoreError> {
        let guard = source.read()?;
        let now = guard.snapshot_time();
        let mut scanned = 0u64;
        let mut kept = 0u64;
        for version in guard.query_all_versions(Pattern::any()) {
            scanned += 1;
            if Self::survives(&guard, &version, options, now) {
                kept += 1;
            }
        }
        Ok(PruneReport {
            versions_scanned: scanned,
            versions_kept: kept,
            source_atom_bytes: guard.atoms().bytes_len(),
            target_atom_bytes: 0,
            dry_run: true,
        })
    }

    fn survives(
        guard: &ReadGuard<'_>,
        version: &VersionedQuad,
        options: &PruneOptions,
        now: u64,
    ) -> bool {
        let mode_keeps = match options.mode {
            HistoryMode::FlattenToCurrent => version.visible_at(now, now),
            HistoryMode::PreserveVersions => version.tx_to == TIME_MAX,
            HistoryMode::PreserveAll => true,
        };
        mode_keeps && options.filters.iter().all(|f| f.keep(guard, version))
    }
}
