//! Quad store — the bitemporal facade over atoms, indexes, and the WAL.
//!
//! ## Design Overview
//!
//! A [`QuadStore`] owns one directory:
//!
//! ```text
//! store/
//!   atoms/            append-only atom segments
//!   indices/          spo.btree  pos.btree  osp.btree  gspo.btree  tspo.btree
//!   wal/              000000001.wal …
//!   meta.json         { format_version, created_at, last_tx_id, last_checkpoint }
//!   LOCK              exclusive-writer marker (hostname + pid)
//! ```
//!
//! Writes go WAL-first: terms are interned and fsynced, the framed
//! transaction is appended and fsynced, and only then are the five
//! B+Trees updated — the fsync is the commit point. On open, the index
//! images are loaded and the WAL tail is replayed over them; replay is
//! idempotent because every leaf page tracks the newest transaction it
//! has applied.
//!
//! ## Bitemporal model
//!
//! Every version row carries `[valid_from, valid_to)` (when the fact
//! holds in the world) and `[tx_from, tx_to)` (when the store believed
//! it). A retraction closes the old row's transaction interval and, by
//! default, records a **correction row** whose valid interval ends at
//! the retraction instant — so "what did we believe on Tuesday?" and
//! "when was this fact true?" remain independently answerable.
//!
//! ## Concurrency Model
//!
//! All store state sits behind a single `Arc<RwLock<StoreInner>>`.
//! Readers take the read lock through [`QuadStore::read`]; the returned
//! guard pins a snapshot instant, and every borrow it hands out (atom
//! bytes, cursors) is bounded by the guard's lifetime. Writers take the
//! write lock per operation; a [`Batch`] holds it from `begin_batch`
//! until commit or rollback.
//!
//! ## Guarantees
//!
//! - **Durability**: a commit is acknowledged only after the WAL fsync.
//! - **Batch atomicity**: a batch is one WAL frame; a crash mid-write
//!   leaves a torn frame that recovery truncates, so no partial batch
//!   is ever visible. Rollback buffers nothing to disk at all.
//! - **Snapshot isolation**: readers see exactly the transactions that
//!   committed before their guard was acquired.

mod guard;

#[cfg(test)]
mod tests;

pub use guard::{Pattern, ReadGuard, VersionScan};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::atom::{AtomError, AtomStore};
use crate::index::{IndexError, IndexOrder, IndexSet, VersionMeta};
use crate::model::{self, QuadIds, TIME_MAX, Timestamp, TxId, VersionedQuad};
use crate::wal::{TxOp, TxRecord, Wal, WalError};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const ATOM_DIR: &str = "atoms";
const INDEX_DIR: &str = "indices";
const WAL_DIR: &str = "wal";
const META_FILE: &str = "meta.json";
const LOCK_FILE: &str = "LOCK";

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by quad store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error originating from the atom store.
    #[error("Atom error: {0}")]
    Atom(#[from] AtomError),

    /// Error originating from the index store.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Error originating from the WAL.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The metadata sidecar could not be read or written.
    #[error("Metadata error: {0}")]
    Meta(#[from] serde_json::Error),

    /// Another process holds the exclusive-writer lock.
    #[error("store is locked by {holder} ({path})")]
    Locked {
        /// Contents of the LOCK file (hostname + pid).
        holder: String,
        /// Path of the LOCK file.
        path: PathBuf,
    },

    /// The store directory was written by a newer format version.
    #[error("store format version {found} is newer than supported {supported}; open read-only")]
    NewerFormat {
        /// Version found on disk.
        found: u32,
        /// Newest version this build understands.
        supported: u32,
    },

    /// A write was attempted on a read-only store.
    #[error("store is read-only")]
    ReadOnly,

    /// Checkpointing failed after retries; the store degraded to
    /// read-only.
    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),

    /// A term violated a quad position invariant.
    #[error("invalid term for {position}: {reason}")]
    InvalidTerm {
        /// Which quad position was violated.
        position: &'static str,
        /// What was wrong.
        reason: String,
    },

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration & metadata
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`QuadStore`] instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Open without the writer lock; every mutating call fails with
    /// [`StoreError::ReadOnly`].
    pub read_only: bool,

    /// Checkpoint automatically once the active WAL grows past this many
    /// bytes. `0` disables automatic checkpoints.
    pub checkpoint_wal_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            checkpoint_wal_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    format_version: u32,
    created_at: Timestamp,
    last_tx_id: TxId,
    last_checkpoint: TxId,
}

/// Snapshot of store-level statistics.
#[derive(Debug, Clone, Copy)]
pub struct StoreStatistics {
    /// Quads current right now (both intervals contain the call time).
    pub quads: u64,
    /// Version rows across all time.
    pub versions: u64,
    /// Interned atoms.
    pub atoms: u64,
    /// Bytes held by atom segments.
    pub atom_bytes: u64,
}

/// Snapshot of WAL-level statistics.
#[derive(Debug, Clone, Copy)]
pub struct WalStatistics {
    /// Highest committed transaction id.
    pub last_tx_id: TxId,
    /// Transaction id of the last checkpoint.
    pub checkpoint_tx_id: TxId,
    /// Bytes in the active WAL file.
    pub wal_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Inner state
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct StoreInner {
    dir: PathBuf,
    pub(crate) atoms: AtomStore,
    pub(crate) indexes: IndexSet,
    wal: Wal,
    meta: StoreMeta,
    read_only: bool,
    config: StoreConfig,
    /// Strictly monotonic commit clock: `max(now, previous + 1)`.
    last_tx_time: Timestamp,
    holds_lock_file: bool,
}

impl StoreInner {
    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub(super) fn last_tx_time(&self) -> Timestamp {
        self.last_tx_time
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if self.holds_lock_file {
            let _ = fs::remove_file(self.lock_path());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Quad store
// ------------------------------------------------------------------------------------------------

/// The bitemporal quad store handle.
///
/// Thread-safe — clone freely; clones share the same underlying store.
#[derive(Debug)]
pub struct QuadStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl Clone for QuadStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl QuadStore {
    /// Opens (or creates) a store rooted at `path`.
    ///
    /// On an existing directory the metadata is validated, the writer
    /// lock is taken (unless read-only), the index images are loaded,
    /// and the WAL tail is replayed over them.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // 1. Metadata: read, or create for a fresh directory.
        let meta_path = dir.join(META_FILE);
        let meta = if meta_path.is_file() {
            let bytes = fs::read(&meta_path)?;
            serde_json::from_slice::<StoreMeta>(&bytes)?
        } else {
            let meta = StoreMeta {
                format_version: FORMAT_VERSION,
                created_at: model::now_micros(),
                last_tx_id: 0,
                last_checkpoint: 0,
            };
            fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;
            meta
        };

        // 2. Format gate: a newer layout may be read, never written.
        let read_only = config.read_only;
        if meta.format_version > FORMAT_VERSION {
            if !read_only {
                return Err(StoreError::NewerFormat {
                    found: meta.format_version,
                    supported: FORMAT_VERSION,
                });
            }
            warn!(
                found = meta.format_version,
                supported = FORMAT_VERSION,
                "opening newer-format store read-only"
            );
        }

        // 3. Exclusive-writer lock.
        let mut holds_lock_file = false;
        if !read_only {
            let lock_path = dir.join(LOCK_FILE);
            let holder = format!(
                "{}:{}",
                std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into()),
                std::process::id()
            );
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut f) => {
                    use std::io::Write;
                    f.write_all(holder.as_bytes())?;
                    holds_lock_file = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(&lock_path).unwrap_or_default();
                    return Err(StoreError::Locked {
                        holder,
                        path: lock_path,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        // 4. Atom segments.
        let atoms = AtomStore::open(dir.join(ATOM_DIR))?;

        // 5. Index images; corruption here is critical.
        let indexes = match IndexSet::load(dir.join(INDEX_DIR)) {
            Ok(set) => set,
            Err(e) => {
                error!(error = %e, "index images corrupted; store cannot serve");
                if holds_lock_file {
                    let _ = fs::remove_file(dir.join(LOCK_FILE));
                }
                return Err(e.into());
            }
        };

        // 6. WAL replay over the images (idempotent per leaf page).
        let (wal, records) = Wal::open(dir.join(WAL_DIR))?;
        let mut inner = StoreInner {
            dir,
            atoms,
            indexes,
            wal,
            meta,
            read_only,
            config,
            last_tx_time: 0,
            holds_lock_file,
        };
        let replayed = records.len();
        for record in &records {
            Self::apply_record(&mut inner.indexes, record);
            inner.meta.last_tx_id = inner.meta.last_tx_id.max(record.tx_id);
            inner.last_tx_time = inner.last_tx_time.max(record.tx_time);
        }
        inner.wal.ensure_tx_after(inner.meta.last_tx_id);

        info!(
            versions = inner.indexes.version_count(),
            atoms = inner.atoms.len(),
            replayed,
            last_tx = inner.meta.last_tx_id,
            read_only = inner.read_only,
            "quad store opened"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    /// Gracefully shuts down: checkpoint, fsync, release the lock file.
    ///
    /// Safe to call more than once; later calls are no-ops for the lock.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;
        if !inner.read_only {
            Self::checkpoint_inner(&mut inner)?;
        }
        if inner.holds_lock_file {
            let path = inner.lock_path();
            fs::remove_file(&path)?;
            inner.holds_lock_file = false;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Pins a snapshot and returns a read guard.
    ///
    /// Every borrow the guard hands out — atom bytes, cursors, scans —
    /// is valid only while the guard lives.
    pub fn read(&self) -> Result<ReadGuard<'_>, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))?;
        Ok(ReadGuard::new(inner))
    }

    /// Store-level statistics (quad, version, atom, and byte counts).
    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let guard = self.read()?;
        Ok(StoreStatistics {
            quads: guard.query_current(Pattern::any()).count() as u64,
            versions: guard.inner().indexes.version_count(),
            atoms: guard.inner().atoms.len(),
            atom_bytes: guard.inner().atoms.bytes_len(),
        })
    }

    /// WAL-level statistics (transaction ids and log size).
    pub fn wal_statistics(&self) -> Result<WalStatistics, StoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))?;
        let stats = inner.wal.stats();
        Ok(WalStatistics {
            last_tx_id: stats.last_tx,
            checkpoint_tx_id: inner.meta.last_checkpoint.max(stats.checkpoint_tx),
            wal_bytes: stats.wal_bytes,
        })
    }

    /// True if the store refuses writes.
    pub fn is_read_only(&self) -> bool {
        self.inner.read().map(|i| i.read_only).unwrap_or(true)
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    /// Adds a quad valid from now, open-ended, to the given graph
    /// (`None` = default graph). Terms are canonical serialized bytes.
    pub fn add(
        &self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
    ) -> Result<TxId, StoreError> {
        let mut batch = self.begin_batch()?;
        batch.add(s, p, o, g)?;
        batch.commit()
    }

    /// Adds a quad with an explicit valid interval.
    pub fn add_with_validity(
        &self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<TxId, StoreError> {
        let mut batch = self.begin_batch()?;
        batch.add_with_validity(s, p, o, g, valid_from, valid_to)?;
        batch.commit()
    }

    /// Retracts the matching current quad as of now. Returns the commit
    /// transaction id (rows closed may be zero).
    pub fn retract(
        &self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
    ) -> Result<TxId, StoreError> {
        let mut batch = self.begin_batch()?;
        batch.retract(s, p, o, g)?;
        batch.commit()
    }

    /// Retracts the matching current quad at an explicit instant.
    pub fn retract_at(
        &self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
        at: Timestamp,
    ) -> Result<TxId, StoreError> {
        let mut batch = self.begin_batch()?;
        batch.retract_at(s, p, o, g, at)?;
        batch.commit()
    }

    /// Takes the write lock and opens a batch.
    ///
    /// All operations are buffered in memory; nothing touches disk until
    /// [`Batch::commit`], which writes one WAL frame and one fsync for
    /// the whole batch. Dropping the batch (or calling
    /// [`Batch::rollback`]) leaves the store byte-identical to before.
    pub fn begin_batch(&self) -> Result<Batch<'_>, StoreError> {
        let inner = self.write_inner()?;
        if inner.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(Batch {
            guard: Some(inner),
            pending: Vec::new(),
        })
    }

    /// Flushes dirty state to the index images, persists metadata, and
    /// rotates the WAL. Retries transient failures with backoff; if all
    /// attempts fail the store degrades to read-only.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;
        if inner.read_only {
            return Err(StoreError::ReadOnly);
        }
        Self::checkpoint_inner(&mut inner)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, StoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Internal("RwLock poisoned".into()))
    }

    /// Applies a committed (or replayed) transaction to the trees.
    fn apply_record(indexes: &mut IndexSet, record: &TxRecord) {
        for op in &record.ops {
            match op {
                TxOp::Add {
                    ids,
                    valid_from,
                    valid_to,
                } => {
                    indexes.insert_version(
                        &VersionedQuad {
                            ids: *ids,
                            valid_from: *valid_from,
                            valid_to: *valid_to,
                            tx_from: record.tx_time,
                            tx_to: TIME_MAX,
                        },
                        record.tx_id,
                    );
                }
                TxOp::Retract {
                    ids,
                    version_tx_from,
                    version_valid_from,
                    corrected_valid_to,
                } => {
                    // Close the old row's transaction interval, keeping
                    // its valid interval as recorded.
                    let spo_key = IndexOrder::Spo.key(*ids, *version_tx_from, *version_valid_from);
                    let old_valid_to = indexes
                        .tree(IndexOrder::Spo)
                        .get(&spo_key)
                        .map(|m| m.valid_to)
                        .unwrap_or(TIME_MAX);
                    indexes.update_version(
                        *ids,
                        *version_tx_from,
                        *version_valid_from,
                        VersionMeta {
                            valid_to: old_valid_to,
                            tx_to: record.tx_time,
                        },
                        record.tx_id,
                    );

                    // Correction row: the world as understood from this
                    // transaction onwards.
                    if let Some(valid_to) = corrected_valid_to {
                        indexes.insert_version(
                            &VersionedQuad {
                                ids: *ids,
                                valid_from: *version_valid_from,
                                valid_to: *valid_to,
                                tx_from: record.tx_time,
                                tx_to: TIME_MAX,
                            },
                            record.tx_id,
                        );
                    }
                }
                TxOp::CopyVersion {
                    ids,
                    valid_from,
                    valid_to,
                    tx_from,
                    tx_to,
                } => {
                    indexes.insert_version(
                        &VersionedQuad {
                            ids: *ids,
                            valid_from: *valid_from,
                            valid_to: *valid_to,
                            tx_from: *tx_from,
                            tx_to: *tx_to,
                        },
                        record.tx_id,
                    );
                }
            }
        }
    }

    fn checkpoint_inner(inner: &mut StoreInner) -> Result<(), StoreError> {
        let up_to = inner.wal.stats().last_tx;
        let index_dir = inner.dir.join(INDEX_DIR);

        let mut delay = Duration::from_millis(10);
        let mut last_err = String::new();
        for attempt in 0..3 {
            let result = inner
                .atoms
                .sync()
                .map_err(StoreError::from)
                .and_then(|_| inner.indexes.checkpoint(&index_dir).map_err(StoreError::from));
            match result {
                Ok(()) => {
                    inner.meta.last_checkpoint = up_to;
                    inner.meta.last_tx_id = up_to;
                    fs::write(
                        inner.dir.join(META_FILE),
                        serde_json::to_vec_pretty(&inner.meta)?,
                    )?;
                    inner.wal.checkpoint(up_to)?;
                    debug!(up_to, "checkpoint complete");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "checkpoint attempt failed, backing off");
                    last_err = e.to_string();
                    std::thread::sleep(delay);
                    delay *= 5;
                }
            }
        }

        error!(error = %last_err, "checkpoint failed after retries; degrading to read-only");
        inner.read_only = true;
        Err(StoreError::CheckpointFailed(last_err))
    }
}

// ------------------------------------------------------------------------------------------------
// Batch
// ------------------------------------------------------------------------------------------------

/// A buffered operation awaiting commit.
enum PendingOp {
    Add {
        s: Vec<u8>,
        p: Vec<u8>,
        o: Vec<u8>,
        g: Option<Vec<u8>>,
        valid_from: Option<Timestamp>,
        valid_to: Timestamp,
    },
    Retract {
        s: Vec<u8>,
        p: Vec<u8>,
        o: Vec<u8>,
        g: Option<Vec<u8>>,
        at: Option<Timestamp>,
    },
    CopyVersion {
        s: Vec<u8>,
        p: Vec<u8>,
        o: Vec<u8>,
        g: Option<Vec<u8>>,
        valid_from: Timestamp,
        valid_to: Timestamp,
        tx_from: Timestamp,
        tx_to: Timestamp,
    },
}

/// An exclusive write batch.
///
/// Holds the store's write lock for its whole lifetime. Operations are
/// buffered; `commit` writes them as a single WAL frame (one fsync).
/// Dropping without commit is a rollback and leaves no trace on disk.
pub struct Batch<'a> {
    guard: Option<RwLockWriteGuard<'a, StoreInner>>,
    pending: Vec<PendingOp>,
}

impl<'a> Batch<'a> {
    /// Buffers an add of a quad valid from commit time, open-ended.
    pub fn add(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        Self::check_positions(s, p, o, g)?;
        self.pending.push(PendingOp::Add {
            s: s.to_vec(),
            p: p.to_vec(),
            o: o.to_vec(),
            g: g.map(<[u8]>::to_vec),
            valid_from: None,
            valid_to: TIME_MAX,
        });
        Ok(())
    }

    /// Buffers an add with an explicit valid interval.
    pub fn add_with_validity(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Result<(), StoreError> {
        Self::check_positions(s, p, o, g)?;
        self.pending.push(PendingOp::Add {
            s: s.to_vec(),
            p: p.to_vec(),
            o: o.to_vec(),
            g: g.map(<[u8]>::to_vec),
            valid_from: Some(valid_from),
            valid_to,
        });
        Ok(())
    }

    /// Buffers a retraction of matching current rows as of commit time.
    pub fn retract(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        self.pending.push(PendingOp::Retract {
            s: s.to_vec(),
            p: p.to_vec(),
            o: o.to_vec(),
            g: g.map(<[u8]>::to_vec),
            at: None,
        });
        Ok(())
    }

    /// Buffers a retraction at an explicit instant.
    pub fn retract_at(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
        at: Timestamp,
    ) -> Result<(), StoreError> {
        self.pending.push(PendingOp::Retract {
            s: s.to_vec(),
            p: p.to_vec(),
            o: o.to_vec(),
            g: g.map(<[u8]>::to_vec),
            at: Some(at),
        });
        Ok(())
    }

    /// Buffers a verbatim version copy, transaction interval included.
    ///
    /// The pruner's `PreserveAll` path uses this to rebuild a store
    /// whose history must survive the copy untouched.
    pub fn copy_version(
        &mut self,
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
        version: &crate::model::VersionedQuad,
    ) -> Result<(), StoreError> {
        Self::check_positions(s, p, o, g)?;
        self.pending.push(PendingOp::CopyVersion {
            s: s.to_vec(),
            p: p.to_vec(),
            o: o.to_vec(),
            g: g.map(<[u8]>::to_vec),
            valid_from: version.valid_from,
            valid_to: version.valid_to,
            tx_from: version.tx_from,
            tx_to: version.tx_to,
        });
        Ok(())
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Commits the batch: intern terms, append one WAL frame, fsync,
    /// apply to the trees. Returns the transaction id.
    pub fn commit(mut self) -> Result<TxId, StoreError> {
        let mut inner = self
            .guard
            .take()
            .ok_or_else(|| StoreError::Internal("batch already finished".into()))?;

        let tx_id = inner.wal.begin_tx();
        let tx_time = model::now_micros().max(inner.last_tx_time + 1);
        inner.last_tx_time = tx_time;

        let pending = std::mem::take(&mut self.pending);
        let mut ops = Vec::with_capacity(pending.len());
        for op in pending {
            match op {
                PendingOp::Add {
                    s,
                    p,
                    o,
                    g,
                    valid_from,
                    valid_to,
                } => {
                    let ids = QuadIds {
                        s: inner.atoms.intern(&s)?,
                        p: inner.atoms.intern(&p)?,
                        o: inner.atoms.intern(&o)?,
                        g: match g {
                            Some(g) => inner.atoms.intern(&g)?,
                            None => model::DEFAULT_GRAPH,
                        },
                    };
                    ops.push(TxOp::Add {
                        ids,
                        valid_from: valid_from.unwrap_or(tx_time),
                        valid_to,
                    });
                }
                PendingOp::Retract { s, p, o, g, at } => {
                    let at = at.unwrap_or(tx_time);
                    // Terms never interned cannot match any stored row.
                    let (Some(s), Some(p), Some(o)) = (
                        inner.atoms.lookup(&s),
                        inner.atoms.lookup(&p),
                        inner.atoms.lookup(&o),
                    ) else {
                        continue;
                    };
                    let g = match g {
                        Some(g) => match inner.atoms.lookup(&g) {
                            Some(id) => id,
                            None => continue,
                        },
                        None => model::DEFAULT_GRAPH,
                    };
                    let ids = QuadIds { s, p, o, g };

                    // Close every live row for this quad whose valid
                    // interval contains `at`.
                    let prefix = [ids.s, ids.p, ids.o, ids.g];
                    let mut cursor = inner.indexes.tree(IndexOrder::Spo).seek(&prefix);
                    while let Some((key, meta)) = cursor.next() {
                        if key[..4] != prefix {
                            break;
                        }
                        let (_, tx_from, valid_from) = IndexOrder::Spo.decompose(&key);
                        if meta.tx_to != TIME_MAX {
                            continue; // already off the books
                        }
                        if !(valid_from <= at && at < meta.valid_to) {
                            continue;
                        }
                        ops.push(TxOp::Retract {
                            ids,
                            version_tx_from: tx_from,
                            version_valid_from: valid_from,
                            corrected_valid_to: Some(at),
                        });
                    }
                }
                PendingOp::CopyVersion {
                    s,
                    p,
                    o,
                    g,
                    valid_from,
                    valid_to,
                    tx_from,
                    tx_to,
                } => {
                    let ids = QuadIds {
                        s: inner.atoms.intern(&s)?,
                        p: inner.atoms.intern(&p)?,
                        o: inner.atoms.intern(&o)?,
                        g: match g {
                            Some(g) => inner.atoms.intern(&g)?,
                            None => model::DEFAULT_GRAPH,
                        },
                    };
                    ops.push(TxOp::CopyVersion {
                        ids,
                        valid_from,
                        valid_to,
                        tx_from,
                        tx_to,
                    });
                }
            }
        }

        // Durability order: atom segments, then the WAL frame. The
        // frame's fsync is the commit point.
        inner.atoms.sync()?;
        let record = TxRecord { tx_id, tx_time, ops };
        inner.wal.append(&record)?;
        QuadStore::apply_record(&mut inner.indexes, &record);
        inner.meta.last_tx_id = tx_id;

        let auto = inner.config.checkpoint_wal_bytes;
        if auto > 0
            && inner.wal.stats().wal_bytes > auto
            && let Err(e) = QuadStore::checkpoint_inner(&mut inner)
        {
            // The commit itself is durable in the WAL; only the rotation
            // failed, and checkpoint_inner has already degraded the
            // store to read-only.
            warn!(error = %e, "automatic checkpoint failed after commit");
        }
        Ok(tx_id)
    }

    /// Discards the batch. Nothing was written, so nothing is undone.
    pub fn rollback(mut self) {
        self.pending.clear();
        self.guard.take();
    }

    fn check_positions(
        s: &[u8],
        p: &[u8],
        o: &[u8],
        g: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        use crate::model::TermKind;
        match TermKind::of(s) {
            Some(TermKind::Iri | TermKind::Blank) => {}
            _ => {
                return Err(StoreError::InvalidTerm {
                    position: "subject",
                    reason: "must be an IRI or blank node".into(),
                });
            }
        }
        if TermKind::of(p) != Some(TermKind::Iri) {
            return Err(StoreError::InvalidTerm {
                position: "predicate",
                reason: "must be an IRI".into(),
            });
        }
        if TermKind::of(o).is_none() {
            return Err(StoreError::InvalidTerm {
                position: "object",
                reason: "must be an IRI, blank node, or literal".into(),
            });
        }
        if let Some(g) = g
            && TermKind::of(g) != Some(TermKind::Iri)
        {
            return Err(StoreError::InvalidTerm {
                position: "graph",
                reason: "must be an IRI".into(),
            });
        }
        Ok(())
    }
}
