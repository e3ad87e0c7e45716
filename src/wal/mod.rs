//! Write-ahead log — durable, append-only transaction frames.
//!
//! Every mutation of the quad store becomes one [`TxRecord`]: a
//! transaction id plus its list of add/retract operations. The record is
//! framed, CRC-protected, appended to the active WAL file, and fsynced
//! **before** the in-memory B+Trees are touched — the commit
//! acknowledgement point is the fsync.
//!
//! # On-disk layout
//!
//! ```text
//! wal/
//!   000000001.wal
//!   000000002.wal
//!   …
//! ```
//!
//! Each file is `[HEADER][HEADER_CRC32]` followed by frames:
//!
//! ```text
//! [u32 len][record bytes][u32 crc32]
//! ```
//!
//! The CRC covers `len || record bytes`. Records use [`crate::encoding`].
//!
//! # Recovery
//!
//! [`Wal::open`] scans every file in sequence order and returns the
//! decoded records for the store to replay. A frame that extends past
//! the end of the **youngest** file is a torn write: it is truncated
//! with a warning and recovery succeeds. A CRC failure, or a torn frame
//! anywhere else, is an irrecoverable prefix — [`WalError::Corrupted`] —
//! and the store refuses to open.
//!
//! # Checkpointing
//!
//! A checkpoint happens under the store's write lock, after the dirty
//! B+Tree pages are flushed to their images. At that point every logged
//! transaction is durable in the images, so the log rotates: a fresh
//! file is started and all older files are deleted.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Reader, Wire, WireError};
use crate::model::{QuadIds, Timestamp, TxId};

/// Magic bytes at the start of every WAL file.
const WAL_MAGIC: u32 = 0x4C41_574D; // "MWAL"

/// WAL file format version.
const WAL_VERSION: u32 = 1;

/// Fixed header: magic, version, file sequence number.
const WAL_HEADER_LEN: u64 = 16;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire-format error inside a frame body.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// An irrecoverable prefix of the log failed validation.
    #[error("WAL corrupted: {path} at offset {offset}: {reason}")]
    Corrupted {
        /// File involved.
        path: PathBuf,
        /// Byte offset of the bad frame.
        offset: u64,
        /// What failed.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Transaction records
// ------------------------------------------------------------------------------------------------

/// One operation inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    /// Record a new quad version with the given valid interval. The
    /// version's `tx_from` is the enclosing record's `tx_time`.
    Add {
        /// The quad's atom ids.
        ids: QuadIds,
        /// Start of the valid interval (inclusive).
        valid_from: Timestamp,
        /// End of the valid interval (exclusive); `TIME_MAX` if open.
        valid_to: Timestamp,
    },

    /// Close an existing version's transaction interval at the record's
    /// `tx_time` and, when `corrected_valid_to` is set, record a
    /// correction version whose valid interval ends there. This is how
    /// a retraction keeps history: the closed row shows what was
    /// believed before, the correction row shows the world as now
    /// understood.
    Retract {
        /// The quad's atom ids.
        ids: QuadIds,
        /// `tx_from` of the version being closed.
        version_tx_from: Timestamp,
        /// `valid_from` of the version being closed.
        version_valid_from: Timestamp,
        /// Valid-interval end for the correction row; `None` records a
        /// pure transaction-time delete ("recorded in error") with no
        /// correction row.
        corrected_valid_to: Option<Timestamp>,
    },

    /// Record a version verbatim, transaction interval included. Only
    /// the pruner emits this, when rebuilding a store whose copied rows
    /// must keep their original history.
    CopyVersion {
        /// The quad's atom ids.
        ids: QuadIds,
        /// Start of the valid interval (inclusive).
        valid_from: Timestamp,
        /// End of the valid interval (exclusive).
        valid_to: Timestamp,
        /// Original `tx_from` of the copied row.
        tx_from: Timestamp,
        /// Original `tx_to` of the copied row.
        tx_to: Timestamp,
    },
}

/// A framed transaction: id, wall-clock time, and operations, applied
/// atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// Monotonic transaction id (replay idempotency token).
    pub tx_id: TxId,
    /// Wall-clock instant of the commit — the `tx_from` of every
    /// version this transaction creates.
    pub tx_time: Timestamp,
    /// The operations, in insertion order.
    pub ops: Vec<TxOp>,
}

impl Wire for QuadIds {
    fn put(&self, out: &mut Vec<u8>) {
        [self.s, self.p, self.o, self.g].put(out);
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let [s, p, o, g] = <[u64; 4]>::take(r)?;
        Ok(QuadIds::new(s, p, o, g))
    }
}

impl Wire for TxOp {
    fn put(&self, out: &mut Vec<u8>) {
        match self {
            TxOp::Add {
                ids,
                valid_from,
                valid_to,
            } => {
                out.push(0);
                ids.put(out);
                valid_from.put(out);
                valid_to.put(out);
            }
            TxOp::Retract {
                ids,
                version_tx_from,
                version_valid_from,
                corrected_valid_to,
            } => {
                out.push(1);
                ids.put(out);
                version_tx_from.put(out);
                version_valid_from.put(out);
                corrected_valid_to.put(out);
            }
            TxOp::CopyVersion {
                ids,
                valid_from,
                valid_to,
                tx_from,
                tx_to,
            } => {
                out.push(2);
                ids.put(out);
                [*valid_from, *valid_to, *tx_from, *tx_to].put(out);
            }
        }
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match r.tag()? {
            0 => Ok(TxOp::Add {
                ids: QuadIds::take(r)?,
                valid_from: r.word()?,
                valid_to: r.word()?,
            }),
            1 => Ok(TxOp::Retract {
                ids: QuadIds::take(r)?,
                version_tx_from: r.word()?,
                version_valid_from: r.word()?,
                corrected_valid_to: <Option<u64> as Wire>::take(r)?,
            }),
            2 => {
                let ids = QuadIds::take(r)?;
                let [valid_from, valid_to, tx_from, tx_to] = <[u64; 4]>::take(r)?;
                Ok(TxOp::CopyVersion {
                    ids,
                    valid_from,
                    valid_to,
                    tx_from,
                    tx_to,
                })
            }
            tag => Err(r.bad_tag(tag, "transaction op")),
        }
    }
}

impl Wire for TxRecord {
    fn put(&self, out: &mut Vec<u8>) {
        self.tx_id.put(out);
        self.tx_time.put(out);
        encoding::put_seq(&self.ops, out);
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(TxRecord {
            tx_id: r.word()?,
            tx_time: r.word()?,
            ops: encoding::take_seq(r)?,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Snapshot of WAL state returned by [`Wal::stats`].
#[derive(Debug, Clone, Copy)]
pub struct WalStats {
    /// Highest transaction id ever assigned.
    pub last_tx: TxId,
    /// Transaction id of the last checkpoint rotation.
    pub checkpoint_tx: TxId,
    /// Bytes in the active WAL file (header included).
    pub wal_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// WAL
// ------------------------------------------------------------------------------------------------

/// The write-ahead log: appender, recovery scanner, and checkpointer.
///
/// Single-writer by construction — the quad store calls every mutating
/// method under its exclusive write lock.
#[derive(Debug)]
pub struct Wal {
    dir: PathBuf,
    file: File,
    file_seq: u64,
    bytes_written: u64,
    next_tx: TxId,
    checkpoint_tx: TxId,
}

impl Wal {
    /// Opens the log at `dir`, returning the WAL handle and every
    /// surviving transaction record for the store to replay.
    pub fn open(dir: impl AsRef<Path>) -> Result<(Self, Vec<TxRecord>), WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut files: Vec<(u64, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter_map(|p| {
                let seq = p
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u64>().ok())?;
                (p.extension().and_then(|s| s.to_str()) == Some("wal")).then_some((seq, p))
            })
            .collect();
        files.sort();

        let mut records = Vec::new();

        if files.is_empty() {
            let (file, bytes_written) = Self::create_file(&dir, 1)?;
            return Ok((
                Self {
                    dir,
                    file,
                    file_seq: 1,
                    bytes_written,
                    next_tx: 1,
                    checkpoint_tx: 0,
                },
                records,
            ));
        }

        let last = files.len() - 1;
        for (i, (seq, path)) in files.iter().enumerate() {
            let truncate_at = Self::scan_file(path, *seq, i == last, &mut records)?;
            if let Some(end) = truncate_at {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(end)?;
                file.sync_all()?;
            }
        }
        let max_tx = records.iter().map(|r| r.tx_id).max().unwrap_or(0);

        let (seq, path) = &files[last];
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        let bytes_written = file.seek(SeekFrom::End(0))?;

        debug!(
            files = files.len(),
            records = records.len(),
            last_tx = max_tx,
            "wal opened"
        );

        Ok((
            Self {
                dir,
                file,
                file_seq: *seq,
                bytes_written,
                next_tx: max_tx + 1,
                checkpoint_tx: 0,
            },
            records,
        ))
    }

    /// Allocates the next monotonic transaction id.
    pub fn begin_tx(&mut self) -> TxId {
        let tx = self.next_tx;
        self.next_tx += 1;
        tx
    }

    /// Raises the id counter so it stays ahead of externally recorded
    /// state (the metadata sidecar's `last_tx`).
    pub fn ensure_tx_after(&mut self, tx: TxId) {
        if self.next_tx <= tx {
            self.next_tx = tx + 1;
        }
    }

    /// Appends one transaction frame and fsyncs it.
    ///
    /// When this returns, the transaction is durable; the caller then
    /// applies it to the in-memory trees and acknowledges the commit.
    pub fn append(&mut self, record: &TxRecord) -> Result<(), WalError> {
        let bytes = encoding::to_bytes(record);
        let len = bytes.len() as u32;

        let mut crc = Crc32::new();
        crc.update(&len.to_le_bytes());
        crc.update(&bytes);

        let mut frame = Vec::with_capacity(bytes.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&bytes);
        frame.extend_from_slice(&crc.finalize().to_le_bytes());

        self.file.write_all(&frame)?;
        self.file.sync_all()?;
        self.bytes_written += frame.len() as u64;
        debug!(tx_id = record.tx_id, ops = record.ops.len(), "wal append");
        Ok(())
    }

    /// Rotates the log after a checkpoint.
    ///
    /// All transactions up to `up_to` are durable in the index images,
    /// so every older file is deleted and a fresh one begun.
    pub fn checkpoint(&mut self, up_to: TxId) -> Result<(), WalError> {
        let new_seq = self.file_seq + 1;
        let (file, bytes_written) = Self::create_file(&self.dir, new_seq)?;

        let old_seq = self.file_seq;
        self.file = file;
        self.file_seq = new_seq;
        self.bytes_written = bytes_written;
        self.checkpoint_tx = up_to;

        for seq in 1..=old_seq {
            let path = Self::file_path(&self.dir, seq);
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        info!(up_to, new_seq, "wal rotated at checkpoint");
        Ok(())
    }

    /// Current WAL statistics.
    pub fn stats(&self) -> WalStats {
        WalStats {
            last_tx: self.next_tx.saturating_sub(1),
            checkpoint_tx: self.checkpoint_tx,
            wal_bytes: self.bytes_written,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn file_path(dir: &Path, seq: u64) -> PathBuf {
        dir.join(format!("{seq:09}.wal"))
    }

    fn create_file(dir: &Path, seq: u64) -> Result<(File, u64), WalError> {
        let path = Self::file_path(dir, seq);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut header = Vec::with_capacity(WAL_HEADER_LEN as usize);
        header.extend_from_slice(&WAL_MAGIC.to_le_bytes());
        header.extend_from_slice(&WAL_VERSION.to_le_bytes());
        header.extend_from_slice(&seq.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;
        Ok((file, WAL_HEADER_LEN))
    }

    /// Scans one WAL file, pushing decoded records.
    ///
    /// Returns `Some(offset)` if a torn tail should be truncated at
    /// `offset` (only ever for the youngest file).
    fn scan_file(
        path: &Path,
        expect_seq: u64,
        is_last: bool,
        records: &mut Vec<TxRecord>,
    ) -> Result<Option<u64>, WalError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        if bytes.len() < WAL_HEADER_LEN as usize {
            return Err(WalError::Corrupted {
                path: path.to_path_buf(),
                offset: 0,
                reason: "file shorter than header".into(),
            });
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != WAL_MAGIC {
            return Err(WalError::Corrupted {
                path: path.to_path_buf(),
                offset: 0,
                reason: format!("bad magic {magic:#x}"),
            });
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != WAL_VERSION {
            return Err(WalError::Corrupted {
                path: path.to_path_buf(),
                offset: 4,
                reason: format!("unsupported WAL version {version}"),
            });
        }
        let seq = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        if seq != expect_seq {
            return Err(WalError::Corrupted {
                path: path.to_path_buf(),
                offset: 8,
                reason: format!("file declares sequence {seq}, name says {expect_seq}"),
            });
        }

        let mut offset = WAL_HEADER_LEN as usize;
        while offset < bytes.len() {
            // Frame length.
            if offset + 4 > bytes.len() {
                return Self::torn(path, offset as u64, is_last, "truncated frame length");
            }
            let len = u32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]) as usize;
            let body_start = offset + 4;
            let frame_end = body_start + len + 4;
            if frame_end > bytes.len() {
                return Self::torn(path, offset as u64, is_last, "frame extends past EOF");
            }

            // CRC over len || body.
            let body = &bytes[body_start..body_start + len];
            let stored_crc = u32::from_le_bytes([
                bytes[body_start + len],
                bytes[body_start + len + 1],
                bytes[body_start + len + 2],
                bytes[body_start + len + 3],
            ]);
            let mut crc = Crc32::new();
            crc.update(&(len as u32).to_le_bytes());
            crc.update(body);
            if crc.finalize() != stored_crc {
                // A bad CRC on the final frame is a torn write mid-frame;
                // anywhere else the prefix itself has rotted.
                if is_last && frame_end == bytes.len() {
                    return Self::torn(path, offset as u64, true, "final frame failed CRC");
                }
                return Err(WalError::Corrupted {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    reason: "frame failed CRC check".into(),
                });
            }

            let mut reader = Reader::new(body);
            let record = TxRecord::take(&mut reader)?;
            if reader.remaining() != 0 {
                return Err(WalError::Corrupted {
                    path: path.to_path_buf(),
                    offset: offset as u64,
                    reason: format!(
                        "frame declares {len} bytes, record left {} unread",
                        reader.remaining()
                    ),
                });
            }
            records.push(record);
            offset = frame_end;
        }
        Ok(None)
    }

    fn torn(
        path: &Path,
        offset: u64,
        is_last: bool,
        reason: &str,
    ) -> Result<Option<u64>, WalError> {
        if is_last {
            warn!(path = %path.display(), offset, reason, "torn WAL tail, truncating");
            Ok(Some(offset))
        } else {
            Err(WalError::Corrupted {
                path: path.to_path_buf(),
                offset,
                reason: format!("{reason} (not the youngest file)"),
            })
        }
    }
}
