//! Atom store — interned RDF terms behind stable 64-bit ids.
//!
//! Every RDF term Mercury touches (IRI, blank node, literal) is stored
//! exactly once, in canonical serialized form, inside a set of
//! **append-only segment files**. Two co-operative structures make the
//! store work:
//!
//! - a **content-hash map** (term bytes → id) used to deduplicate on
//!   [`AtomStore::intern`], and
//! - the **segment heap** (id → byte slice) used for reverse lookup via
//!   [`AtomStore::resolve`].
//!
//! The id encodes the atom's physical location: the upper bits select the
//! segment, the lower 40 bits the byte offset within it. Because segments
//! are append-only and start with a fixed header, offset 0 never denotes
//! an atom — id 0 stays free as the reserved default-graph id.
//!
//! # On-disk layout
//!
//! ```text
//! atoms/
//!   seg-000001.atm
//!   seg-000002.atm
//!   …
//! ```
//!
//! Each segment is `[HEADER][entry]…` where an entry is
//! `[u32 len][bytes][u32 crc32]`. The CRC covers `len || bytes` so a torn
//! tail from a crash is detected and truncated on open. Sealed segments
//! are re-opened read-only through `memmap2`; the youngest segment stays
//! writable and is mirrored in memory for resolution.
//!
//! # Concurrency
//!
//! The atom store carries no lock of its own. Interning happens only
//! under the quad store's exclusive write lock; `resolve` hands out
//! borrows that are valid for the lifetime of the caller's read guard.
//! Segment bytes are append-only and therefore stable under concurrent
//! reads.

#[cfg(test)]
mod tests;

use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::AtomId;

/// Magic bytes at the start of every segment file.
const SEGMENT_MAGIC: u32 = 0x4D41_544D; // "MATM"

/// Segment format version.
const SEGMENT_VERSION: u32 = 1;

/// Fixed segment header: magic, version, reserved.
const SEGMENT_HEADER_LEN: u64 = 16;

/// Bits of an [`AtomId`] reserved for the in-segment byte offset.
const OFFSET_BITS: u32 = 40;

/// Mask extracting the offset from an id.
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Default size at which the active segment is sealed and a new one begun.
pub const SEGMENT_ROLL_BYTES: u64 = 64 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by atom store operations.
#[derive(Debug, Error)]
pub enum AtomError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A segment header or entry failed validation.
    #[error("atom segment corrupted: {path} at offset {offset}: {reason}")]
    Corrupted {
        /// Segment file involved.
        path: PathBuf,
        /// Byte offset of the bad entry.
        offset: u64,
        /// What failed.
        reason: String,
    },

    /// An id did not resolve to a stored atom.
    #[error("unknown atom id: {0:#x}")]
    UnknownId(AtomId),

    /// Term bytes were not valid UTF-8.
    #[error("atom bytes are not valid UTF-8")]
    NotUtf8,

    /// A single term exceeded the segment offset space.
    #[error("atom of {0} bytes exceeds segment capacity")]
    TooLarge(usize),
}

// ------------------------------------------------------------------------------------------------
// Segments
// ------------------------------------------------------------------------------------------------

/// A sealed, read-only segment backed by a memory map.
#[derive(Debug)]
struct SealedSegment {
    path: PathBuf,
    map: Mmap,
}

/// The youngest segment: file in append mode plus an in-memory mirror of
/// its full contents (header included) so `resolve` never touches disk.
#[derive(Debug)]
struct ActiveSegment {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
}

#[derive(Debug)]
enum Segment {
    Sealed(SealedSegment),
    Active(ActiveSegment),
}

impl Segment {
    fn bytes(&self) -> &[u8] {
        match self {
            Segment::Sealed(s) => &s.map,
            Segment::Active(a) => &a.buf,
        }
    }

    fn path(&self) -> &Path {
        match self {
            Segment::Sealed(s) => &s.path,
            Segment::Active(a) => &a.path,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Atom store
// ------------------------------------------------------------------------------------------------

/// Interns RDF terms to 64-bit ids and resolves ids back to bytes.
///
/// See the module docs for layout and concurrency rules.
#[derive(Debug)]
pub struct AtomStore {
    dir: PathBuf,

    /// All segments, oldest first. The last one is always `Active`.
    segments: Vec<Segment>,

    /// Content-hash map: FxHash of the term bytes → candidate ids.
    /// Collisions are resolved by comparing actual bytes, which keeps
    /// the map free of a second copy of every term.
    dedup: FxHashMap<u64, SmallVec<[AtomId; 1]>>,

    /// Number of interned atoms.
    count: u64,

    /// Bytes the active segment may grow to before rolling.
    roll_bytes: u64,
}

impl AtomStore {
    /// Opens (or creates) the atom store rooted at `dir`.
    ///
    /// Existing segments are scanned front to back: every entry's CRC is
    /// verified and fed back into the dedup map. A torn tail in the
    /// youngest segment is truncated with a warning; corruption anywhere
    /// else is fatal.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, AtomError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut seg_paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("atm")
            })
            .collect();
        seg_paths.sort();

        let mut store = Self {
            dir,
            segments: Vec::new(),
            dedup: FxHashMap::default(),
            count: 0,
            roll_bytes: SEGMENT_ROLL_BYTES,
        };

        if seg_paths.is_empty() {
            store.push_fresh_segment(1)?;
            return Ok(store);
        }

        // All but the youngest segment are sealed and memory-mapped.
        let last = seg_paths.len() - 1;
        for (i, path) in seg_paths.iter().enumerate() {
            if i < last {
                let file = File::open(path)?;
                let map = unsafe { Mmap::map(&file)? };
                Self::validate_header(&map, path)?;
                store.segments.push(Segment::Sealed(SealedSegment {
                    path: path.clone(),
                    map,
                }));
            } else {
                let mut file = OpenOptions::new().read(true).append(true).open(path)?;
                let mut buf = Vec::new();
                file.seek(SeekFrom::Start(0))?;
                file.read_to_end(&mut buf)?;
                Self::validate_header(&buf, path)?;
                store.segments.push(Segment::Active(ActiveSegment {
                    path: path.clone(),
                    file,
                    buf,
                }));
            }
        }

        store.rebuild_dedup()?;
        debug!(
            segments = store.segments.len(),
            atoms = store.count,
            "atom store opened"
        );
        Ok(store)
    }

    /// Interns `bytes`, returning the existing id if the term is already
    /// stored. Idempotent; must only be called while holding the store's
    /// write lock.
    pub fn intern(&mut self, bytes: &[u8]) -> Result<AtomId, AtomError> {
        if std::str::from_utf8(bytes).is_err() {
            return Err(AtomError::NotUtf8);
        }
        let hash = Self::content_hash(bytes);
        if let Some(candidates) = self.dedup.get(&hash) {
            for &id in candidates {
                if self.resolve(id)? == bytes {
                    return Ok(id);
                }
            }
        }

        let entry_len = 4 + bytes.len() as u64 + 4;
        if entry_len > OFFSET_MASK {
            return Err(AtomError::TooLarge(bytes.len()));
        }

        // Roll the active segment if this entry would overflow it.
        let seg_idx = self.segments.len() - 1;
        if self.segments[seg_idx].bytes().len() as u64 + entry_len > self.roll_bytes {
            self.roll_active()?;
        }

        let seg_idx = self.segments.len() - 1;
        let Segment::Active(active) = &mut self.segments[seg_idx] else {
            return Err(AtomError::Corrupted {
                path: self.dir.clone(),
                offset: 0,
                reason: "youngest segment is not writable".into(),
            });
        };

        let offset = active.buf.len() as u64;
        let id = ((seg_idx as u64 + 1) << OFFSET_BITS) | offset;

        let len = bytes.len() as u32;
        let mut crc = Crc32::new();
        crc.update(&len.to_le_bytes());
        crc.update(bytes);

        let mut frame = Vec::with_capacity(entry_len as usize);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(bytes);
        frame.extend_from_slice(&crc.finalize().to_le_bytes());

        active.file.write_all(&frame)?;
        active.buf.extend_from_slice(&frame);

        self.dedup.entry(hash).or_default().push(id);
        self.count += 1;
        Ok(id)
    }

    /// Looks up the id of an already-interned term without writing.
    ///
    /// Returns `None` if the term has never been interned — a pattern
    /// scan over such a term simply matches nothing.
    pub fn lookup(&self, bytes: &[u8]) -> Option<AtomId> {
        let candidates = self.dedup.get(&Self::content_hash(bytes))?;
        candidates
            .iter()
            .copied()
            .find(|&id| self.resolve(id).is_ok_and(|b| b == bytes))
    }

    /// Resolves an id to its term bytes.
    ///
    /// The returned borrow is valid for the lifetime of the caller's read
    /// guard; callers must not retain it beyond that.
    pub fn resolve(&self, id: AtomId) -> Result<&[u8], AtomError> {
        let seg = (id >> OFFSET_BITS) as usize;
        let offset = (id & OFFSET_MASK) as usize;
        if seg == 0 || seg > self.segments.len() || offset < SEGMENT_HEADER_LEN as usize {
            return Err(AtomError::UnknownId(id));
        }
        let bytes = self.segments[seg - 1].bytes();
        if offset + 4 > bytes.len() {
            return Err(AtomError::UnknownId(id));
        }
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let start = offset + 4;
        if start + len > bytes.len() {
            return Err(AtomError::UnknownId(id));
        }
        Ok(&bytes[start..start + len])
    }

    /// Resolves an id to its term as UTF-8.
    ///
    /// Atoms are validated on intern, so failure here means the id was
    /// not a valid atom id.
    pub fn resolve_str(&self, id: AtomId) -> Result<&str, AtomError> {
        std::str::from_utf8(self.resolve(id)?).map_err(|_| AtomError::UnknownId(id))
    }

    /// Iterates every interned atom, oldest first, as `(id, bytes)`.
    pub fn iter(&self) -> AtomIter<'_> {
        AtomIter {
            store: self,
            seg: 0,
            offset: SEGMENT_HEADER_LEN as usize,
        }
    }

    /// Flushes and fsyncs the active segment.
    ///
    /// Called by the quad store before a WAL commit frame is made
    /// durable, so that every atom id referenced by the WAL is already
    /// recoverable.
    pub fn sync(&mut self) -> Result<(), AtomError> {
        let seg_idx = self.segments.len() - 1;
        if let Segment::Active(active) = &mut self.segments[seg_idx] {
            active.file.flush()?;
            active.file.sync_all()?;
        }
        Ok(())
    }

    /// Number of interned atoms.
    pub fn len(&self) -> u64 {
        self.count
    }

    /// True if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total bytes across all segments (headers included).
    pub fn bytes_len(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes().len() as u64).sum()
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn content_hash(bytes: &[u8]) -> u64 {
        let mut hasher = FxHasher::default();
        bytes.hash(&mut hasher);
        hasher.finish()
    }

    fn segment_path(&self, nr: u64) -> PathBuf {
        self.dir.join(format!("seg-{nr:06}.atm"))
    }

    fn push_fresh_segment(&mut self, nr: u64) -> Result<(), AtomError> {
        let path = self.segment_path(nr);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut header = Vec::with_capacity(SEGMENT_HEADER_LEN as usize);
        header.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        header.extend_from_slice(&SEGMENT_VERSION.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());
        file.write_all(&header)?;

        self.segments.push(Segment::Active(ActiveSegment {
            path,
            file,
            buf: header,
        }));
        Ok(())
    }

    /// Seals the active segment (re-opened as a memory map) and begins a
    /// fresh one.
    fn roll_active(&mut self) -> Result<(), AtomError> {
        let seg_idx = self.segments.len() - 1;
        if let Segment::Active(active) = &mut self.segments[seg_idx] {
            active.file.flush()?;
            active.file.sync_all()?;
            let file = File::open(&active.path)?;
            let map = unsafe { Mmap::map(&file)? };
            let path = active.path.clone();
            debug!(path = %path.display(), bytes = map.len(), "atom segment sealed");
            self.segments[seg_idx] = Segment::Sealed(SealedSegment { path, map });
        }
        self.push_fresh_segment(self.segments.len() as u64 + 1)
    }

    fn validate_header(bytes: &[u8], path: &Path) -> Result<(), AtomError> {
        if bytes.len() < SEGMENT_HEADER_LEN as usize {
            return Err(AtomError::Corrupted {
                path: path.to_path_buf(),
                offset: 0,
                reason: "segment shorter than header".into(),
            });
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != SEGMENT_MAGIC {
            return Err(AtomError::Corrupted {
                path: path.to_path_buf(),
                offset: 0,
                reason: format!("bad magic {magic:#x}"),
            });
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != SEGMENT_VERSION {
            return Err(AtomError::Corrupted {
                path: path.to_path_buf(),
                offset: 4,
                reason: format!("unsupported segment version {version}"),
            });
        }
        Ok(())
    }

    /// Walks every segment, verifying CRCs and rebuilding the dedup map.
    ///
    /// A bad entry in the youngest segment is treated as a torn tail:
    /// the file is truncated to the last good entry. Anywhere else it is
    /// fatal corruption.
    fn rebuild_dedup(&mut self) -> Result<(), AtomError> {
        let last_seg = self.segments.len() - 1;
        let mut truncate_to: Option<u64> = None;

        for seg_idx in 0..self.segments.len() {
            let bytes = self.segments[seg_idx].bytes();
            let mut offset = SEGMENT_HEADER_LEN as usize;

            while offset < bytes.len() {
                match Self::read_entry(bytes, offset) {
                    EntryRead::Ok { atom, next } => {
                        let id = ((seg_idx as u64 + 1) << OFFSET_BITS) | offset as u64;
                        let hash = Self::content_hash(atom);
                        self.dedup.entry(hash).or_default().push(id);
                        self.count += 1;
                        offset = next;
                    }
                    // An entry that extends past EOF is a torn write from
                    // a crash mid-append; only legal at the youngest
                    // segment's tail.
                    EntryRead::Torn if seg_idx == last_seg => {
                        warn!(
                            path = %self.segments[seg_idx].path().display(),
                            offset,
                            "torn atom entry, truncating segment tail"
                        );
                        truncate_to = Some(offset as u64);
                        break;
                    }
                    EntryRead::Torn => {
                        return Err(AtomError::Corrupted {
                            path: self.segments[seg_idx].path().to_path_buf(),
                            offset: offset as u64,
                            reason: "incomplete entry inside sealed segment".into(),
                        });
                    }
                    // A complete entry whose CRC fails means the bytes
                    // rotted in place. Never recoverable.
                    EntryRead::BadCrc => {
                        return Err(AtomError::Corrupted {
                            path: self.segments[seg_idx].path().to_path_buf(),
                            offset: offset as u64,
                            reason: "entry failed CRC check".into(),
                        });
                    }
                }
            }
        }

        if let Some(end) = truncate_to
            && let Segment::Active(active) = &mut self.segments[last_seg]
        {
            active.file.set_len(end)?;
            active.file.seek(SeekFrom::End(0))?;
            active.buf.truncate(end as usize);
        }
        Ok(())
    }

    /// Reads one `[len][bytes][crc]` entry at `offset`.
    fn read_entry(bytes: &[u8], offset: usize) -> EntryRead<'_> {
        if offset + 4 > bytes.len() {
            return EntryRead::Torn;
        }
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let start = offset + 4;
        let Some(end) = start.checked_add(len + 4) else {
            return EntryRead::Torn;
        };
        if end > bytes.len() {
            return EntryRead::Torn;
        }
        let atom = &bytes[start..start + len];
        let stored_crc = u32::from_le_bytes([
            bytes[start + len],
            bytes[start + len + 1],
            bytes[start + len + 2],
            bytes[start + len + 3],
        ]);
        let mut crc = Crc32::new();
        crc.update(&(len as u32).to_le_bytes());
        crc.update(atom);
        if crc.finalize() != stored_crc {
            return EntryRead::BadCrc;
        }
        EntryRead::Ok { atom, next: end }
    }
}

/// Outcome of decoding a single segment entry.
enum EntryRead<'a> {
    /// Entry verified; `next` is the offset of the following entry.
    Ok { atom: &'a [u8], next: usize },
    /// Entry extends past the end of the segment (torn write).
    Torn,
    /// Entry is complete but its CRC does not match.
    BadCrc,
}

// ------------------------------------------------------------------------------------------------
// Iteration
// ------------------------------------------------------------------------------------------------

/// Iterator over `(id, bytes)` of every interned atom, oldest first.
///
/// Used by the pruner to copy live atoms into a compacted store.
pub struct AtomIter<'a> {
    store: &'a AtomStore,
    seg: usize,
    offset: usize,
}

impl<'a> Iterator for AtomIter<'a> {
    type Item = (AtomId, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.seg >= self.store.segments.len() {
                return None;
            }
            let bytes = self.store.segments[self.seg].bytes();
            match AtomStore::read_entry(bytes, self.offset) {
                EntryRead::Ok { atom, next } => {
                    let id = ((self.seg as u64 + 1) << OFFSET_BITS) | self.offset as u64;
                    self.offset = next;
                    return Some((id, atom));
                }
                EntryRead::Torn | EntryRead::BadCrc => {
                    self.seg += 1;
                    self.offset = SEGMENT_HEADER_LEN as usize;
                }
            }
        }
    }
}
