//! Checkpoint images — the on-disk form of a B+Tree.
//!
//! An image is the tree's leaf chain serialized front to back. Each leaf
//! becomes one CRC-framed block; branch pages are not stored, because
//! the reader rebuilds them bottom-up while bulk-loading (the leaf chain
//! is already in key order).
//!
//! # Layout
//!
//! ```text
//! [HEADER][HEADER_CRC32]
//! [u32 block_len][BLOCK][u32 block_crc32]
//! [u32 block_len][BLOCK][u32 block_crc32]
//! …
//! ```
//!
//! A block holds one leaf page:
//!
//! - entry count (`u16`) and the leaf's `last_applied_tx`
//! - a **page-local dictionary** of distinct [`VersionMeta`] values —
//!   on a healthy store almost every entry is the fully open
//!   `(TIME_MAX, TIME_MAX)`, so the per-entry cost collapses to a
//!   one-byte dictionary index
//! - the first key verbatim (48 bytes), then each following key as six
//!   **zigzag-varint deltas** against its predecessor — adjacent keys in
//!   an ordering share long prefixes, so deltas are tiny
//!
//! Images are written to a temporary file and renamed into place, so a
//! crash mid-checkpoint leaves the previous image intact.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::model::TxId;

use super::btree::{BTree, Leaf};
use super::{IndexError, IndexOrder, KEY_WORDS, QuadKey, VersionMeta};

const IMAGE_MAGIC: u32 = 0x5844_494D; // "MIDX"
const IMAGE_VERSION: u32 = 1;

// ------------------------------------------------------------------------------------------------
// Varint / zigzag primitives
// ------------------------------------------------------------------------------------------------

fn write_varint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, IndexError> {
    let mut v: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| IndexError::Corrupted("varint truncated".into()))?;
        *pos += 1;
        v |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
        if shift >= 64 {
            return Err(IndexError::Corrupted("varint overflows u64".into()));
        }
    }
}

#[inline]
fn zigzag(delta: i64) -> u64 {
    ((delta << 1) ^ (delta >> 63)) as u64
}

#[inline]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Serializes `tree` into the image file at `path`.
pub(super) fn write_image(tree: &BTree, order: IndexOrder, path: &Path) -> Result<(), IndexError> {
    let tmp = path.with_extension("btree.tmp");
    let file = File::create(&tmp)?;
    let mut out = BufWriter::new(file);

    // Header.
    let mut header = Vec::with_capacity(20);
    header.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
    header.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    header.push(order.tag());
    header.extend_from_slice(&[0u8; 3]);
    header.extend_from_slice(&tree.len().to_le_bytes());
    let mut crc = Crc32::new();
    crc.update(&header);
    out.write_all(&header)?;
    out.write_all(&crc.finalize().to_le_bytes())?;

    // One block per leaf page.
    let mut block = Vec::new();
    for leaf in tree.leaf_pages() {
        if leaf.keys.is_empty() {
            continue; // deletion-emptied leaves vanish at checkpoint
        }
        block.clear();
        encode_leaf_block(leaf, &mut block);

        let mut crc = Crc32::new();
        crc.update(&block);
        out.write_all(&(block.len() as u32).to_le_bytes())?;
        out.write_all(&block)?;
        out.write_all(&crc.finalize().to_le_bytes())?;
    }

    out.flush()?;
    out.into_inner()
        .map_err(|e| IndexError::Internal(format!("buffered writer: {e}")))?
        .sync_all()?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), entries = tree.len(), "index image written");
    Ok(())
}

fn encode_leaf_block(leaf: &Leaf, block: &mut Vec<u8>) {
    block.extend_from_slice(&(leaf.keys.len() as u16).to_le_bytes());
    block.extend_from_slice(&leaf.last_applied_tx.to_le_bytes());

    // Page-local meta dictionary.
    let mut dict: Vec<VersionMeta> = Vec::new();
    let mut indices: Vec<usize> = Vec::with_capacity(leaf.vals.len());
    for meta in &leaf.vals {
        let idx = match dict.iter().position(|d| d == meta) {
            Some(i) => i,
            None => {
                dict.push(*meta);
                dict.len() - 1
            }
        };
        indices.push(idx);
    }
    block.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    for meta in &dict {
        block.extend_from_slice(&meta.valid_to.to_le_bytes());
        block.extend_from_slice(&meta.tx_to.to_le_bytes());
    }

    // First key raw, the rest as zigzag deltas.
    let mut prev: Option<QuadKey> = None;
    for key in &leaf.keys {
        match prev {
            None => {
                for word in key {
                    block.extend_from_slice(&word.to_le_bytes());
                }
            }
            Some(p) => {
                for i in 0..KEY_WORDS {
                    let delta = key[i].wrapping_sub(p[i]) as i64;
                    write_varint(zigzag(delta), block);
                }
            }
        }
        prev = Some(*key);
    }

    for idx in indices {
        write_varint(idx as u64, block);
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Loads the image at `path`, rebuilding the tree bottom-up.
pub(super) fn read_image(path: &Path, order: IndexOrder) -> Result<BTree, IndexError> {
    let bytes = fs::read(path)?;
    let mut pos = 0usize;

    // Header.
    if bytes.len() < 24 {
        return Err(IndexError::Corrupted("image shorter than header".into()));
    }
    let header = &bytes[..20];
    let stored_crc = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    let mut crc = Crc32::new();
    crc.update(header);
    if crc.finalize() != stored_crc {
        return Err(IndexError::Corrupted("header CRC mismatch".into()));
    }
    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != IMAGE_MAGIC {
        return Err(IndexError::Corrupted(format!("bad magic {magic:#x}")));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != IMAGE_VERSION {
        return Err(IndexError::Corrupted(format!(
            "unsupported image version {version}"
        )));
    }
    if header[8] != order.tag() {
        return Err(IndexError::Corrupted(format!(
            "image holds ordering tag {} but {} was expected",
            header[8],
            order.tag()
        )));
    }
    let entry_count = u64::from_le_bytes([
        header[12], header[13], header[14], header[15], header[16], header[17], header[18],
        header[19],
    ]);
    pos += 24;

    // Blocks.
    let mut leaves: Vec<Leaf> = Vec::new();
    while pos < bytes.len() {
        if pos + 4 > bytes.len() {
            return Err(IndexError::Corrupted("truncated block length".into()));
        }
        let block_len =
            u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
                as usize;
        pos += 4;
        if pos + block_len + 4 > bytes.len() {
            return Err(IndexError::Corrupted("truncated block".into()));
        }
        let block = &bytes[pos..pos + block_len];
        let stored_crc = u32::from_le_bytes([
            bytes[pos + block_len],
            bytes[pos + block_len + 1],
            bytes[pos + block_len + 2],
            bytes[pos + block_len + 3],
        ]);
        let mut crc = Crc32::new();
        crc.update(block);
        if crc.finalize() != stored_crc {
            return Err(IndexError::Corrupted("block CRC mismatch".into()));
        }
        pos += block_len + 4;

        leaves.push(decode_leaf_block(block)?);
    }

    let tree = BTree::from_leaves(leaves);
    if tree.len() != entry_count {
        return Err(IndexError::Corrupted(format!(
            "image declares {entry_count} entries but blocks held {}",
            tree.len()
        )));
    }
    Ok(tree)
}

fn decode_leaf_block(block: &[u8]) -> Result<Leaf, IndexError> {
    let mut pos = 0usize;

    let need = |pos: usize, n: usize| -> Result<(), IndexError> {
        if pos + n > block.len() {
            Err(IndexError::Corrupted("block truncated".into()))
        } else {
            Ok(())
        }
    };

    need(pos, 2)?;
    let count = u16::from_le_bytes([block[pos], block[pos + 1]]) as usize;
    pos += 2;

    need(pos, 8)?;
    let last_applied_tx = TxId::from_le_bytes([
        block[pos],
        block[pos + 1],
        block[pos + 2],
        block[pos + 3],
        block[pos + 4],
        block[pos + 5],
        block[pos + 6],
        block[pos + 7],
    ]);
    pos += 8;

    need(pos, 2)?;
    let dict_len = u16::from_le_bytes([block[pos], block[pos + 1]]) as usize;
    pos += 2;

    let mut dict = Vec::with_capacity(dict_len);
    for _ in 0..dict_len {
        need(pos, 16)?;
        let valid_to = u64::from_le_bytes([
            block[pos],
            block[pos + 1],
            block[pos + 2],
            block[pos + 3],
            block[pos + 4],
            block[pos + 5],
            block[pos + 6],
            block[pos + 7],
        ]);
        let tx_to = u64::from_le_bytes([
            block[pos + 8],
            block[pos + 9],
            block[pos + 10],
            block[pos + 11],
            block[pos + 12],
            block[pos + 13],
            block[pos + 14],
            block[pos + 15],
        ]);
        pos += 16;
        dict.push(VersionMeta { valid_to, tx_to });
    }

    let mut keys: Vec<QuadKey> = Vec::with_capacity(count);
    if count > 0 {
        need(pos, KEY_WORDS * 8)?;
        let mut first = [0u64; KEY_WORDS];
        for (i, word) in first.iter_mut().enumerate() {
            *word = u64::from_le_bytes([
                block[pos + i * 8],
                block[pos + i * 8 + 1],
                block[pos + i * 8 + 2],
                block[pos + i * 8 + 3],
                block[pos + i * 8 + 4],
                block[pos + i * 8 + 5],
                block[pos + i * 8 + 6],
                block[pos + i * 8 + 7],
            ]);
        }
        pos += KEY_WORDS * 8;
        keys.push(first);

        for _ in 1..count {
            let prev = keys[keys.len() - 1];
            let mut key = [0u64; KEY_WORDS];
            for (i, word) in key.iter_mut().enumerate() {
                let delta = unzigzag(read_varint(block, &mut pos)?);
                *word = prev[i].wrapping_add(delta as u64);
            }
            keys.push(key);
        }
    }

    let mut vals = Vec::with_capacity(count);
    for _ in 0..count {
        let idx = read_varint(block, &mut pos)? as usize;
        let meta = dict
            .get(idx)
            .copied()
            .ok_or_else(|| IndexError::Corrupted(format!("meta dictionary index {idx} out of range")))?;
        vals.push(meta);
    }

    Ok(Leaf {
        keys,
        vals,
        next: None,
        last_applied_tx,
    })
}
