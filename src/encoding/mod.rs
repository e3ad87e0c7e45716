//! Wire format for Mercury's transaction records.
//!
//! Everything Mercury logs is made of 64-bit words: atom ids,
//! timestamps, and the id tuples that form quad keys. The wire format
//! leans into that instead of being a general serializer — [`Wire`] is
//! implemented for words, fixed word tuples, and the one optional
//! timestamp a retraction carries, plus a length-prefixed sequence
//! helper for a record's operation list. Enum discriminants are single
//! tag bytes written by the record types themselves.
//!
//! Writing is infallible: every encodable value has a representation,
//! so [`Wire::put`] just appends bytes. Reading goes through a
//! [`Reader`] cursor that remembers its offset, which puts a byte
//! position on every decode failure — when a WAL frame turns out to be
//! garbage, the error says where it stopped making sense.
//!
//! # Layout
//!
//! | Shape | Bytes |
//! |-------|-------|
//! | word (`u64`) | 8, little-endian |
//! | word tuple (`[u64; N]`) | `N × 8`, element-wise |
//! | optional word | 1 presence byte (`0`/`1`), then the word if present |
//! | sequence | `u32` count, then the elements |
//! | enum discriminant | 1 tag byte, written by the enum's own `put` |
//!
//! # Hostile-input bounds
//!
//! Decoding never trusts a length it read: sequence counts are capped
//! at [`MAX_SEQ_LEN`] (far above any real transaction, far below an
//! allocation bomb), presence bytes must be exactly `0` or `1`, and a
//! frame with bytes left over after its record is rejected rather than
//! silently accepted. None of the paths here panic.

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Upper bound on a decoded sequence count.
///
/// A transaction holds at most one op per quad it touches; a million
/// ops is already an absurd batch, while a crafted count of `u32::MAX`
/// would otherwise pre-allocate gigabytes.
pub const MAX_SEQ_LEN: u32 = 1 << 20;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Why a record could not be decoded.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended mid-value.
    #[error("record truncated at byte {offset} ({needed} more bytes needed)")]
    Truncated {
        /// Offset the reader had reached.
        offset: usize,
        /// Bytes the current value still required.
        needed: usize,
    },

    /// A tag byte had no meaning for the type being decoded.
    #[error("bad tag {tag:#04x} for {decoding} at byte {offset}")]
    BadTag {
        /// Offset of the tag byte.
        offset: usize,
        /// The tag that was read.
        tag: u8,
        /// What was being decoded.
        decoding: &'static str,
    },

    /// A sequence count exceeded [`MAX_SEQ_LEN`].
    #[error("sequence of {len} elements exceeds the {MAX_SEQ_LEN} cap")]
    OverlongSeq {
        /// The count that was read.
        len: u32,
    },

    /// The record decoded cleanly but did not consume its whole frame.
    #[error("{remaining} unexpected trailing bytes after record")]
    TrailingBytes {
        /// Bytes left unread.
        remaining: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Trait & entry points
// ------------------------------------------------------------------------------------------------

/// A value with a byte-stable wire representation.
///
/// `put` must be deterministic — the same value always appends the same
/// bytes, because WAL frames are checksummed over them.
pub trait Wire: Sized {
    /// Appends this value's encoding to `out`.
    fn put(&self, out: &mut Vec<u8>);

    /// Reads one value at the reader's position.
    fn take(r: &mut Reader<'_>) -> Result<Self, WireError>;
}

/// Encodes a value into a fresh buffer.
pub fn to_bytes<T: Wire>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.put(&mut out);
    out
}

/// Decodes exactly one value from `buf`; trailing bytes are an error.
pub fn from_bytes<T: Wire>(buf: &[u8]) -> Result<T, WireError> {
    let mut reader = Reader::new(buf);
    let value = T::take(&mut reader)?;
    reader.expect_end()?;
    Ok(value)
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A decoding cursor over one record's bytes.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// A reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// The current byte offset.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails unless every byte has been consumed.
    pub fn expect_end(&self) -> Result<(), WireError> {
        if self.remaining() != 0 {
            return Err(WireError::TrailingBytes {
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    /// Consumes `n` raw bytes.
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consumes one tag byte. The caller matches it and, for an
    /// unknown value, reports via [`Reader::bad_tag`].
    pub fn tag(&mut self) -> Result<u8, WireError> {
        Ok(self.bytes(1)?[0])
    }

    /// A [`WireError::BadTag`] pointing at the tag byte just consumed.
    pub fn bad_tag(&self, tag: u8, decoding: &'static str) -> WireError {
        WireError::BadTag {
            offset: self.pos.saturating_sub(1),
            tag,
            decoding,
        }
    }

    /// Consumes one little-endian word.
    pub fn word(&mut self) -> Result<u64, WireError> {
        let bytes = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn count(&mut self) -> Result<u32, WireError> {
        let bytes = self.bytes(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }
}

// ------------------------------------------------------------------------------------------------
// Words and word tuples
// ------------------------------------------------------------------------------------------------

impl Wire for u64 {
    fn put(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        r.word()
    }
}

/// Fixed word tuples — quad id groups and B+Tree key shapes. No length
/// prefix; the width is part of the type.
impl<const N: usize> Wire for [u64; N] {
    fn put(&self, out: &mut Vec<u8>) {
        for word in self {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let mut tuple = [0u64; N];
        for word in &mut tuple {
            *word = r.word()?;
        }
        Ok(tuple)
    }
}

/// An optional word: a presence byte, then the word when present.
/// Retraction records use this for their corrected valid end.
impl Wire for Option<u64> {
    fn put(&self, out: &mut Vec<u8>) {
        match self {
            None => out.push(0),
            Some(word) => {
                out.push(1);
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
    }

    fn take(r: &mut Reader<'_>) -> Result<Self, WireError> {
        match r.tag()? {
            0 => Ok(None),
            1 => Ok(Some(r.word()?)),
            tag => Err(r.bad_tag(tag, "optional word")),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sequences
// ------------------------------------------------------------------------------------------------

/// Appends a count-prefixed sequence.
pub fn put_seq<T: Wire>(items: &[T], out: &mut Vec<u8>) {
    // Transactions are bounded well under u32 in practice; saturate
    // rather than panic if something absurd arrives.
    let count = u32::try_from(items.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&count.to_le_bytes());
    for item in items {
        item.put(out);
    }
}

/// Reads a count-prefixed sequence, rejecting counts past
/// [`MAX_SEQ_LEN`] before allocating.
pub fn take_seq<T: Wire>(r: &mut Reader<'_>) -> Result<Vec<T>, WireError> {
    let len = r.count()?;
    if len > MAX_SEQ_LEN {
        return Err(WireError::OverlongSeq { len });
    }
    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(T::take(r)?);
    }
    Ok(items)
}
