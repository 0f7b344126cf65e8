//! Fixed-width encoding of index values with a reserved "unused" sentinel.
//!
//! Every slot of a buffer holds one big-endian unsigned integer of [Width::entry_size] bytes. A
//! logical value `v` is stored as `v + 1` so that a zeroed slot (the state of freshly allocated or
//! never written storage) always reads back as absent, distinct from a written `0`. The largest
//! representable logical value is therefore `2^(8 * entry_size) - 2` ([Width::max_value]).
//!
//! Spans are stored as two consecutive slots (`begin`, `end`), so span slot `i` occupies value
//! slots `2i` and `2i + 1` and [Width::span_size] is exactly twice [Width::entry_size].
//!
//! # Format
//!
//! ```text
//! +--------+--------+--------+--------+-----+
//! | slot 0 | slot 1 | slot 2 | slot 3 | ... |    value buffer (slot = entry_size bytes)
//! +--------+--------+--------+--------+-----+
//! |   span 0        |   span 1        | ... |    span buffer (begin, end)
//! +--------+--------+--------+--------+-----+
//!
//! stored = logical + 1, stored 0 = unused
//! ```
//!
//! In addition to reading and writing, [Width] offers six searches over a window `[from, to)` of
//! slots: linear ([Width::find], [Width::find_span]), dense binary ([Width::find_sorted],
//! [Width::find_sorted_span]) and sparse binary ([Width::sparse_find_sorted],
//! [Width::sparse_find_sorted_span]) for sorted buffers whose unused slots form a contiguous tail.

use crate::index::Span;
use bytes::{Buf, BufMut};
use thiserror::Error;

mod search;

/// Stored value of a slot that was never written.
pub(crate) const UNUSED: u64 = 0;

/// Errors that can occur when encoding values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("value overflow: {0} exceeds maximum {1}")]
    ValueOverflow(u64, u64),
}

/// Width of a single stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    /// All widths, narrowest first.
    pub const ALL: [Width; 4] = [Width::U8, Width::U16, Width::U32, Width::U64];

    /// Size in bytes of a single value.
    pub const fn entry_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }

    /// Size in bytes of a span (two values).
    pub const fn span_size(self) -> usize {
        self.entry_size() * 2
    }

    /// Largest logical value that can be stored.
    pub const fn max_value(self) -> u64 {
        match self {
            Self::U8 => u8::MAX as u64 - 1,
            Self::U16 => u16::MAX as u64 - 1,
            Self::U32 => u32::MAX as u64 - 1,
            Self::U64 => u64::MAX - 1,
        }
    }

    /// Narrowest width able to store `value`.
    pub const fn for_value(value: u64) -> Self {
        if value <= Self::U8.max_value() {
            Self::U8
        } else if value <= Self::U16.max_value() {
            Self::U16
        } else if value <= Self::U32.max_value() {
            Self::U32
        } else {
            Self::U64
        }
    }

    /// Allocate a zeroed (all unused) buffer of `byte_count` bytes.
    pub fn create_buffer(self, byte_count: usize) -> Vec<u8> {
        vec![0; byte_count]
    }

    /// Translate a logical value into its stored representation.
    pub fn encode(self, value: u64) -> Result<u64, Error> {
        if value > self.max_value() {
            return Err(Error::ValueOverflow(value, self.max_value()));
        }
        Ok(value + 1)
    }

    /// Translate a stored representation into a logical value.
    pub const fn decode(stored: u64) -> Option<u64> {
        match stored {
            UNUSED => None,
            stored => Some(stored - 1),
        }
    }

    /// Stored representation at value slot `slot`.
    #[inline]
    pub(crate) fn load(self, buf: &[u8], slot: usize) -> u64 {
        let mut src = &buf[slot * self.entry_size()..];
        match self {
            Self::U8 => src.get_u8() as u64,
            Self::U16 => src.get_u16() as u64,
            Self::U32 => src.get_u32() as u64,
            Self::U64 => src.get_u64(),
        }
    }

    /// Overwrite value slot `slot` with a stored representation.
    #[inline]
    fn store(self, buf: &mut [u8], slot: usize, stored: u64) {
        let mut dst = &mut buf[slot * self.entry_size()..];
        match self {
            Self::U8 => dst.put_u8(stored as u8),
            Self::U16 => dst.put_u16(stored as u16),
            Self::U32 => dst.put_u32(stored as u32),
            Self::U64 => dst.put_u64(stored),
        }
    }

    /// Decode the value at slot `slot`.
    pub fn read(self, buf: &[u8], slot: usize) -> Option<u64> {
        Self::decode(self.load(buf, slot))
    }

    /// Encode `value` (or the unused sentinel) into slot `slot`.
    pub fn write(self, buf: &mut [u8], slot: usize, value: Option<u64>) -> Result<(), Error> {
        let stored = match value {
            Some(value) => self.encode(value)?,
            None => UNUSED,
        };
        self.store(buf, slot, stored);
        Ok(())
    }

    /// Decode the span at span slot `slot`.
    pub fn read_span(self, buf: &[u8], slot: usize) -> Option<Span> {
        let begin = self.read(buf, slot * 2)?;
        let end = self.read(buf, slot * 2 + 1)?;
        Span::checked(begin, end)
    }

    /// Encode `span` (or the unused sentinel) into span slot `slot`.
    pub fn write_span(self, buf: &mut [u8], slot: usize, span: Option<Span>) -> Result<(), Error> {
        match span {
            Some(span) => {
                // Encode both before touching the buffer so a failure leaves the slot intact
                let begin = self.encode(span.begin())?;
                let end = self.encode(span.end())?;
                self.store(buf, slot * 2, begin);
                self.store(buf, slot * 2 + 1, end);
            }
            None => {
                self.store(buf, slot * 2, UNUSED);
                self.store(buf, slot * 2 + 1, UNUSED);
            }
        }
        Ok(())
    }
}
