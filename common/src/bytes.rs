//! Byte-range utilities for ordered key scans.

use std::ops::Bound::{Excluded, Included, Unbounded};
use std::ops::{Bound, RangeBounds};

use bytes::{Bytes, BytesMut};

/// Computes the lexicographic successor of a byte sequence.
///
/// Returns the smallest sequence strictly greater than the input, or `None`
/// when none exists (empty input, or all bytes are `0xFF`). Used to turn a
/// prefix into the exclusive upper bound of a range scan.
pub(crate) fn lex_increment(data: &[u8]) -> Option<Bytes> {
    let mut out = BytesMut::from(data);
    while let Some(last) = out.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(out.freeze());
        }
        out.truncate(out.len() - 1);
    }
    None
}

/// A half-open or bounded range over byte-sequence keys.
#[derive(Clone, Debug)]
pub struct BytesRange {
    pub start: Bound<Bytes>,
    pub end: Bound<Bytes>,
}

impl BytesRange {
    pub fn new(start: Bound<Bytes>, end: Bound<Bytes>) -> Self {
        Self { start, end }
    }

    /// The range covering every key that starts with `prefix`.
    pub fn prefix(prefix: Bytes) -> Self {
        if prefix.is_empty() {
            return Self::unbounded();
        }
        let end = match lex_increment(&prefix) {
            Some(end) => Excluded(end),
            None => Unbounded,
        };
        Self {
            start: Included(prefix),
            end,
        }
    }

    /// The range covering every key.
    pub fn unbounded() -> Self {
        Self {
            start: Unbounded,
            end: Unbounded,
        }
    }

    /// Whether `key` falls inside this range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Included(s) => key >= s.as_ref(),
            Excluded(s) => key > s.as_ref(),
            Unbounded => true,
        };
        let before_end = match &self.end {
            Included(e) => key <= e.as_ref(),
            Excluded(e) => key < e.as_ref(),
            Unbounded => true,
        };
        after_start && before_end
    }
}

impl RangeBounds<Bytes> for BytesRange {
    fn start_bound(&self) -> Bound<&Bytes> {
        self.start.as_ref()
    }

    fn end_bound(&self) -> Bound<&Bytes> {
        self.end.as_ref()
    }
}
