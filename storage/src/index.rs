//! Index values, spans, and sorted collections of indices.
//!
//! Batch operations on a [crate::mapping::Reader] or [crate::mapping::Writer] take a slice of
//! [IndexSet]s that is sorted as a whole (every set ascending, and every set ending before the
//! next one begins). Results are handed to a [Collector].

use std::{ops::RangeInclusive, slice};

/// An inclusive, non-empty range of indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Span {
    begin: u64,
    end: u64,
}

impl Span {
    /// Create a span covering `begin..=end`.
    ///
    /// # Panics
    ///
    /// Panics if `begin > end`.
    pub fn new(begin: u64, end: u64) -> Self {
        assert!(begin <= end, "span begin {begin} exceeds end {end}");
        Self { begin, end }
    }

    /// Create a span covering `begin..=end`, or `None` if `begin > end`.
    pub fn checked(begin: u64, end: u64) -> Option<Self> {
        (begin <= end).then_some(Self { begin, end })
    }

    /// Create a span covering a single index.
    pub const fn single(index: u64) -> Self {
        Self {
            begin: index,
            end: index,
        }
    }

    pub const fn begin(&self) -> u64 {
        self.begin
    }

    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Number of indices covered (saturating at `u64::MAX`).
    pub const fn len(&self) -> u64 {
        (self.end - self.begin).saturating_add(1)
    }

    pub const fn contains(&self, index: u64) -> bool {
        self.begin <= index && index <= self.end
    }

    /// Smallest span covering both `self` and `other`.
    pub fn merge(&self, other: &Span) -> Span {
        Span {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Smallest span covering `self` and `index`.
    pub fn extend(&self, index: u64) -> Span {
        self.merge(&Span::single(index))
    }

    /// Overlap of `self` and `other`, if any.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        Span::checked(self.begin.max(other.begin), self.end.min(other.end))
    }
}

impl From<Span> for RangeInclusive<u64> {
    fn from(span: Span) -> Self {
        span.begin..=span.end
    }
}

/// An ascending collection of indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSet {
    /// Every index in the span.
    Span(Span),
    /// Explicit values, expected to be strictly ascending.
    Values(Vec<u64>),
}

impl IndexSet {
    /// A continuous set covering `begin..=end`.
    ///
    /// # Panics
    ///
    /// Panics if `begin > end`.
    pub fn span(begin: u64, end: u64) -> Self {
        Self::Span(Span::new(begin, end))
    }

    /// A set of explicit values. Ordering is validated by the operation consuming the set.
    pub fn values(values: Vec<u64>) -> Self {
        Self::Values(values)
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::Span(span) => span.len(),
            Self::Values(values) => values.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Span(_) => false,
            Self::Values(values) => values.is_empty(),
        }
    }

    pub fn first(&self) -> Option<u64> {
        match self {
            Self::Span(span) => Some(span.begin),
            Self::Values(values) => values.first().copied(),
        }
    }

    pub fn last(&self) -> Option<u64> {
        match self {
            Self::Span(span) => Some(span.end),
            Self::Values(values) => values.last().copied(),
        }
    }

    /// Whether the set covers every index between its first and last member.
    pub fn is_continuous(&self) -> bool {
        match self {
            Self::Span(_) => true,
            Self::Values(values) => match (values.first(), values.last()) {
                (Some(first), Some(last)) => {
                    last.checked_sub(*first).map(|gap| gap + 1) == Some(values.len() as u64)
                }
                _ => false,
            },
        }
    }

    /// Whether the members are strictly ascending.
    pub fn is_sorted(&self) -> bool {
        match self {
            Self::Span(_) => true,
            Self::Values(values) => values.windows(2).all(|pair| pair[0] < pair[1]),
        }
    }

    /// Smallest member that is `>= index`.
    pub fn ceiling(&self, index: u64) -> Option<u64> {
        match self {
            Self::Span(span) if index <= span.begin => Some(span.begin),
            Self::Span(span) => span.contains(index).then_some(index),
            Self::Values(values) => {
                let position = values.partition_point(|value| *value < index);
                values.get(position).copied()
            }
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        match self {
            Self::Span(span) => Iter::Span(span.begin..=span.end),
            Self::Values(values) => Iter::Values(values.iter()),
        }
    }
}

/// Iterator over the members of an [IndexSet].
pub enum Iter<'a> {
    Span(RangeInclusive<u64>),
    Values(slice::Iter<'a, u64>),
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self {
            Self::Span(range) => range.next(),
            Self::Values(values) => values.next().copied(),
        }
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<u64> {
        match self {
            Self::Span(range) => range.next_back(),
            Self::Values(values) => values.next_back().copied(),
        }
    }
}

/// First index of a sorted slice of sets.
pub fn first_index(sets: &[IndexSet]) -> Option<u64> {
    sets.iter().find_map(IndexSet::first)
}

/// Last index of a sorted slice of sets.
pub fn last_index(sets: &[IndexSet]) -> Option<u64> {
    sets.iter().rev().find_map(IndexSet::last)
}

/// Total number of indices across all sets.
pub fn index_count(sets: &[IndexSet]) -> u64 {
    sets.iter().map(IndexSet::len).sum()
}

/// Whether every set is sorted and every set ends before the next begins.
pub fn is_sorted(sets: &[IndexSet]) -> bool {
    let mut previous: Option<u64> = None;
    for set in sets.iter().filter(|set| !set.is_empty()) {
        if !set.is_sorted() {
            return false;
        }
        if let (Some(previous), Some(first)) = (previous, set.first()) {
            if first <= previous {
                return false;
            }
        }
        previous = set.last();
    }
    true
}

/// Iterate every index of a slice of sets in order.
pub fn indices(sets: &[IndexSet]) -> impl Iterator<Item = u64> + '_ {
    sets.iter().flat_map(IndexSet::iter)
}

/// Receives the results of a batch operation.
pub trait Collector {
    /// Accept a single index.
    fn add(&mut self, index: u64);

    /// Accept every index of `span`.
    fn add_span(&mut self, span: Span) {
        for index in span.begin..=span.end {
            self.add(index);
        }
    }
}

impl Collector for Vec<u64> {
    fn add(&mut self, index: u64) {
        self.push(index);
    }
}

/// Collects results into [IndexSet::Span]s, joining indices and spans that are adjacent in the
/// order they are added.
#[derive(Debug, Default)]
pub struct IndexSetBuilder {
    sets: Vec<IndexSet>,
    current: Option<Span>,
}

impl IndexSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish collecting and return the sets in insertion order.
    pub fn finish(mut self) -> Vec<IndexSet> {
        if let Some(span) = self.current.take() {
            self.sets.push(IndexSet::Span(span));
        }
        self.sets
    }
}

impl Collector for IndexSetBuilder {
    fn add(&mut self, index: u64) {
        self.add_span(Span::single(index));
    }

    fn add_span(&mut self, span: Span) {
        match self.current {
            Some(current) if current.end.checked_add(1) == Some(span.begin) => {
                self.current = Some(Span::new(current.begin, span.end));
            }
            Some(current) => {
                self.sets.push(IndexSet::Span(current));
                self.current = Some(span);
            }
            None => self.current = Some(span),
        }
    }
}
