//! Genomic intervals, merging rules, and the ordered interval cursor consumed by
//! the scheduler.
//!
//! Coordinates are 1-based and inclusive. The [`GenomeInterval::Unmapped`]
//! sentinel stands for "reads without a placement" and sorts after every mapped
//! interval, so an interval list that asks for unmapped reads always ends with it.

use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GenomeInterval {
    Mapped { contig: usize, start: u32, stop: u32 },
    Unmapped,
}

impl GenomeInterval {
    pub const UNMAPPED: GenomeInterval = GenomeInterval::Unmapped;

    pub fn new(contig: usize, start: u32, stop: u32) -> Result<Self> {
        if start == 0 || start > stop {
            return Err(Error::InvalidRange(format!(
                "interval {}:{}-{} must satisfy 1 <= start <= stop",
                contig, start, stop
            )));
        }
        Ok(GenomeInterval::Mapped {
            contig,
            start,
            stop,
        })
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, GenomeInterval::Unmapped)
    }

    pub fn contig(&self) -> Option<usize> {
        match self {
            GenomeInterval::Mapped { contig, .. } => Some(*contig),
            GenomeInterval::Unmapped => None,
        }
    }

    /// First base, or 0 for the unmapped sentinel.
    pub fn start(&self) -> u32 {
        match self {
            GenomeInterval::Mapped { start, .. } => *start,
            GenomeInterval::Unmapped => 0,
        }
    }

    /// Last base, or 0 for the unmapped sentinel.
    pub fn stop(&self) -> u32 {
        match self {
            GenomeInterval::Mapped { stop, .. } => *stop,
            GenomeInterval::Unmapped => 0,
        }
    }

    /// `name:start-stop` with the contig looked up in `contig_names`.
    /// Contigs missing from the dictionary print as their number.
    pub fn label(&self, contig_names: &[String]) -> String {
        match self {
            GenomeInterval::Mapped {
                contig,
                start,
                stop,
            } => match contig_names.get(*contig) {
                Some(name) => format!("{}:{}-{}", name, start, stop),
                None => self.to_string(),
            },
            GenomeInterval::Unmapped => self.to_string(),
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            GenomeInterval::Mapped { start, stop, .. } => stop - start + 1,
            GenomeInterval::Unmapped => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn on_same_contig(&self, other: &GenomeInterval) -> bool {
        matches!((self.contig(), other.contig()), (Some(a), Some(b)) if a == b)
    }

    pub fn overlaps(&self, other: &GenomeInterval) -> bool {
        if self.is_unmapped() || other.is_unmapped() {
            return self.is_unmapped() && other.is_unmapped();
        }
        self.on_same_contig(other) && self.overlaps_span(other.start(), other.stop())
    }

    /// Whether this interval overlaps bases `[start, stop]` of its own contig.
    pub fn overlaps_span(&self, start: u32, stop: u32) -> bool {
        match self {
            GenomeInterval::Mapped {
                start: s, stop: e, ..
            } => !(*e < start || *s > stop),
            GenomeInterval::Unmapped => false,
        }
    }

    pub fn intersect(&self, other: &GenomeInterval) -> Option<GenomeInterval> {
        if !self.overlaps(other) {
            return None;
        }
        if self.is_unmapped() {
            return Some(GenomeInterval::Unmapped);
        }
        self.clamp(other.start(), other.stop())
    }

    /// Restricts this interval to bases `[start, stop]` of its own contig.
    pub fn clamp(&self, start: u32, stop: u32) -> Option<GenomeInterval> {
        match *self {
            GenomeInterval::Mapped {
                contig,
                start: s,
                stop: e,
            } => {
                let new_start = s.max(start);
                let new_stop = e.min(stop);
                (new_start <= new_stop).then_some(GenomeInterval::Mapped {
                    contig,
                    start: new_start,
                    stop: new_stop,
                })
            }
            GenomeInterval::Unmapped => None,
        }
    }

    /// Splits into `[start, point - 1]` and `[point, stop]`.
    ///
    /// Returns `None` unless `start < point <= stop`.
    pub fn split_at(&self, point: u32) -> Option<(GenomeInterval, GenomeInterval)> {
        match *self {
            GenomeInterval::Mapped { contig, start, stop } if start < point && point <= stop => {
                Some((
                    GenomeInterval::Mapped {
                        contig,
                        start,
                        stop: point - 1,
                    },
                    GenomeInterval::Mapped {
                        contig,
                        start: point,
                        stop,
                    },
                ))
            }
            _ => None,
        }
    }

    /// Takes at most `max_len` leading bases, returning the head and whatever remains.
    pub fn take_head(&self, max_len: u32) -> (GenomeInterval, Option<GenomeInterval>) {
        if self.is_unmapped() || max_len == 0 || self.len() <= max_len {
            return (*self, None);
        }
        match self.split_at(self.start() + max_len) {
            Some((head, rest)) => (head, Some(rest)),
            None => (*self, None),
        }
    }

    /// Returns the part of this interval after base `stop`, if any.
    pub fn remainder_after(&self, stop: u32) -> Option<GenomeInterval> {
        match *self {
            GenomeInterval::Mapped {
                contig,
                start,
                stop: e,
            } if stop < e => Some(GenomeInterval::Mapped {
                contig,
                start: start.max(stop + 1),
                stop: e,
            }),
            _ => None,
        }
    }

    /// Overlapping or directly abutting on the same contig.
    pub fn is_contiguous(&self, other: &GenomeInterval) -> bool {
        if self.is_unmapped() || other.is_unmapped() {
            return self.is_unmapped() && other.is_unmapped();
        }
        self.on_same_contig(other)
            && u64::from(self.start()) <= u64::from(other.stop()) + 1
            && u64::from(other.start()) <= u64::from(self.stop()) + 1
    }

    /// Span of two contiguous intervals.
    pub fn merge(&self, other: &GenomeInterval) -> Option<GenomeInterval> {
        if !self.is_contiguous(other) {
            return None;
        }
        match (*self, *other) {
            (
                GenomeInterval::Mapped {
                    contig,
                    start: a,
                    stop: b,
                },
                GenomeInterval::Mapped {
                    start: c, stop: d, ..
                },
            ) => Some(GenomeInterval::Mapped {
                contig,
                start: a.min(c),
                stop: b.max(d),
            }),
            _ => Some(GenomeInterval::Unmapped),
        }
    }
}

impl fmt::Display for GenomeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeInterval::Mapped {
                contig,
                start,
                stop,
            } => write!(f, "{}:{}-{}", contig, start, stop),
            GenomeInterval::Unmapped => write!(f, "unmapped"),
        }
    }
}

/// How neighbouring intervals collapse when sorted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRule {
    /// Merge overlapping and abutting intervals.
    #[default]
    All,
    /// Merge only intervals sharing at least one base.
    OverlappingOnly,
}

impl MergeRule {
    fn joins(&self, a: &GenomeInterval, b: &GenomeInterval) -> bool {
        match self {
            MergeRule::All => a.is_contiguous(b),
            MergeRule::OverlappingOnly => a.overlaps(b),
        }
    }
}

/// Sorts intervals and collapses neighbours according to `rule`.
pub fn sort_and_merge(
    intervals: impl IntoIterator<Item = GenomeInterval>,
    rule: MergeRule,
) -> Vec<GenomeInterval> {
    let mut sorted: Vec<GenomeInterval> = intervals.into_iter().collect();
    sorted.sort();

    let mut merged: Vec<GenomeInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if rule.joins(last, &interval) => {
                if let Some(joined) = last.merge(&interval) {
                    *last = joined;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Sorted, disjoint intervals shared between the scheduler and its cursor.
#[derive(Debug, Clone, Default)]
pub struct IntervalSet {
    intervals: Arc<Vec<GenomeInterval>>,
}

impl IntervalSet {
    pub fn new(intervals: impl IntoIterator<Item = GenomeInterval>, rule: MergeRule) -> Self {
        Self {
            intervals: Arc::new(sort_and_merge(intervals, rule)),
        }
    }

    /// One whole-contig interval per non-empty sequence of the dictionary.
    pub fn from_sequence_lengths(lengths: &[u32]) -> Self {
        let intervals = lengths
            .iter()
            .enumerate()
            .filter(|(_, len)| **len > 0)
            .map(|(contig, len)| GenomeInterval::Mapped {
                contig,
                start: 1,
                stop: *len,
            })
            .collect();
        Self {
            intervals: Arc::new(intervals),
        }
    }

    /// Appends the unmapped sentinel if it is not already present.
    pub fn with_unmapped(self) -> Self {
        if self.contains_unmapped() {
            return self;
        }
        let mut intervals = self.intervals.as_ref().clone();
        intervals.push(GenomeInterval::Unmapped);
        Self {
            intervals: Arc::new(intervals),
        }
    }

    pub fn contains_unmapped(&self) -> bool {
        self.intervals.last().is_some_and(GenomeInterval::is_unmapped)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GenomeInterval> {
        self.intervals.iter()
    }

    pub fn as_slice(&self) -> &[GenomeInterval] {
        &self.intervals
    }

    /// Every interval on the given contig, in order.
    pub fn on_contig(&self, contig: usize) -> &[GenomeInterval] {
        let lower = self
            .intervals
            .partition_point(|i| matches!(i, GenomeInterval::Mapped { contig: c, .. } if *c < contig));
        let upper = self
            .intervals
            .partition_point(|i| matches!(i, GenomeInterval::Mapped { contig: c, .. } if *c <= contig));
        &self.intervals[lower..upper]
    }

    pub fn cursor(&self) -> IntervalCursor {
        IntervalCursor {
            set: self.clone(),
            next: 0,
        }
    }
}

/// Peekable, forward-only position within an [`IntervalSet`].
#[derive(Debug, Clone)]
pub struct IntervalCursor {
    set: IntervalSet,
    next: usize,
}

impl IntervalCursor {
    pub fn peek(&self) -> Option<&GenomeInterval> {
        self.set.intervals.get(self.next)
    }
}

impl Iterator for IntervalCursor {
    type Item = GenomeInterval;

    fn next(&mut self) -> Option<GenomeInterval> {
        let interval = self.set.intervals.get(self.next).copied();
        if interval.is_some() {
            self.next += 1;
        }
        interval
    }
}
