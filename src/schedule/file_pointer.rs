use crate::index::ChunkList;
use crate::interval::{GenomeInterval, MergeRule, sort_and_merge};
use crate::types::{ReaderId, SpanSummary};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// A set of intervals paired with the per-reader chunks needed to read them.
///
/// Non-monolithic pointers hold intervals from at most one contig and never mix
/// mapped intervals with the unmapped sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePointer {
    intervals: Vec<GenomeInterval>,
    spans: BTreeMap<ReaderId, ChunkList>,
    unmapped: bool,
    monolithic: bool,
    merge_rule: MergeRule,
}

impl FilePointer {
    pub fn new(merge_rule: MergeRule, intervals: Vec<GenomeInterval>) -> Result<Self> {
        Self::with_spans(BTreeMap::new(), merge_rule, intervals)
    }

    pub fn with_spans(
        spans: BTreeMap<ReaderId, ChunkList>,
        merge_rule: MergeRule,
        intervals: Vec<GenomeInterval>,
    ) -> Result<Self> {
        let pointer = Self {
            unmapped: !intervals.is_empty() && intervals.iter().all(GenomeInterval::is_unmapped),
            intervals,
            spans,
            monolithic: false,
            merge_rule,
        };
        pointer.validate()?;
        Ok(pointer)
    }

    /// A pointer standing for every region of every file, allowed to span contigs.
    pub fn monolithic(
        spans: BTreeMap<ReaderId, ChunkList>,
        merge_rule: MergeRule,
        intervals: Vec<GenomeInterval>,
    ) -> Self {
        Self {
            intervals,
            spans,
            unmapped: false,
            monolithic: true,
            merge_rule,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.monolithic {
            return Ok(());
        }
        let unmapped = self.intervals.iter().filter(|i| i.is_unmapped()).count();
        if unmapped > 0 && unmapped < self.intervals.len() {
            return Err(Error::Internal(
                "file pointers cannot mix mapped and unmapped intervals".to_string(),
            ));
        }
        let mut contigs = self.intervals.iter().filter_map(GenomeInterval::contig);
        if let Some(first) = contigs.next() {
            if contigs.any(|c| c != first) {
                return Err(Error::Internal(
                    "non-monolithic file pointers must hold intervals from one contig".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn add_interval(&mut self, interval: GenomeInterval) -> Result<()> {
        if !self.monolithic {
            if !self.intervals.is_empty() && self.unmapped != interval.is_unmapped() {
                return Err(Error::Internal(
                    "file pointers cannot mix mapped and unmapped intervals".to_string(),
                ));
            }
            if let (Some(contig), Some(other)) = (self.contig(), interval.contig()) {
                if contig != other {
                    return Err(Error::Internal(format!(
                        "interval {} does not belong on contig {}",
                        interval, contig
                    )));
                }
            }
        }
        if self.intervals.is_empty() {
            self.unmapped = interval.is_unmapped() && !self.monolithic;
        }
        self.intervals.push(interval);
        Ok(())
    }

    pub fn add_span(&mut self, reader: ReaderId, span: ChunkList) {
        self.spans.insert(reader, span);
    }

    pub fn intervals(&self) -> &[GenomeInterval] {
        &self.intervals
    }

    pub fn spans(&self) -> &BTreeMap<ReaderId, ChunkList> {
        &self.spans
    }

    pub fn span(&self, reader: ReaderId) -> Option<&ChunkList> {
        self.spans.get(&reader)
    }

    pub fn is_unmapped(&self) -> bool {
        self.unmapped
    }

    pub fn is_monolithic(&self) -> bool {
        self.monolithic
    }

    pub fn merge_rule(&self) -> MergeRule {
        self.merge_rule
    }

    /// Contig of the first mapped interval.
    pub fn contig(&self) -> Option<usize> {
        self.intervals.iter().find_map(GenomeInterval::contig)
    }

    /// True when no reader has any bytes to fetch.
    pub fn has_no_data(&self) -> bool {
        self.spans.values().all(ChunkList::is_empty)
    }

    /// Approximate uncompressed bytes covered by all spans.
    pub fn size(&self) -> u64 {
        self.spans.values().map(ChunkList::size).sum()
    }

    /// Approximate bytes in `self` that `other` does not already cover.
    ///
    /// Readers present only in `other` add nothing.
    pub fn minus(&self, other: &FilePointer) -> u64 {
        self.spans
            .iter()
            .map(|(reader, span)| match other.spans.get(reader) {
                Some(covered) => span.minus(covered).size(),
                None => span.size(),
            })
            .sum()
    }

    /// Union of intervals and of per-reader chunk lists.
    pub fn combine(&self, other: &FilePointer) -> Result<FilePointer> {
        Self::union(&[self.clone(), other.clone()])
    }

    /// N-ary [`combine`](Self::combine). The result is monolithic if any input is.
    pub fn union(pointers: &[FilePointer]) -> Result<FilePointer> {
        let monolithic = pointers.iter().any(FilePointer::is_monolithic);
        Self::union_into(pointers, monolithic)
    }

    /// Union of every pointer as a single monolithic pointer.
    pub fn monolithic_union(pointers: &[FilePointer]) -> Result<FilePointer> {
        Self::union_into(pointers, true)
    }

    fn union_into(pointers: &[FilePointer], monolithic: bool) -> Result<FilePointer> {
        let merge_rule = pointers.first().map(|p| p.merge_rule).unwrap_or_default();
        if pointers.iter().any(|p| p.merge_rule != merge_rule) {
            return Err(Error::Internal(
                "all unioned file pointers must share one merge rule".to_string(),
            ));
        }

        let intervals = sort_and_merge(
            pointers.iter().flat_map(|p| p.intervals.iter().copied()),
            merge_rule,
        );

        let mut spans: BTreeMap<ReaderId, ChunkList> = BTreeMap::new();
        for pointer in pointers {
            for (reader, span) in &pointer.spans {
                let merged = match spans.get(reader) {
                    Some(existing) => existing.union(span),
                    None => span.union(&ChunkList::empty()),
                };
                spans.insert(*reader, merged);
            }
        }

        if monolithic {
            Ok(Self::monolithic(spans, merge_rule, intervals))
        } else {
            Self::with_spans(spans, merge_rule, intervals)
        }
    }

    pub fn span_summaries(&self) -> Vec<SpanSummary> {
        self.spans
            .iter()
            .map(|(reader, span)| SpanSummary {
                reader: *reader,
                chunks: span.summary(),
                approximate_bytes: span.size(),
            })
            .collect()
    }
}

impl fmt::Display for FilePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intervals: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(f, "FilePointer[{}]", intervals.join(", "))?;
        for (reader, span) in &self.spans {
            write!(f, " {}={{{}}}", reader, span)?;
        }
        Ok(())
    }
}
