use super::bam_schedule::{BamSchedule, ScheduleEntry};
use super::{FilePointer, ReaderIndex};
use crate::index::{Chunk, ChunkList};
use crate::interval::{GenomeInterval, IntervalCursor, IntervalSet, MergeRule};
use crate::types::ReaderId;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Largest interval stretch emitted in one pointer when no index data covers it.
pub const MAX_UNCOVERED_SPAN: u32 = 16384;

/// Lazily turns an interval set into [`FilePointer`]s, one per call to `next`.
pub struct Scheduler {
    readers: Vec<ReaderIndex>,
    merge_rule: MergeRule,
    intervals: IntervalSet,
    cursor: IntervalCursor,
    current: Option<GenomeInterval>,
    schedule: Option<BamSchedule>,
    pending: Option<FilePointer>,
}

impl Scheduler {
    /// Schedules reads overlapping `intervals`.
    ///
    /// When any reader has no index, a single monolithic pointer carrying every
    /// interval is produced instead.
    pub fn over_intervals(readers: Vec<ReaderIndex>, intervals: IntervalSet, merge_rule: MergeRule) -> Self {
        let fully_indexed = !readers.is_empty() && readers.iter().all(|r| r.index.is_some());
        let mut cursor = intervals.cursor();

        let (current, pending) = if fully_indexed {
            (cursor.next(), None)
        } else {
            tracing::info!("not every input is indexed; scheduling one pointer over all files");
            let pointer = Self::entire_fileset(&readers, merge_rule, intervals.as_slice().to_vec());
            (None, Some(pointer))
        };

        Self {
            readers,
            merge_rule,
            intervals,
            cursor,
            current,
            schedule: None,
            pending,
        }
    }

    /// Schedules every mapped read: one whole-contig interval per sequence.
    pub fn over_mapped_reads(readers: Vec<ReaderIndex>, sequence_lengths: &[u32]) -> Self {
        Self::over_intervals(
            readers,
            IntervalSet::from_sequence_lengths(sequence_lengths),
            MergeRule::All,
        )
    }

    /// A single monolithic pointer from each reader's first record to end of file.
    pub fn over_all_reads(readers: Vec<ReaderIndex>) -> Self {
        let pointer = Self::entire_fileset(&readers, MergeRule::All, Vec::new());
        Self {
            readers,
            merge_rule: MergeRule::All,
            intervals: IntervalSet::default(),
            cursor: IntervalSet::default().cursor(),
            current: None,
            schedule: None,
            pending: Some(pointer),
        }
    }

    fn entire_fileset(readers: &[ReaderIndex], merge_rule: MergeRule, intervals: Vec<GenomeInterval>) -> FilePointer {
        let spans = readers
            .iter()
            .map(|r| (r.id, ChunkList::from_chunk(Chunk::to_end_of_file(r.first_record))))
            .collect();
        FilePointer::monolithic(spans, merge_rule, intervals)
    }

    fn empty_spans(&self) -> BTreeMap<ReaderId, ChunkList> {
        self.readers.iter().map(|r| (r.id, ChunkList::empty())).collect()
    }

    fn uncovered(&self, interval: GenomeInterval) -> Result<FilePointer> {
        FilePointer::with_spans(self.empty_spans(), self.merge_rule, vec![interval])
    }

    fn unmapped_pointer(&self) -> Result<FilePointer> {
        let mut spans = BTreeMap::new();
        for reader in &self.readers {
            let span = match &reader.index {
                Some(index) => match index.last_linear_bin_start()? {
                    Some(start) => ChunkList::from_chunk(Chunk::to_end_of_file(start)),
                    None => ChunkList::empty(),
                },
                None => ChunkList::empty(),
            };
            spans.insert(reader.id, span);
        }
        FilePointer::with_spans(spans, self.merge_rule, vec![GenomeInterval::Unmapped])
    }

    /// First schedule entry overlapping `interval`, rebuilding the contig
    /// schedule when the contig changes.
    fn next_overlapping_entry(&mut self, contig: usize, interval: &GenomeInterval) -> Result<Option<ScheduleEntry>> {
        if self.schedule.as_ref().map(BamSchedule::contig) != Some(contig) {
            let remaining: Vec<GenomeInterval> = self
                .intervals
                .on_contig(contig)
                .iter()
                .filter(|i| i.stop() >= interval.start())
                .copied()
                .collect();
            self.schedule = Some(BamSchedule::build(contig, &self.readers, &remaining)?);
        }
        Ok(self
            .schedule
            .as_mut()
            .and_then(|s| s.next_overlapping(interval).cloned()))
    }

    fn advance(&mut self) -> Result<Option<FilePointer>> {
        let Some(interval) = self.current else {
            return Ok(None);
        };

        let contig = match interval {
            GenomeInterval::Unmapped => {
                self.current = None;
                return self.unmapped_pointer().map(Some);
            }
            GenomeInterval::Mapped { contig, .. } => contig,
        };

        let Some(entry) = self.next_overlapping_entry(contig, &interval)? else {
            let (head, rest) = interval.take_head(MAX_UNCOVERED_SPAN);
            self.current = rest.or_else(|| self.cursor.next());
            return self.uncovered(head).map(Some);
        };

        if interval.start() < entry.start {
            let split_point = (entry.start - interval.start()).min(MAX_UNCOVERED_SPAN) + interval.start();
            let (prefix, suffix) = interval.split_at(split_point).ok_or_else(|| {
                Error::Internal(format!("cannot split {} at {}", interval, split_point))
            })?;
            self.current = Some(suffix);
            return self.uncovered(prefix).map(Some);
        }

        let covered = |i: &GenomeInterval| i.clamp(entry.start, entry.stop);
        let mut pointer = FilePointer::with_spans(entry.spans.clone(), self.merge_rule, Vec::new())?;
        if let Some(head) = covered(&interval) {
            pointer.add_interval(head)?;
        }

        let mut last = interval;
        loop {
            match self.cursor.peek() {
                Some(next) if next.contig() == Some(contig) && entry.overlaps(next) => {
                    let next = *next;
                    self.cursor.next();
                    if let Some(part) = covered(&next) {
                        pointer.add_interval(part)?;
                    }
                    last = next;
                }
                _ => break,
            }
        }

        self.current = last.remainder_after(entry.stop).or_else(|| self.cursor.next());
        Ok(Some(pointer))
    }
}

impl Iterator for Scheduler {
    type Item = Result<FilePointer>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(pointer) = self.pending.take() {
            return Some(Ok(pointer));
        }
        match self.advance() {
            Ok(Some(pointer)) => {
                tracing::debug!("scheduled {}", pointer);
                Some(Ok(pointer))
            }
            Ok(None) => None,
            Err(e) => {
                self.current = None;
                Some(Err(e))
            }
        }
    }
}
