//! Per-contig schedule of lowest-level bins and the chunks each reader needs
//! to cover them.

use super::ReaderIndex;
use crate::index::bin::{self, MAX_BINS};
use crate::index::{ChunkList, ReferenceIndex};
use crate::interval::GenomeInterval;
use crate::types::ReaderId;
use crate::{Error, Result};
use std::collections::{BTreeMap, VecDeque};

/// One 16kb bin with the chunks every reader needs for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub start: u32,
    pub stop: u32,
    pub spans: BTreeMap<ReaderId, ChunkList>,
}

impl ScheduleEntry {
    /// Entry ends before the interval begins.
    pub fn is_before(&self, interval: &GenomeInterval) -> bool {
        self.stop < interval.start()
    }

    pub fn overlaps(&self, interval: &GenomeInterval) -> bool {
        interval.overlaps_span(self.start, self.stop)
    }
}

#[derive(Debug, Clone)]
struct ReaderEntry {
    start: u32,
    stop: u32,
    span: ChunkList,
}

/// Schedule for a single contig, consumed front to back.
#[derive(Debug)]
pub struct BamSchedule {
    contig: usize,
    entries: VecDeque<ScheduleEntry>,
}

impl BamSchedule {
    /// Builds the schedule for `contig` from every reader's index and the
    /// sorted intervals on that contig.
    pub fn build(contig: usize, readers: &[ReaderIndex], intervals: &[GenomeInterval]) -> Result<Self> {
        let mut per_reader = Vec::with_capacity(readers.len());
        for reader in readers {
            let index = reader.index.as_ref().ok_or_else(|| {
                Error::Internal(format!("{} has no index to schedule against", reader.id))
            })?;
            let reference = index.query_reference_sequence(contig)?;
            per_reader.push((reader.id, walk_bins(&reference, intervals)));
        }

        let entries = merge_readers(per_reader);
        tracing::debug!(
            "built schedule for contig {} over {} intervals: {} entries",
            contig,
            intervals.len(),
            entries.len()
        );

        Ok(Self { contig, entries })
    }

    pub fn contig(&self) -> usize {
        self.contig
    }

    /// Drops entries lying wholly before `interval` and returns the first
    /// remaining entry if it overlaps `interval`.
    pub fn next_overlapping(&mut self, interval: &GenomeInterval) -> Option<&ScheduleEntry> {
        while self.entries.front().is_some_and(|e| e.is_before(interval)) {
            self.entries.pop_front();
        }
        self.entries.front().filter(|e| e.overlaps(interval))
    }
}

fn bin_bounds(bin: u32) -> Option<(u32, u32)> {
    Some((bin::first_locus_in_bin(bin)?, bin::last_locus_in_bin(bin)?))
}

/// Walks the lowest-level bins in step with the intervals, keeping every bin
/// that overlaps an interval and has data.
fn walk_bins(reference: &ReferenceIndex, intervals: &[GenomeInterval]) -> Vec<ReaderEntry> {
    let mut entries = Vec::new();
    let mut loci = intervals.iter().filter(|i| !i.is_unmapped());
    let mut current = loci.next();
    let mut bin = bin::first_bin_in_level(bin::level_count() - 1);

    while bin < MAX_BINS {
        let Some(locus) = current else { break };
        let Some((start, stop)) = bin_bounds(bin) else { break };

        if stop < locus.start() {
            bin = bin.max(bin::lowest_level_bin_for(locus.start()));
            if bin::last_locus_in_bin(bin).is_some_and(|s| s < locus.start()) {
                bin += 1;
            }
            continue;
        }
        if start > locus.stop() {
            current = loci.next();
            continue;
        }

        let span = reference.span_overlapping(bin);
        if !span.is_empty() {
            entries.push(ReaderEntry { start, stop, span });
        }
        bin += 1;
    }

    entries
}

/// Merges per-reader entries by bin start. Readers without data at a given
/// start get an empty span.
fn merge_readers(per_reader: Vec<(ReaderId, Vec<ReaderEntry>)>) -> VecDeque<ScheduleEntry> {
    let ids: Vec<ReaderId> = per_reader.iter().map(|(id, _)| *id).collect();
    let mut queues: Vec<VecDeque<ReaderEntry>> = per_reader
        .into_iter()
        .map(|(_, entries)| entries.into())
        .collect();

    let mut merged = VecDeque::new();
    loop {
        let mut selected = vec![false; queues.len()];
        let mut current_start = u32::MAX;
        let mut current_stop = u32::MAX;

        for (i, queue) in queues.iter().enumerate() {
            let Some(entry) = queue.front() else { continue };
            if entry.start > current_start {
                continue;
            }
            if entry.start == current_start {
                selected[i] = true;
                current_stop = current_stop.min(entry.stop);
                continue;
            }
            selected.iter_mut().for_each(|s| *s = false);
            selected[i] = true;
            current_start = entry.start;
            current_stop = entry.stop;
        }

        if !selected.iter().any(|s| *s) {
            break;
        }

        let mut spans = BTreeMap::new();
        for (i, queue) in queues.iter_mut().enumerate() {
            if !selected[i] {
                spans.insert(ids[i], ChunkList::empty());
                continue;
            }
            if let Some(entry) = queue.front() {
                spans.insert(ids[i], entry.span.clone());
                if entry.stop <= current_stop {
                    queue.pop_front();
                }
            }
        }

        merged.push_back(ScheduleEntry {
            start: current_start,
            stop: current_stop,
            spans,
        });
    }

    merged
}
