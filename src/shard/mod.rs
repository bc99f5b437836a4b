//! Cutting the file-pointer stream into units of work.

pub mod locus;
pub mod read;

pub use locus::{LocusShardBalancer, MonolithicShardBalancer};
pub use read::ReadShardBalancer;

use crate::index::ChunkList;
use crate::schedule::FilePointer;
use crate::types::{ReaderId, ShardSummary};
use crate::{Error, Result};
use noodles::bgzf::VirtualPosition;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A unit of work handed to analysis code.
///
/// Each shard carries the metrics of its own production. They reach the
/// traversal totals only when the consumer calls [`Shard::close`]; a shard
/// dropped without closing is not counted.
#[derive(Debug, Clone)]
pub enum Shard<R> {
    /// Up to a fixed number of records cut from one file pointer.
    Read {
        pointer: FilePointer,
        records: Vec<R>,
        metrics: ReadMetrics,
    },
    /// One file pointer, bounded by interval length.
    Locus {
        pointer: FilePointer,
        metrics: ReadMetrics,
    },
    /// Every byte of every input.
    Monolithic {
        pointer: FilePointer,
        metrics: ReadMetrics,
    },
}

impl<R> Shard<R> {
    pub fn kind(&self) -> &'static str {
        match self {
            Shard::Read { .. } => "read",
            Shard::Locus { .. } => "locus",
            Shard::Monolithic { .. } => "monolithic",
        }
    }

    pub fn pointer(&self) -> &FilePointer {
        match self {
            Shard::Read { pointer, .. } | Shard::Locus { pointer, .. } | Shard::Monolithic { pointer, .. } => {
                pointer
            }
        }
    }

    pub fn metrics(&self) -> &ReadMetrics {
        match self {
            Shard::Read { metrics, .. } | Shard::Locus { metrics, .. } | Shard::Monolithic { metrics, .. } => {
                metrics
            }
        }
    }

    /// Releases the shard, adding its metrics to the traversal totals.
    pub fn close(self, totals: &MetricsHandle) -> Result<()> {
        totals.merge(self.metrics())
    }

    /// Buffered records; empty for shards that stream their data.
    pub fn records(&self) -> &[R] {
        match self {
            Shard::Read { records, .. } => records,
            _ => &[],
        }
    }

    /// Printable form of the shard, naming contigs from `contig_names`.
    pub fn summary(&self, contig_names: &[String]) -> ShardSummary {
        let pointer = self.pointer();
        ShardSummary {
            kind: self.kind(),
            intervals: pointer.intervals().iter().map(|i| i.label(contig_names)).collect(),
            unmapped: pointer.is_unmapped(),
            spans: pointer.span_summaries(),
            records: match self {
                Shard::Read { records, .. } => Some(records.len()),
                _ => None,
            },
        }
    }
}

/// Counters for one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadMetrics {
    pub shards: u64,
    pub records: u64,
    pub bytes_scheduled: u64,
    pub overlaps_trimmed: u64,
    pub empty_pointers_skipped: u64,
}

impl ReadMetrics {
    pub fn merge(&mut self, other: &ReadMetrics) {
        self.shards += other.shards;
        self.records += other.records;
        self.bytes_scheduled += other.bytes_scheduled;
        self.overlaps_trimmed += other.overlaps_trimmed;
        self.empty_pointers_skipped += other.empty_pointers_skipped;
    }
}

/// Metrics shared between balancers, possibly on different threads.
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle(Arc<Mutex<ReadMetrics>>);

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, metrics: &ReadMetrics) -> Result<()> {
        self.0
            .lock()
            .map_err(|_| Error::Internal("metrics lock poisoned".to_string()))?
            .merge(metrics);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<ReadMetrics> {
        self.0
            .lock()
            .map(|m| *m)
            .map_err(|_| Error::Internal("metrics lock poisoned".to_string()))
    }
}

/// Per-traversal state: how far each reader has been delivered, and where
/// metrics go.
#[derive(Debug, Clone, Default)]
pub struct TraversalContext {
    watermarks: BTreeMap<ReaderId, VirtualPosition>,
    metrics: MetricsHandle,
}

impl TraversalContext {
    pub fn new(metrics: MetricsHandle) -> Self {
        Self {
            watermarks: BTreeMap::new(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsHandle {
        &self.metrics
    }

    pub fn watermark(&self, reader: ReaderId) -> Option<VirtualPosition> {
        self.watermarks.get(&reader).copied()
    }

    /// Records delivery up to `position`. Watermarks never move backward.
    pub fn advance(&mut self, reader: ReaderId, position: VirtualPosition) {
        let mark = self.watermarks.entry(reader).or_insert(position);
        if position > *mark {
            *mark = position;
        }
    }

    /// `pointer` with every span clipped to start at its reader's watermark,
    /// and whether anything was removed.
    pub fn trim(&self, pointer: &FilePointer) -> (FilePointer, bool) {
        let mut trimmed = pointer.clone();
        let mut changed = false;
        for (reader, span) in pointer.spans() {
            let Some(mark) = self.watermark(*reader) else {
                continue;
            };
            let remaining: ChunkList = span.remove_contents_before(mark);
            if remaining != *span {
                changed = true;
                trimmed.add_span(*reader, remaining);
            }
        }
        (trimmed, changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Chunk;
    use crate::index::chunk::make_position;
    use crate::interval::{GenomeInterval, MergeRule};

    fn pointer(start: u64, end: u64) -> FilePointer {
        FilePointer::with_spans(
            BTreeMap::from([(
                ReaderId::new(0),
                ChunkList::from_chunk(Chunk::new(make_position(start, 0), make_position(end, 0))),
            )]),
            MergeRule::All,
            vec![GenomeInterval::new(0, 1, 100).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_metrics_merge() {
        let handle = MetricsHandle::new();
        let shard = ReadMetrics {
            shards: 1,
            records: 3,
            ..ReadMetrics::default()
        };
        handle.merge(&shard).unwrap();
        handle.clone().merge(&shard).unwrap();
        let total = handle.snapshot().unwrap();
        assert_eq!(total.shards, 2);
        assert_eq!(total.records, 6);
    }

    #[test]
    fn test_watermarks_only_advance() {
        let mut context = TraversalContext::default();
        let reader = ReaderId::new(0);
        context.advance(reader, make_position(500, 0));
        context.advance(reader, make_position(100, 0));
        assert_eq!(context.watermark(reader), Some(make_position(500, 0)));
    }

    #[test]
    fn test_trim_clips_consumed_bytes() {
        let mut context = TraversalContext::default();
        let (untouched, changed) = context.trim(&pointer(100, 900));
        assert!(!changed);
        assert_eq!(untouched, pointer(100, 900));

        context.advance(ReaderId::new(0), make_position(400, 0));
        let (trimmed, changed) = context.trim(&pointer(100, 900));
        assert!(changed);
        assert_eq!(trimmed, pointer(400, 900));

        let (gone, changed) = context.trim(&pointer(100, 300));
        assert!(changed);
        assert!(gone.has_no_data());
    }

    #[test]
    fn test_summary() {
        let shard: Shard<()> = Shard::Read {
            pointer: pointer(0, 1),
            records: vec![(), ()],
            metrics: ReadMetrics::default(),
        };
        let summary = shard.summary(&["chr1".to_string()]);
        assert_eq!(summary.kind, "read");
        assert_eq!(summary.records, Some(2));
        assert_eq!(summary.intervals, vec!["chr1:1-100".to_string()]);

        let locus: Shard<()> = Shard::Locus {
            pointer: pointer(0, 1),
            metrics: ReadMetrics::default(),
        };
        assert!(locus.records().is_empty());
        assert_eq!(locus.summary(&[]).intervals, vec!["0:1-100".to_string()]);
    }

    #[test]
    fn test_close_merges_shard_metrics() {
        let totals = MetricsHandle::new();
        let shard: Shard<()> = Shard::Locus {
            pointer: pointer(0, 1),
            metrics: ReadMetrics {
                shards: 1,
                bytes_scheduled: 42,
                ..ReadMetrics::default()
            },
        };
        let copy = shard.clone();
        assert_eq!(totals.snapshot().unwrap(), ReadMetrics::default());

        shard.close(&totals).unwrap();
        assert_eq!(totals.snapshot().unwrap().bytes_scheduled, 42);

        drop(copy);
        assert_eq!(totals.snapshot().unwrap().shards, 1);
    }
}
