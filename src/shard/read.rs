use super::{ReadMetrics, Shard, TraversalContext};
use crate::Result;
use crate::record::{RecordSource, ShardRecord};
use crate::schedule::FilePointer;
use crate::types::SortOrder;

/// The pointer currently being cut into shards, with its live record iterator.
struct ActivePointer<S: RecordSource> {
    pointer: FilePointer,
    records: S::Records,
    lookahead: Option<S::Record>,
}

/// Cuts file pointers into shards of at most `max_records` records.
///
/// Every pointer is first clipped to the per-reader watermarks so that bytes
/// already delivered by an earlier shard are never read twice. The record
/// iterator of a pointer lives across all shards cut from it.
///
/// Trims and skips are carried by the next shard emitted. Those left over once
/// the pointers run out go straight to the context's metrics handle.
pub struct ReadShardBalancer<I, S>
where
    I: Iterator<Item = Result<FilePointer>>,
    S: RecordSource,
{
    pointers: I,
    source: S,
    context: TraversalContext,
    max_records: usize,
    active: Option<ActivePointer<S>>,
    metrics: ReadMetrics,
    done: bool,
}

impl<I, S> ReadShardBalancer<I, S>
where
    I: Iterator<Item = Result<FilePointer>>,
    S: RecordSource,
{
    pub fn new(pointers: I, source: S, context: TraversalContext, max_records: usize) -> Self {
        Self {
            pointers,
            source,
            context,
            max_records: max_records.max(1),
            active: None,
            metrics: ReadMetrics::default(),
            done: false,
        }
    }

    /// Pulls pointers until one has bytes left after trimming.
    fn activate_next(&mut self) -> Result<bool> {
        while let Some(pointer) = self.pointers.next() {
            let pointer = pointer?;
            let (trimmed, changed) = self.context.trim(&pointer);
            if changed {
                tracing::warn!("trimmed already-delivered bytes from overlapping {}", pointer);
                self.metrics.overlaps_trimmed += 1;
            }
            if trimmed.has_no_data() {
                self.metrics.empty_pointers_skipped += 1;
                continue;
            }

            self.metrics.bytes_scheduled += trimmed.size();
            let records = self.source.records(&trimmed)?;
            self.active = Some(ActivePointer {
                pointer: trimmed,
                records,
                lookahead: None,
            });
            return Ok(true);
        }
        Ok(false)
    }

    fn pull(&mut self) -> Result<Option<S::Record>> {
        let Some(active) = self.active.as_mut() else {
            return Ok(None);
        };
        if let Some(record) = active.lookahead.take() {
            return Ok(Some(record));
        }
        match active.records.next() {
            Some(record) => record.map(Some),
            None => {
                self.active = None;
                Ok(None)
            }
        }
    }

    fn push_back(&mut self, record: S::Record) {
        if let Some(active) = self.active.as_mut() {
            active.lookahead = Some(record);
        }
    }

    fn deliver(&mut self, record: &S::Record) {
        self.context.advance(record.reader(), record.end_position());
    }

    /// Fills one shard from the active pointer.
    fn fill(&mut self) -> Result<Vec<S::Record>> {
        let mut records: Vec<S::Record> = Vec::new();
        while records.len() < self.max_records {
            let Some(record) = self.pull()? else {
                return Ok(records);
            };
            if records.first().is_some_and(|first| first.contig() != record.contig()) {
                self.push_back(record);
                return Ok(records);
            }
            self.deliver(&record);
            records.push(record);
        }

        if self.source.sort_order() == SortOrder::Queryname {
            while let Some(record) = self.pull()? {
                let same_name = records.last().is_some_and(|last| last.name() == record.name());
                if !same_name {
                    self.push_back(record);
                    break;
                }
                self.deliver(&record);
                records.push(record);
            }
        }
        Ok(records)
    }

    fn next_shard(&mut self) -> Result<Option<Shard<S::Record>>> {
        loop {
            if self.active.is_none() && !self.activate_next()? {
                let residual = std::mem::take(&mut self.metrics);
                if residual != ReadMetrics::default() {
                    self.context.metrics().merge(&residual)?;
                }
                return Ok(None);
            }

            let pointer = match self.active.as_ref() {
                Some(active) => active.pointer.clone(),
                None => continue,
            };
            let records = self.fill()?;
            if records.is_empty() {
                tracing::debug!("no records left in {}; skipping", pointer);
                self.metrics.empty_pointers_skipped += 1;
                continue;
            }

            self.metrics.shards += 1;
            self.metrics.records += records.len() as u64;
            let metrics = std::mem::take(&mut self.metrics);
            tracing::debug!("read shard with {} records from {}", records.len(), pointer);
            return Ok(Some(Shard::Read {
                pointer,
                records,
                metrics,
            }));
        }
    }
}

impl<I, S> Iterator for ReadShardBalancer<I, S>
where
    I: Iterator<Item = Result<FilePointer>>,
    S: RecordSource,
{
    type Item = Result<Shard<S::Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_shard() {
            Ok(Some(shard)) => Some(Ok(shard)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.active = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::chunk::make_position;
    use crate::index::{Chunk, ChunkList};
    use crate::interval::{GenomeInterval, MergeRule};
    use crate::shard::MetricsHandle;
    use crate::types::ReaderId;
    use noodles::bgzf::VirtualPosition;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    struct TestRecord {
        contig: usize,
        name: String,
        end: VirtualPosition,
    }

    impl ShardRecord for TestRecord {
        fn reader(&self) -> ReaderId {
            ReaderId::new(0)
        }

        fn end_position(&self) -> VirtualPosition {
            self.end
        }

        fn contig(&self) -> Option<usize> {
            Some(self.contig)
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    /// Serves every record whose end lies inside the pointer's span.
    struct TestSource {
        records: Vec<TestRecord>,
        order: SortOrder,
        opened: usize,
    }

    impl RecordSource for TestSource {
        type Record = TestRecord;
        type Records = std::vec::IntoIter<Result<TestRecord>>;

        fn sort_order(&self) -> SortOrder {
            self.order
        }

        fn records(&mut self, pointer: &FilePointer) -> Result<Self::Records> {
            self.opened += 1;
            let span = pointer.span(ReaderId::new(0)).cloned().unwrap_or_default();
            let selected: Vec<Result<TestRecord>> = self
                .records
                .iter()
                .filter(|r| {
                    span.chunks()
                        .iter()
                        .any(|c| c.start() < r.end && r.end <= c.end())
                })
                .cloned()
                .map(Ok)
                .collect();
            Ok(selected.into_iter())
        }
    }

    fn record(contig: usize, name: &str, block: u64) -> TestRecord {
        TestRecord {
            contig,
            name: name.to_string(),
            end: make_position(block, 0),
        }
    }

    fn pointer(start: u64, end: u64) -> FilePointer {
        FilePointer::with_spans(
            BTreeMap::from([(
                ReaderId::new(0),
                ChunkList::from_chunk(Chunk::new(make_position(start, 0), make_position(end, 0))),
            )]),
            MergeRule::All,
            vec![GenomeInterval::new(0, 1, 1000).unwrap()],
        )
        .unwrap()
    }

    fn balance(
        pointers: Vec<FilePointer>,
        records: Vec<TestRecord>,
        order: SortOrder,
        cap: usize,
    ) -> (Vec<Shard<TestRecord>>, MetricsHandle, usize) {
        let metrics = MetricsHandle::new();
        let mut balancer = ReadShardBalancer::new(
            pointers.into_iter().map(Ok),
            TestSource {
                records,
                order,
                opened: 0,
            },
            TraversalContext::new(metrics.clone()),
            cap,
        );
        let shards = balancer.by_ref().collect::<Result<Vec<_>>>().unwrap();
        let opened = balancer.source.opened;
        for shard in shards.iter().cloned() {
            shard.close(&metrics).unwrap();
        }
        (shards, metrics, opened)
    }

    #[test]
    fn test_seven_records_cap_three() {
        let records = (1..=7).map(|i| record(0, &format!("r{}", i), i * 10)).collect();
        let (shards, metrics, opened) = balance(vec![pointer(0, 100)], records, SortOrder::Coordinate, 3);

        let sizes: Vec<usize> = shards.iter().map(|s| s.records().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(opened, 1);

        let totals = metrics.snapshot().unwrap();
        assert_eq!(totals.shards, 3);
        assert_eq!(totals.records, 7);
    }

    #[test]
    fn test_skips_pointers_without_records() {
        let records = vec![record(0, "a", 50)];
        let (shards, metrics, _) = balance(
            vec![pointer(0, 10), pointer(10, 20), pointer(40, 60)],
            records,
            SortOrder::Coordinate,
            3,
        );
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].records().len(), 1);
        assert_eq!(metrics.snapshot().unwrap().empty_pointers_skipped, 2);
    }

    #[test]
    fn test_metrics_wait_for_close() {
        let metrics = MetricsHandle::new();
        let records = vec![record(0, "a", 5), record(0, "b", 15)];
        let mut balancer = ReadShardBalancer::new(
            vec![pointer(0, 10), pointer(10, 20), pointer(30, 40)].into_iter().map(Ok),
            TestSource {
                records,
                order: SortOrder::Coordinate,
                opened: 0,
            },
            TraversalContext::new(metrics.clone()),
            10,
        );

        let first = balancer.next().unwrap().unwrap();
        assert_eq!(first.metrics().records, 1);
        assert_eq!(metrics.snapshot().unwrap(), ReadMetrics::default());

        let second = balancer.next().unwrap().unwrap();
        assert!(balancer.next().is_none());
        // the trailing pointer holds no records and is counted at exhaustion
        assert_eq!(metrics.snapshot().unwrap().empty_pointers_skipped, 1);
        assert_eq!(metrics.snapshot().unwrap().shards, 0);

        first.close(&metrics).unwrap();
        second.close(&metrics).unwrap();
        let totals = metrics.snapshot().unwrap();
        assert_eq!(totals.shards, 2);
        assert_eq!(totals.records, 2);
    }

    #[test]
    fn test_overlapping_pointer_is_trimmed() {
        let records = (1..=4).map(|i| record(0, &format!("r{}", i), i * 10)).collect();
        let (shards, metrics, _) = balance(
            vec![pointer(0, 25), pointer(0, 45)],
            records,
            SortOrder::Coordinate,
            10,
        );

        let names: Vec<Vec<&str>> = shards
            .iter()
            .map(|s| s.records().iter().map(|r| r.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["r1", "r2"], vec!["r3", "r4"]]);
        assert_eq!(metrics.snapshot().unwrap().overlaps_trimmed, 1);
    }

    #[test]
    fn test_contig_change_ends_shard() {
        let records = vec![record(0, "a", 10), record(0, "b", 20), record(1, "c", 30)];
        let (shards, _, _) = balance(vec![pointer(0, 100)], records, SortOrder::Coordinate, 10);
        let sizes: Vec<usize> = shards.iter().map(|s| s.records().len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_queryname_keeps_mates_together() {
        let records = vec![
            record(0, "a", 10),
            record(0, "b", 20),
            record(0, "b", 30),
            record(0, "c", 40),
        ];
        let (shards, _, _) = balance(vec![pointer(0, 100)], records, SortOrder::Queryname, 2);
        let sizes: Vec<usize> = shards.iter().map(|s| s.records().len()).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn test_error_stops_balancer() {
        let mut balancer = ReadShardBalancer::new(
            vec![Err(crate::Error::Internal("bad pointer".to_string()))].into_iter(),
            TestSource {
                records: Vec::new(),
                order: SortOrder::Coordinate,
                opened: 0,
            },
            TraversalContext::default(),
            3,
        );
        assert!(balancer.next().unwrap().is_err());
        assert!(balancer.next().is_none());
    }
}
