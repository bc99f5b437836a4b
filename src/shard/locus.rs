use super::{ReadMetrics, Shard};
use crate::Result;
use crate::schedule::FilePointer;
use std::marker::PhantomData;

/// One shard per file pointer. Shard size is bounded by the scheduler's
/// interval cap rather than a record count.
pub struct LocusShardBalancer<I, R> {
    pointers: I,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> LocusShardBalancer<I, R>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    pub fn new(pointers: I) -> Self {
        Self {
            pointers,
            _record: PhantomData,
        }
    }
}

fn pointer_metrics(pointer: &FilePointer) -> ReadMetrics {
    ReadMetrics {
        shards: 1,
        bytes_scheduled: pointer.size(),
        ..ReadMetrics::default()
    }
}

impl<I, R> Iterator for LocusShardBalancer<I, R>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    type Item = Result<Shard<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        let pointer = match self.pointers.next()? {
            Ok(pointer) => pointer,
            Err(e) => return Some(Err(e)),
        };

        let metrics = pointer_metrics(&pointer);
        let shard = if pointer.is_monolithic() {
            Shard::Monolithic { pointer, metrics }
        } else {
            Shard::Locus { pointer, metrics }
        };
        Some(Ok(shard))
    }
}

/// Folds every pointer into a single shard covering all inputs.
pub struct MonolithicShardBalancer<I, R> {
    pointers: Option<I>,
    _record: PhantomData<fn() -> R>,
}

impl<I, R> MonolithicShardBalancer<I, R>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    pub fn new(pointers: I) -> Self {
        Self {
            pointers: Some(pointers),
            _record: PhantomData,
        }
    }
}

impl<I, R> Iterator for MonolithicShardBalancer<I, R>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    type Item = Result<Shard<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        let pointers = self.pointers.take()?;
        let shard = pointers
            .collect::<Result<Vec<FilePointer>>>()
            .and_then(|all| {
                if all.is_empty() {
                    return Ok(None);
                }
                let pointer = FilePointer::monolithic_union(&all)?;
                let metrics = pointer_metrics(&pointer);
                Ok(Some(Shard::Monolithic { pointer, metrics }))
            });
        shard.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Chunk, ChunkList};
    use crate::shard::MetricsHandle;
    use crate::interval::{GenomeInterval, MergeRule};
    use crate::types::ReaderId;
    use std::collections::BTreeMap;

    fn pointer(contig: usize, start: u32, chunk: (u64, u64)) -> FilePointer {
        FilePointer::with_spans(
            BTreeMap::from([(ReaderId::new(0), ChunkList::from_chunk(Chunk::from_raw(chunk.0, chunk.1)))]),
            MergeRule::All,
            vec![GenomeInterval::new(contig, start, start + 99).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_one_locus_shard_per_pointer() {
        let metrics = MetricsHandle::new();
        let pointers = vec![pointer(0, 1, (0, 100)), pointer(0, 101, (0, 100)), pointer(1, 1, (200, 300))];
        let shards: Vec<Shard<()>> = LocusShardBalancer::new(pointers.into_iter().map(Ok))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(shards.len(), 3);
        assert!(shards.iter().all(|s| s.kind() == "locus"));
        assert!(shards.iter().all(|s| s.metrics().shards == 1));
        assert_eq!(metrics.snapshot().unwrap().shards, 0);

        for shard in shards {
            shard.close(&metrics).unwrap();
        }
        assert_eq!(metrics.snapshot().unwrap().shards, 3);
    }

    #[test]
    fn test_monolithic_shard_unions_everything() {
        let pointers = vec![pointer(0, 1, (0, 100)), pointer(1, 1, (100, 300))];
        let shards: Vec<Shard<()>> = MonolithicShardBalancer::new(pointers.into_iter().map(Ok))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].metrics().shards, 1);
        let pointer = shards[0].pointer();
        assert!(pointer.is_monolithic());
        assert_eq!(pointer.intervals().len(), 2);
        assert_eq!(
            pointer.span(ReaderId::new(0)).unwrap().chunks(),
            &[Chunk::from_raw(0, 300)]
        );
    }

    #[test]
    fn test_monolithic_without_pointers_is_empty() {
        let shards: Vec<Result<Shard<()>>> =
            MonolithicShardBalancer::new(std::iter::empty()).collect();
        assert!(shards.is_empty());
    }
}
