use super::FilePointer;
use crate::Result;
use std::iter::Peekable;

/// Folds neighbouring pointers together while doing so adds no bytes to fetch.
pub struct Coalescer<I>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    inner: Peekable<I>,
}

impl<I> Coalescer<I>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    pub fn new(inner: I) -> Self {
        Self {
            inner: inner.peekable(),
        }
    }
}

fn joinable(current: &FilePointer, next: &FilePointer) -> bool {
    if current.is_unmapped() != next.is_unmapped() {
        return false;
    }
    if !current.is_unmapped() && current.contig() != next.contig() {
        return false;
    }
    next.minus(current) == 0
}

impl<I> Iterator for Coalescer<I>
where
    I: Iterator<Item = Result<FilePointer>>,
{
    type Item = Result<FilePointer>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut current = match self.inner.next()? {
            Ok(pointer) => pointer,
            Err(e) => return Some(Err(e)),
        };

        while let Some(Ok(next)) = self.inner.peek() {
            if !joinable(&current, next) {
                break;
            }
            current = match current.combine(next) {
                Ok(combined) => combined,
                Err(e) => return Some(Err(e)),
            };
            self.inner.next();
        }

        Some(Ok(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::index::chunk::make_position;
    use crate::index::{Chunk, ChunkList};
    use crate::interval::{GenomeInterval, MergeRule};
    use crate::types::ReaderId;
    use std::collections::BTreeMap;

    fn pointer(contig: usize, start: u32, stop: u32, chunk: Option<(u64, u64)>) -> FilePointer {
        let span = chunk
            .map(|(s, e)| ChunkList::from_chunk(Chunk::from_raw(s, e)))
            .unwrap_or_default();
        FilePointer::with_spans(
            BTreeMap::from([(ReaderId::new(0), span)]),
            MergeRule::All,
            vec![GenomeInterval::new(contig, start, stop).unwrap()],
        )
        .unwrap()
    }

    fn coalesce(pointers: Vec<FilePointer>) -> Vec<FilePointer> {
        Coalescer::new(pointers.into_iter().map(Ok))
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_merges_zero_cost_neighbours() {
        let merged = coalesce(vec![
            pointer(0, 1, 100, Some((0, 1000))),
            pointer(0, 101, 200, Some((0, 1000))),
            pointer(0, 201, 300, Some((100, 500))),
            pointer(0, 301, 400, Some((900, 2000))),
        ]);

        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[0].intervals(),
            &[GenomeInterval::new(0, 1, 300).unwrap()]
        );
        assert_eq!(
            merged[1].intervals(),
            &[GenomeInterval::new(0, 301, 400).unwrap()]
        );
    }

    #[test]
    fn test_keeps_pointer_reaching_into_next_block() {
        let current = make_position(100, 0);
        let next_start = make_position(150, 0);
        let merged = coalesce(vec![
            pointer(0, 1, 100, Some((current.into(), make_position(199, 65000).into()))),
            pointer(0, 101, 200, Some((next_start.into(), make_position(200, 5).into()))),
        ]);

        // the second pointer still needs [199:65000, 200:5)
        assert_eq!(merged.len(), 2);
        assert!(merged[1].minus(&merged[0]) > 0);
    }

    #[test]
    fn test_stops_at_contig_change_and_unmapped() {
        let unmapped = FilePointer::with_spans(
            BTreeMap::from([(ReaderId::new(0), ChunkList::empty())]),
            MergeRule::All,
            vec![GenomeInterval::UNMAPPED],
        )
        .unwrap();
        let merged = coalesce(vec![
            pointer(0, 1, 100, Some((0, 1000))),
            pointer(1, 1, 100, Some((0, 1000))),
            unmapped,
        ]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_lossless() {
        let raw = vec![
            pointer(0, 1, 100, Some((0, 1000))),
            pointer(0, 101, 200, None),
            pointer(0, 201, 300, Some((500, 3000))),
            pointer(0, 301, 400, Some((600, 700))),
            pointer(2, 1, 50, Some((4000, 5000))),
        ];
        let merged = coalesce(raw.clone());
        assert!(merged.len() < raw.len());

        let raw_union = FilePointer::monolithic_union(&raw).unwrap();
        let merged_union = FilePointer::monolithic_union(&merged).unwrap();
        assert_eq!(raw_union.intervals(), merged_union.intervals());
        assert_eq!(raw_union.spans(), merged_union.spans());
    }

    #[test]
    fn test_error_yielded_after_accumulated_pointer() {
        let input: Vec<Result<FilePointer>> = vec![
            Ok(pointer(0, 1, 100, Some((0, 1000)))),
            Err(Error::Internal("boom".to_string())),
            Ok(pointer(0, 101, 200, Some((0, 1000)))),
        ];
        let mut coalescer = Coalescer::new(input.into_iter());
        assert!(coalescer.next().unwrap().is_ok());
        assert!(coalescer.next().unwrap().is_err());
        assert!(coalescer.next().unwrap().is_ok());
        assert!(coalescer.next().is_none());
    }
}
