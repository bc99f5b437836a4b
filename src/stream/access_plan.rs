use crate::index::chunk::make_position;
use crate::index::{Chunk, ChunkList};
use noodles::bgzf::VirtualPosition;

/// Position of a reader within the chunk list it was asked to deliver.
///
/// The chunk cursor only ever moves forward; `reset` rewinds to the start of
/// the list.
#[derive(Debug, Clone)]
pub struct AccessPlan {
    chunks: Vec<Chunk>,
    next_chunk: usize,
    next_block: Option<u64>,
}

impl AccessPlan {
    pub fn new(span: &ChunkList) -> Self {
        let chunks: Vec<Chunk> = span.chunks().to_vec();
        let mut plan = Self {
            chunks,
            next_chunk: 0,
            next_block: None,
        };
        plan.reset();
        plan
    }

    /// Plan over an entire file.
    pub fn whole_file() -> Self {
        Self::new(&ChunkList::from_chunk(Chunk::from_raw(0, u64::MAX)))
    }

    pub fn reset(&mut self) {
        self.next_chunk = 0;
        self.next_block = self.chunks.first().map(Chunk::block_start);
    }

    /// Compressed address of the next block to load, or `None` once exhausted.
    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// Moves the plan to `file_position`, skipping chunks that end at or before
    /// it and jumping ahead when it falls in a gap between chunks.
    pub fn advance_position(&mut self, file_position: VirtualPosition) {
        self.next_block = Some(file_position.compressed());

        while self
            .chunks
            .get(self.next_chunk)
            .is_some_and(|chunk| file_position >= chunk.end())
        {
            self.next_chunk += 1;
        }

        match self.chunks.get(self.next_chunk) {
            Some(chunk) if file_position < chunk.start() => self.next_block = Some(chunk.block_start()),
            Some(_) => {}
            None => self.next_block = None,
        }
    }

    /// Portions of the remaining chunks that fall inside the block at
    /// `block_address`, whose successor starts at `next_block_address`.
    ///
    /// Spans that continue past the block end at `next_block_address:0`.
    pub fn spans_overlapping_block(&mut self, block_address: u64, next_block_address: u64) -> Vec<Chunk> {
        let mut spans = Vec::new();
        while let Some(chunk) = self.chunks.get(self.next_chunk).copied() {
            if chunk.block_start() > block_address {
                break;
            }

            let offset_start = if chunk.block_start() == block_address {
                chunk.block_offset_start()
            } else {
                0
            };
            let end = if block_address < chunk.block_end() {
                make_position(next_block_address, 0)
            } else {
                chunk.end()
            };

            let span = Chunk::new(make_position(block_address, offset_start), end);
            if span.start() <= span.end() {
                spans.push(span);
            }

            if chunk.block_end() > block_address {
                break;
            }
            self.next_chunk += 1;
        }
        spans
    }

    /// Restarts the plan at `position`, dropping every byte before it.
    pub fn remove_before(&mut self, position: VirtualPosition) {
        let remaining = ChunkList::new(std::mem::take(&mut self.chunks)).remove_contents_before(position);
        self.chunks = remaining.into_chunks();
        self.reset();
    }
}
