use crate::types::ChunkSummary;
use noodles::bgzf::VirtualPosition;
use std::fmt;

/// Average BAM compression ratio used to turn block-address distances into
/// approximate uncompressed byte counts.
const AVERAGE_BAM_COMPRESSION_RATIO: f64 = 3.9;

/// Packs a compressed block address and an in-block offset into a virtual position.
pub fn make_position(block_address: u64, block_offset: u16) -> VirtualPosition {
    VirtualPosition::from((block_address << 16) | u64::from(block_offset))
}

/// Virtual position standing for "end of file" in open-ended chunks.
pub fn end_of_file() -> VirtualPosition {
    VirtualPosition::from(u64::MAX)
}

/// A half-open `[start, end)` range of virtual positions in one BGZF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Chunk {
    start: VirtualPosition,
    end: VirtualPosition,
}

impl Chunk {
    pub fn new(start: VirtualPosition, end: VirtualPosition) -> Self {
        Self { start, end }
    }

    pub fn from_raw(start: u64, end: u64) -> Self {
        Self::new(VirtualPosition::from(start), VirtualPosition::from(end))
    }

    /// Chunk running from `start` to the end of the file.
    pub fn to_end_of_file(start: VirtualPosition) -> Self {
        Self::new(start, end_of_file())
    }

    pub fn start(&self) -> VirtualPosition {
        self.start
    }

    pub fn end(&self) -> VirtualPosition {
        self.end
    }

    pub fn block_start(&self) -> u64 {
        self.start.compressed()
    }

    pub fn block_end(&self) -> u64 {
        self.end.compressed()
    }

    pub fn block_offset_start(&self) -> u16 {
        self.start.uncompressed()
    }

    pub fn block_offset_end(&self) -> u16 {
        self.end.uncompressed()
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Chunk) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_adjacent_to(&self, other: &Chunk) -> bool {
        self.end == other.start || self.start == other.end
    }

    /// Approximate uncompressed size of the data covered by this chunk.
    ///
    /// The in-block offset term can outweigh the block distance and turn the
    /// estimate negative; its magnitude is used. A non-empty chunk is never 0.
    pub fn size(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let blocks = (self.block_end() - self.block_start()) as f64;
        let offsets = f64::from(self.block_offset_end()) - f64::from(self.block_offset_start());
        ((blocks * AVERAGE_BAM_COMPRESSION_RATIO + offsets).abs().round() as u64).max(1)
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            start: format_position(self.start),
            end: format_position(self.end),
        }
    }
}

fn format_position(position: VirtualPosition) -> String {
    if position == end_of_file() {
        "eof".to_string()
    } else {
        format!("{}:{}", position.compressed(), position.uncompressed())
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_position(self.start), format_position(self.end))
    }
}

/// An ordered list of chunks within one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkList {
    chunks: Vec<Chunk>,
}

impl ChunkList {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_chunk(chunk: Chunk) -> Self {
        Self {
            chunks: vec![chunk],
        }
    }

    /// Sorts `chunks`, drops everything ending at or before `minimum_offset`,
    /// and merges chunks that overlap or touch.
    pub fn optimized(mut chunks: Vec<Chunk>, minimum_offset: VirtualPosition) -> Self {
        chunks.sort();
        let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.end <= minimum_offset || chunk.is_empty() {
                continue;
            }
            match result.last_mut() {
                Some(last) if last.overlaps(&chunk) || last.is_adjacent_to(&chunk) => {
                    if chunk.end > last.end {
                        last.end = chunk.end;
                    }
                }
                _ => result.push(chunk),
            }
        }
        Self { chunks: result }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Chunk::is_empty)
    }

    pub fn size(&self) -> u64 {
        self.chunks.iter().map(Chunk::size).sum()
    }

    pub fn union(&self, other: &ChunkList) -> ChunkList {
        let mut chunks = self.chunks.clone();
        chunks.extend_from_slice(&other.chunks);
        ChunkList::optimized(chunks, VirtualPosition::from(0))
    }

    /// Everything in `self` that is not covered by `other`.
    pub fn minus(&self, other: &ChunkList) -> ChunkList {
        let mut remaining: Vec<Chunk> = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks.iter().filter(|c| !c.is_empty()) {
            let mut pieces = vec![*chunk];
            for cut in other.chunks.iter().filter(|c| !c.is_empty()) {
                pieces = pieces
                    .into_iter()
                    .flat_map(|piece| subtract(piece, cut))
                    .collect();
                if pieces.is_empty() {
                    break;
                }
            }
            remaining.extend(pieces);
        }
        ChunkList { chunks: remaining }
    }

    /// Drops every byte before `position`, clipping the chunk that straddles it.
    pub fn remove_contents_before(&self, position: VirtualPosition) -> ChunkList {
        let chunks = self
            .chunks
            .iter()
            .filter(|chunk| chunk.end > position)
            .map(|chunk| Chunk::new(chunk.start.max(position), chunk.end))
            .filter(|chunk| !chunk.is_empty())
            .collect();
        ChunkList { chunks }
    }

    pub fn summary(&self) -> Vec<ChunkSummary> {
        self.chunks.iter().map(Chunk::summary).collect()
    }
}

fn subtract(piece: Chunk, cut: &Chunk) -> Vec<Chunk> {
    if !piece.overlaps(cut) {
        return vec![piece];
    }
    let mut pieces = Vec::with_capacity(2);
    if piece.start < cut.start {
        pieces.push(Chunk::new(piece.start, cut.start));
    }
    if cut.end < piece.end {
        pieces.push(Chunk::new(cut.end, piece.end));
    }
    pieces
}

impl fmt::Display for ChunkList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.chunks.iter().map(Chunk::to_string).collect();
        write!(f, "{}", parts.join(";"))
    }
}

impl FromIterator<Chunk> for ChunkList {
    fn from_iter<T: IntoIterator<Item = Chunk>>(iter: T) -> Self {
        Self {
            chunks: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(block: u64, offset: u16) -> VirtualPosition {
        make_position(block, offset)
    }

    #[test]
    fn test_make_position_packs_bits() {
        let position = vp(0x1234, 0x56);
        assert_eq!(u64::from(position), (0x1234 << 16) | 0x56);
        assert_eq!(position.compressed(), 0x1234);
        assert_eq!(position.uncompressed(), 0x56);
    }

    #[test]
    fn test_union_merges_overlapping_and_touching() {
        let a = ChunkList::new(vec![Chunk::from_raw(100, 200), Chunk::from_raw(500, 600)]);
        let b = ChunkList::new(vec![Chunk::from_raw(200, 300), Chunk::from_raw(550, 700)]);
        let union = a.union(&b);
        assert_eq!(
            union.chunks(),
            &[Chunk::from_raw(100, 300), Chunk::from_raw(500, 700)]
        );
        assert_eq!(union, b.union(&a));
    }

    #[test]
    fn test_minus_splits_chunks() {
        let a = ChunkList::from_chunk(Chunk::from_raw(100, 1000));
        let b = ChunkList::new(vec![Chunk::from_raw(200, 300), Chunk::from_raw(900, 1200)]);
        let difference = a.minus(&b);
        assert_eq!(
            difference.chunks(),
            &[Chunk::from_raw(100, 200), Chunk::from_raw(300, 900)]
        );
        assert!(b.minus(&b).is_empty());
    }

    #[test]
    fn test_remove_contents_before() {
        let list = ChunkList::new(vec![Chunk::from_raw(100, 200), Chunk::from_raw(300, 400)]);
        let trimmed = list.remove_contents_before(VirtualPosition::from(150));
        assert_eq!(
            trimmed.chunks(),
            &[Chunk::from_raw(150, 200), Chunk::from_raw(300, 400)]
        );
        assert!(list.remove_contents_before(VirtualPosition::from(400)).is_empty());
    }

    #[test]
    fn test_size_weighs_block_distance() {
        let same_block = Chunk::new(vp(10, 100), vp(10, 300));
        assert_eq!(same_block.size(), 200);

        let across = Chunk::new(vp(10, 0), vp(20, 0));
        assert_eq!(across.size(), 39);

        assert_eq!(Chunk::from_raw(500, 100).size(), 0);
    }

    #[test]
    fn test_size_of_chunk_ending_early_in_next_block() {
        // one block apart, but ending far below where it started within the block
        let chunk = Chunk::new(vp(199, 65000), vp(200, 5));
        assert_eq!(chunk.size(), 64991);

        // offsets all but cancel the block term
        let tiny = Chunk::new(vp(10, 4), vp(11, 0));
        assert!(tiny.size() > 0);
        assert!(ChunkList::from_chunk(tiny).size() > 0);
    }

    #[test]
    fn test_optimized_drops_chunks_before_minimum() {
        let list = ChunkList::optimized(
            vec![
                Chunk::from_raw(400, 500),
                Chunk::from_raw(100, 200),
                Chunk::from_raw(450, 800),
            ],
            VirtualPosition::from(200),
        );
        assert_eq!(list.chunks(), &[Chunk::from_raw(400, 800)]);
    }
}
