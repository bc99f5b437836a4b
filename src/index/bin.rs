//! Arithmetic for the six-level BAM binning scheme.

use super::chunk::Chunk;

/// Largest genomic coordinate addressable by the binning scheme.
pub const BIN_GENOMIC_SPAN: u32 = 512 * 1024 * 1024;

/// First bin number of each level.
pub const LEVEL_STARTS: [u32; 6] = [0, 1, 9, 73, 585, 4681];

/// `(8^6 - 1) / 7 + 1`
pub const MAX_BINS: u32 = 37450;

/// Linear index windows are `1 << 14` = 16kb wide.
pub const LINEAR_INDEX_SHIFT: u32 = 14;

pub fn level_count() -> usize {
    LEVEL_STARTS.len()
}

pub fn first_bin_in_level(level: usize) -> u32 {
    LEVEL_STARTS[level]
}

pub fn level_size(level: usize) -> u32 {
    if level == level_count() - 1 {
        MAX_BINS - LEVEL_STARTS[level] - 1
    } else {
        LEVEL_STARTS[level + 1] - LEVEL_STARTS[level]
    }
}

pub fn level_for_bin(bin: u32) -> Option<usize> {
    if bin >= MAX_BINS {
        return None;
    }
    LEVEL_STARTS.iter().rposition(|start| bin >= *start)
}

fn bin_width(level: usize) -> u32 {
    BIN_GENOMIC_SPAN / level_size(level)
}

pub fn first_locus_in_bin(bin: u32) -> Option<u32> {
    let level = level_for_bin(bin)?;
    Some((bin - LEVEL_STARTS[level]) * bin_width(level) + 1)
}

pub fn last_locus_in_bin(bin: u32) -> Option<u32> {
    let level = level_for_bin(bin)?;
    Some((bin - LEVEL_STARTS[level] + 1) * bin_width(level))
}

/// Lowest-level (16kb) bin containing the 1-based `position`.
pub fn lowest_level_bin_for(position: u32) -> u32 {
    let level = level_count() - 1;
    let offset = position.saturating_sub(1) / bin_width(level);
    (LEVEL_STARTS[level] + offset).min(MAX_BINS - 1)
}

/// Bins on every coarser level that contain `bin`, nearest first.
pub fn parent_bins(bin: u32) -> Vec<u32> {
    let (Some(level), Some(first_locus)) = (level_for_bin(bin), first_locus_in_bin(bin)) else {
        return Vec::new();
    };
    (0..level)
        .rev()
        .map(|parent_level| first_locus / bin_width(parent_level) + LEVEL_STARTS[parent_level])
        .collect()
}

/// A bin of one reference sequence and the chunks recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    contig: usize,
    number: u32,
    chunks: Vec<Chunk>,
}

impl Bin {
    pub fn new(contig: usize, number: u32, chunks: Vec<Chunk>) -> Self {
        Self {
            contig,
            number,
            chunks,
        }
    }

    pub fn contig(&self) -> usize {
        self.contig
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn level(&self) -> Option<usize> {
        level_for_bin(self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(level_for_bin(0), Some(0));
        assert_eq!(level_for_bin(8), Some(1));
        assert_eq!(level_for_bin(9), Some(2));
        assert_eq!(level_for_bin(4680), Some(4));
        assert_eq!(level_for_bin(4681), Some(5));
        assert_eq!(level_for_bin(MAX_BINS - 1), Some(5));
        assert_eq!(level_for_bin(MAX_BINS), None);
        assert_eq!(level_size(5), 32768);
        assert_eq!(level_size(0), 1);
    }

    #[test]
    fn test_bin_loci() {
        assert_eq!(first_locus_in_bin(0), Some(1));
        assert_eq!(last_locus_in_bin(0), Some(BIN_GENOMIC_SPAN));
        assert_eq!(first_locus_in_bin(4681), Some(1));
        assert_eq!(last_locus_in_bin(4681), Some(16384));
        assert_eq!(first_locus_in_bin(4682), Some(16385));
        assert_eq!(first_locus_in_bin(2), Some(64 * 1024 * 1024 + 1));
    }

    #[test]
    fn test_lowest_level_bin_for() {
        assert_eq!(lowest_level_bin_for(1), 4681);
        assert_eq!(lowest_level_bin_for(16384), 4681);
        assert_eq!(lowest_level_bin_for(16385), 4682);
    }

    #[test]
    fn test_parent_bins() {
        assert_eq!(parent_bins(4681), vec![585, 73, 9, 1, 0]);
        assert_eq!(parent_bins(4682), vec![585, 73, 9, 1, 0]);
        // 16kb bin starting at 128kb sits in the second 128kb bin
        assert_eq!(parent_bins(4681 + 8)[0], 586);
        assert!(parent_bins(0).is_empty());
    }
}
