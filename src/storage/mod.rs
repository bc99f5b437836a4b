//! Opening BAM inputs from the local filesystem.
//!
//! Every input is opened once: its header is parsed, the position of its first
//! alignment record recorded, and its companion `.bai` index located. The
//! first input's sequence dictionary is the one regions are resolved against.

mod local;

pub use local::{BamInput, find_index, reference_names, sequence_lengths, sort_order};

use crate::config::RegionSpec;
use crate::interval::GenomeInterval;
use crate::record::SourceInput;
use crate::schedule::ReaderIndex;
use crate::types::ReaderId;
use crate::{Error, Result};
use noodles::sam;
use std::path::PathBuf;

/// All inputs of one traversal, in command-line order.
#[derive(Debug, Clone)]
pub struct InputSet {
    inputs: Vec<BamInput>,
}

impl InputSet {
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let inputs = paths
            .iter()
            .enumerate()
            .map(|(i, path)| BamInput::open(ReaderId::new(i), path))
            .collect::<Result<Vec<_>>>()?;
        if inputs.is_empty() {
            return Err(Error::InvalidInput("no BAM inputs given".to_string()));
        }

        let expected = inputs[0].header.reference_sequences().len();
        for input in &inputs[1..] {
            let count = input.header.reference_sequences().len();
            if count != expected {
                // TODO: resolve contigs by name per input once dictionaries may differ
                tracing::warn!(
                    "{} has {} references but {} has {}; contig indices follow {}",
                    input.path.display(),
                    count,
                    inputs[0].path.display(),
                    expected,
                    inputs[0].path.display()
                );
            }
        }
        Ok(Self { inputs })
    }

    pub fn inputs(&self) -> &[BamInput] {
        &self.inputs
    }

    /// Header whose dictionary defines contig indices.
    pub fn primary_header(&self) -> &sam::Header {
        &self.inputs[0].header
    }

    pub fn sequence_lengths(&self) -> Vec<u32> {
        sequence_lengths(self.primary_header())
    }

    /// Contig names indexed by contig number.
    pub fn contig_names(&self) -> Vec<String> {
        reference_names(self.primary_header())
    }

    pub fn reader_indices(&self) -> Vec<ReaderIndex> {
        self.inputs.iter().map(BamInput::reader_index).collect()
    }

    pub fn source_inputs(&self) -> Vec<SourceInput> {
        self.inputs
            .iter()
            .map(|input| SourceInput {
                id: input.id,
                path: input.path.clone(),
                sort_order: input.sort_order,
            })
            .collect()
    }

    /// Turns command-line regions into intervals, clamping stops to contig length.
    pub fn resolve(&self, regions: &[RegionSpec]) -> Result<Vec<GenomeInterval>> {
        let lengths = self.sequence_lengths();
        let dictionary = self.primary_header().reference_sequences();
        regions
            .iter()
            .map(|region| match region {
                RegionSpec::Unmapped => Ok(GenomeInterval::UNMAPPED),
                RegionSpec::Contig { name, bounds } => {
                    let contig = dictionary
                        .get_index_of(name.as_bytes())
                        .ok_or_else(|| Error::NotFound(format!("reference sequence not found: {}", name)))?;
                    let length = lengths[contig].max(1);
                    let (start, stop) = bounds.unwrap_or((1, length));
                    if start > length {
                        return Err(Error::InvalidRange(format!(
                            "{} starts past the end of {} ({} bases)",
                            region, name, length
                        )));
                    }
                    GenomeInterval::new(contig, start, stop.min(length))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SortOrder;
    use noodles::bgzf::VirtualPosition;

    fn input_set() -> InputSet {
        let header: sam::Header = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:500\n"
            .parse()
            .unwrap();
        InputSet {
            inputs: vec![BamInput {
                id: ReaderId::new(0),
                path: PathBuf::from("sample.bam"),
                sort_order: sort_order(&header),
                header,
                first_record: VirtualPosition::from(0),
                length: 0,
                index: None,
            }],
        }
    }

    #[test]
    fn test_resolve_regions() {
        let regions: Vec<RegionSpec> = ["chr2", "chr1:10-20", "chr1:900-5000", "unmapped"]
            .iter()
            .map(|r| r.parse().unwrap())
            .collect();
        let intervals = input_set().resolve(&regions).unwrap();
        assert_eq!(
            intervals,
            vec![
                GenomeInterval::new(1, 1, 500).unwrap(),
                GenomeInterval::new(0, 10, 20).unwrap(),
                GenomeInterval::new(0, 900, 1000).unwrap(),
                GenomeInterval::UNMAPPED,
            ]
        );
    }

    #[test]
    fn test_resolve_unknown_contig() {
        let regions: Vec<RegionSpec> = vec!["chrM".parse().unwrap()];
        assert!(matches!(input_set().resolve(&regions), Err(Error::NotFound(_))));
        let past_end: Vec<RegionSpec> = vec!["chr2:600-700".parse().unwrap()];
        assert!(matches!(input_set().resolve(&past_end), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_source_inputs_carry_sort_order() {
        let sources = input_set().source_inputs();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].sort_order, SortOrder::Coordinate);
    }

    #[test]
    fn test_contig_names_follow_dictionary() {
        let inputs = input_set();
        assert_eq!(inputs.contig_names(), vec!["chr1", "chr2"]);
        assert_eq!(inputs.sequence_lengths(), vec![1000, 500]);
    }
}
