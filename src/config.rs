use crate::interval::MergeRule;
use crate::stream::{DEFAULT_BUFFER_SIZE, StreamOptions};
use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Parser)]
#[command(name = "bamshard")]
#[command(about = "Schedule and shard BAM reads over genomic intervals")]
pub struct Config {
    /// BAM files to traverse (repeat the flag or separate with commas)
    #[arg(long = "bam", env = "BAMSHARD_BAM", value_delimiter = ',', required = true)]
    pub bams: Vec<PathBuf>,

    /// Region to traverse: `contig`, `contig:start-stop`, or `unmapped`
    #[arg(long = "interval")]
    pub intervals: Vec<RegionSpec>,

    /// Traverse every contig of the sequence dictionary, skipping unplaced reads
    #[arg(long, conflicts_with = "intervals")]
    pub mapped_only: bool,

    /// How file pointers are cut into shards
    #[arg(long, value_enum, default_value = "read")]
    pub strategy: Strategy,

    /// Maximum records per read shard
    #[arg(long, env = "BAMSHARD_READ_SHARD_SIZE", default_value = "10000")]
    pub read_shard_size: usize,

    /// Which neighbouring intervals are merged
    #[arg(long, value_enum, default_value = "all")]
    pub merge_rule: MergeRuleOption,

    /// Emit scheduler output without folding zero-cost neighbours
    #[arg(long)]
    pub no_coalesce: bool,

    /// Cross-check every decompressed block with a second decoder
    #[arg(long)]
    pub validate_blocks: bool,

    /// Stream buffer size in bytes
    #[arg(long, default_value = "65536")]
    pub buffer_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Read,
    Locus,
    Monolithic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MergeRuleOption {
    All,
    OverlappingOnly,
}

impl From<MergeRuleOption> for MergeRule {
    fn from(option: MergeRuleOption) -> Self {
        match option {
            MergeRuleOption::All => MergeRule::All,
            MergeRuleOption::OverlappingOnly => MergeRule::OverlappingOnly,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.bams.is_empty() {
            return Err(Error::InvalidInput("at least one BAM file is required".to_string()));
        }
        if self.read_shard_size == 0 {
            return Err(Error::InvalidInput("read shard size must be positive".to_string()));
        }
        if self.buffer_size < DEFAULT_BUFFER_SIZE {
            return Err(Error::InvalidInput(format!(
                "buffer size {} is below the minimum of {} bytes",
                self.buffer_size, DEFAULT_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            buffer_size: self.buffer_size,
            validate: self.validate_blocks,
        }
    }
}

/// A region as typed on the command line, before contig names are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSpec {
    Unmapped,
    Contig {
        name: String,
        /// 1-based inclusive bounds; `None` means the whole contig.
        bounds: Option<(u32, u32)>,
    },
}

impl FromStr for RegionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidRange("empty region".to_string()));
        }
        if s == "unmapped" {
            return Ok(RegionSpec::Unmapped);
        }

        // contig names may themselves contain ':'
        if let Some((name, range)) = s.rsplit_once(':') {
            if let Some(bounds) = parse_bounds(range)? {
                return Ok(RegionSpec::Contig {
                    name: name.to_string(),
                    bounds: Some(bounds),
                });
            }
        }
        Ok(RegionSpec::Contig {
            name: s.to_string(),
            bounds: None,
        })
    }
}

/// `start-stop` or a single position. `None` if `range` is not numeric at all.
fn parse_bounds(range: &str) -> Result<Option<(u32, u32)>> {
    let number = |text: &str| text.replace(',', "").parse::<u32>().ok();
    let bounds = match range.split_once('-') {
        Some((start, stop)) => match (number(start), number(stop)) {
            (Some(start), Some(stop)) => (start, stop),
            _ => return Ok(None),
        },
        None => match number(range) {
            Some(position) => (position, position),
            None => return Ok(None),
        },
    };

    if bounds.0 == 0 || bounds.0 > bounds.1 {
        return Err(Error::InvalidRange(format!(
            "region bounds {}-{} must satisfy 1 <= start <= stop",
            bounds.0, bounds.1
        )));
    }
    Ok(Some(bounds))
}

impl fmt::Display for RegionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionSpec::Unmapped => write!(f, "unmapped"),
            RegionSpec::Contig { name, bounds: None } => write!(f, "{}", name),
            RegionSpec::Contig {
                name,
                bounds: Some((start, stop)),
            } => write!(f, "{}:{}-{}", name, start, stop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["bamshard"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config(&["--bam", "a.bam"]);
        assert_eq!(config.bams, vec![PathBuf::from("a.bam")]);
        assert_eq!(config.strategy, Strategy::Read);
        assert_eq!(config.read_shard_size, 10000);
        assert_eq!(config.buffer_size, 65536);
        assert_eq!(MergeRule::from(config.merge_rule), MergeRule::All);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multiple_bams_and_intervals() {
        let config = config(&[
            "--bam",
            "a.bam,b.bam",
            "--interval",
            "chr1:100-200",
            "--interval",
            "unmapped",
            "--strategy",
            "locus",
            "--merge-rule",
            "overlapping-only",
        ]);
        assert_eq!(config.bams.len(), 2);
        assert_eq!(config.intervals.len(), 2);
        assert_eq!(config.intervals[1], RegionSpec::Unmapped);
        assert_eq!(config.strategy, Strategy::Locus);
        assert_eq!(MergeRule::from(config.merge_rule), MergeRule::OverlappingOnly);
    }

    #[test]
    fn test_validate_rejects_small_buffer() {
        let config = config(&["--bam", "a.bam", "--buffer-size", "1024"]);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_zero_shard_size() {
        let config = config(&["--bam", "a.bam", "--read-shard-size", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_region_spec_forms() {
        assert_eq!(
            "chr1".parse::<RegionSpec>().unwrap(),
            RegionSpec::Contig {
                name: "chr1".to_string(),
                bounds: None
            }
        );
        assert_eq!(
            "chr1:1,000-2,000".parse::<RegionSpec>().unwrap(),
            RegionSpec::Contig {
                name: "chr1".to_string(),
                bounds: Some((1000, 2000))
            }
        );
        assert_eq!(
            "chr2:50".parse::<RegionSpec>().unwrap(),
            RegionSpec::Contig {
                name: "chr2".to_string(),
                bounds: Some((50, 50))
            }
        );
        assert_eq!(
            "chrUn:KI270302v1".parse::<RegionSpec>().unwrap().to_string(),
            "chrUn:KI270302v1"
        );
        assert!("chr1:200-100".parse::<RegionSpec>().is_err());
        assert!("chr1:0-10".parse::<RegionSpec>().is_err());
        assert!("".parse::<RegionSpec>().is_err());
    }
}
