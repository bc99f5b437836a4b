use serde::Serialize;
use std::fmt;

/// Identity of one opened BAM input; ordering follows the order inputs were given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ReaderId(usize);

impl ReaderId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader#{}", self.0)
    }
}

/// Record order declared by a BAM header (`@HD SO:`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Unsorted,
    Coordinate,
    Queryname,
}

impl SortOrder {
    pub fn from_header_value(value: &str) -> Self {
        match value {
            "coordinate" => SortOrder::Coordinate,
            "queryname" => SortOrder::Queryname,
            _ => SortOrder::Unsorted,
        }
    }
}

/// Virtual-offset span, printable as `block:offset-block:offset`
#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub start: String,
    pub end: String,
}

/// Per-reader byte ranges of a file pointer or shard
#[derive(Debug, Clone, Serialize)]
pub struct SpanSummary {
    pub reader: ReaderId,
    pub chunks: Vec<ChunkSummary>,
    pub approximate_bytes: u64,
}

/// One line of CLI output
#[derive(Debug, Clone, Serialize)]
pub struct ShardSummary {
    pub kind: &'static str,
    pub intervals: Vec<String>,
    pub unmapped: bool,
    pub spans: Vec<SpanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
}
