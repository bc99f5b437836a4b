use crate::types::ReaderId;
use std::backtrace::Backtrace;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("corrupt index {}: {message}", path.display())]
    CorruptIndex { path: PathBuf, message: String },

    #[error(
        "invalid sequence number {contig} in index file {}: index holds {sequence_count} reference sequences",
        path.display()
    )]
    InvalidContig {
        path: PathBuf,
        contig: usize,
        sequence_count: usize,
    },

    #[error("{0}")]
    StreamIo(Arc<StreamFailure>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::CorruptIndex { .. } => "CorruptIndex",
            Error::InvalidContig { .. } => "InvalidContig",
            Error::StreamIo(_) => "StreamIO",
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "InvalidInput",
            Error::InvalidRange(_) => "InvalidRange",
            Error::Io(_) | Error::Internal(_) => "InternalError",
        }
    }

    pub(crate) fn corrupt_index(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::CorruptIndex {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A failure raised on a block streamer's producer thread.
///
/// Stored once behind an `Arc` so that every consumer call made after the
/// failure observes the same error, with the producer's backtrace attached.
#[derive(Debug)]
pub struct StreamFailure {
    pub reader: ReaderId,
    pub source_label: String,
    pub cause: io::Error,
    pub backtrace: Backtrace,
}

impl StreamFailure {
    pub fn new(reader: ReaderId, source_label: impl Into<String>, cause: io::Error) -> Self {
        Self {
            reader,
            source_label: source_label.into(),
            cause,
            backtrace: Backtrace::capture(),
        }
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): unable to retrieve BAM data from disk: {}",
            self.reader, self.source_label, self.cause
        )
    }
}

impl std::error::Error for StreamFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_corrupt_index_names_path() {
        let err = Error::corrupt_index("/data/sample.bam.bai", "bad magic");
        let message = err.to_string();
        assert!(message.contains("/data/sample.bam.bai"));
        assert!(message.contains("bad magic"));
        assert_eq!(err.error_type(), "CorruptIndex");
    }

    #[test]
    fn test_stream_failure_preserves_cause() {
        let failure = Arc::new(StreamFailure::new(
            ReaderId::new(3),
            "sample.bam",
            io::Error::new(io::ErrorKind::UnexpectedEof, "short block"),
        ));
        let err = Error::StreamIo(failure.clone());
        assert!(err.to_string().contains("short block"));
        assert!(err.to_string().contains("reader#3"));
        assert_eq!(failure.source().unwrap().to_string(), "short block");
    }
}
