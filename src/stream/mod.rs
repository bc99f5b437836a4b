//! Decompressed, chunk-restricted access to BAM files.

pub mod access_plan;
pub mod block_stream;
pub mod codec;

pub use access_plan::AccessPlan;
pub use block_stream::{BlockStreamer, DEFAULT_BUFFER_SIZE, StreamOptions};
pub use codec::{BgzfCodec, BlockCodec, BlockValidator, ReferenceDecoder};
