pub mod config;
pub mod error;
pub mod index;
pub mod interval;
pub mod pipeline;
pub mod record;
pub mod schedule;
pub mod shard;
pub mod storage;
pub mod stream;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
