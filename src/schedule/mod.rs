//! Turning genomic intervals into file pointers.
//!
//! [`Scheduler`] walks an [`IntervalSet`](crate::interval::IntervalSet) against
//! the index of every input and yields [`FilePointer`]s lazily; [`Coalescer`]
//! folds neighbours that add no new bytes.

pub mod bam_schedule;
pub mod coalesce;
pub mod file_pointer;
pub mod scheduler;

pub use coalesce::Coalescer;
pub use file_pointer::FilePointer;
pub use scheduler::{MAX_UNCOVERED_SPAN, Scheduler};

use crate::index::IndexStore;
use crate::types::ReaderId;
use noodles::bgzf::VirtualPosition;
use std::sync::Arc;

/// What the scheduler needs to know about one input.
#[derive(Debug, Clone)]
pub struct ReaderIndex {
    pub id: ReaderId,
    pub index: Option<Arc<IndexStore>>,
    /// Virtual position of the first alignment record, just past the header.
    pub first_record: VirtualPosition,
}
