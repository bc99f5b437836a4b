//! Wiring inputs, scheduler, coalescer and balancer into one shard stream.

use crate::config::{Config, Strategy};
use crate::interval::{IntervalSet, MergeRule};
use crate::record::{AlignmentRecord, BamRecordSource};
use crate::schedule::{Coalescer, FilePointer, Scheduler};
use crate::shard::{
    LocusShardBalancer, MetricsHandle, MonolithicShardBalancer, ReadShardBalancer, Shard, TraversalContext,
};
use crate::storage::InputSet;
use crate::Result;

pub type PointerStream = Box<dyn Iterator<Item = Result<FilePointer>>>;
pub type ShardStream = Box<dyn Iterator<Item = Result<Shard<AlignmentRecord>>>>;

/// File pointers for the configured traversal.
///
/// Explicit intervals win; `mapped_only` covers every contig of the
/// dictionary; otherwise every read of every input is scheduled.
pub fn file_pointers(config: &Config, inputs: &InputSet) -> Result<PointerStream> {
    let readers = inputs.reader_indices();
    let merge_rule = MergeRule::from(config.merge_rule);

    let scheduler = if !config.intervals.is_empty() {
        let intervals = IntervalSet::new(inputs.resolve(&config.intervals)?, merge_rule);
        tracing::info!("scheduling {} merged intervals", intervals.len());
        Scheduler::over_intervals(readers, intervals, merge_rule)
    } else if config.mapped_only {
        Scheduler::over_mapped_reads(readers, &inputs.sequence_lengths())
    } else {
        Scheduler::over_all_reads(readers)
    };

    if config.no_coalesce {
        Ok(Box::new(scheduler))
    } else {
        Ok(Box::new(Coalescer::new(scheduler)))
    }
}

/// Shards for the configured traversal.
///
/// Closed shards accumulate into `metrics`, as do read-balancer counts that
/// follow the last shard.
pub fn shards(config: &Config, inputs: &InputSet, metrics: MetricsHandle) -> Result<ShardStream> {
    let pointers = file_pointers(config, inputs)?;
    let shards: ShardStream = match config.strategy {
        Strategy::Read => {
            let source = BamRecordSource::new(inputs.source_inputs(), config.stream_options());
            Box::new(ReadShardBalancer::new(
                pointers,
                source,
                TraversalContext::new(metrics),
                config.read_shard_size,
            ))
        }
        Strategy::Locus => Box::new(LocusShardBalancer::new(pointers)),
        Strategy::Monolithic => Box::new(MonolithicShardBalancer::new(pointers)),
    };
    Ok(shards)
}
