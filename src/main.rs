use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bamshard::{Config, pipeline, shard::MetricsHandle, storage::InputSet};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    config.validate()?;

    let inputs = InputSet::open(&config.bams)?;
    let metrics = MetricsHandle::new();
    let contig_names = inputs.contig_names();

    for shard in pipeline::shards(&config, &inputs, metrics.clone())? {
        let shard = shard?;
        println!("{}", serde_json::to_string(&shard.summary(&contig_names))?);
        shard.close(&metrics)?;
    }

    let totals = metrics.snapshot()?;
    tracing::info!(
        "traversal finished: {} shards, {} records, ~{} bytes scheduled",
        totals.shards,
        totals.records,
        totals.bytes_scheduled
    );
    if totals.overlaps_trimmed > 0 {
        tracing::warn!("{} file pointers overlapped earlier shards and were trimmed", totals.overlaps_trimmed);
    }
    println!("{}", serde_json::json!({ "metrics": totals }));

    Ok(())
}
