//! Main execution logic for rf-run.

use anyhow::{bail, Context, Result};
use rf_pipeline::{
    JsonLinesSink, JsonLinesSource, PipelineConfig, ScriptStageDescriptor, StageDescriptor,
    StatsSnapshot, Worker,
};
use rf_script::SystemClock;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt;

use crate::args::{Cli, LogLevel};

/// Initialize logging.
pub fn init_logging(level: LogLevel) -> Result<()> {
    let level: Level = level.into();

    fmt::Subscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// Result of an invocation.
pub enum Outcome {
    /// `--validate` succeeded
    Validated { stages: Vec<String> },

    Completed(StatsSnapshot),
}

/// Assemble the pipeline configuration from a config file or the
/// single-stage flags. Flags override file values where both apply.
fn pipeline_config(args: &Cli) -> Result<PipelineConfig> {
    let mut config = match (&args.config, &args.script_file, &args.script) {
        (Some(path), _, _) => PipelineConfig::from_file(path)?,
        (None, Some(path), None) => {
            PipelineConfig::new().with_stage(single_stage(args, ScriptStageDescriptor::file(path)))
        }
        (None, None, Some(script)) => PipelineConfig::new()
            .with_stage(single_stage(args, ScriptStageDescriptor::inline(script.as_str()))),
        _ => bail!("one of --config, --script-file or --script is required"),
    };

    if args.config.is_some()
        && (args.pool_size.is_some() || args.timeout_ms.is_some() || args.on_error.is_some())
    {
        warn!("--pool-size, --timeout-ms and --on-error only apply without --config");
    }

    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

fn single_stage(args: &Cli, mut stage: ScriptStageDescriptor) -> StageDescriptor {
    if let Some(size) = args.pool_size {
        stage = stage.with_pool_size(size);
    }
    if let Some(ms) = args.timeout_ms {
        stage = stage.with_timeout_ms(ms);
    }
    if let Some(policy) = args.on_error {
        stage = stage.with_on_error(policy);
    }
    StageDescriptor::Script(stage.with_name("transform"))
}

/// Execute the runner with the provided arguments.
pub async fn execute(args: Cli) -> Result<Outcome> {
    let config = pipeline_config(&args)?;
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let pipeline = config
        .build(Arc::new(SystemClock))
        .context("failed to build pipeline")?;

    if args.validate {
        let stages = pipeline
            .stage_names()
            .into_iter()
            .map(String::from)
            .collect();
        return Ok(Outcome::Validated { stages });
    }

    let mut source = JsonLinesSource::stdin();
    if let Some(limit) = args.limit {
        source = source.with_limit(limit);
    }

    let mut sink = JsonLinesSink::stdout();
    if let Some(path) = &args.dead_letter {
        let file = File::create(path)
            .with_context(|| format!("failed to create dead-letter file {}", path.display()))?;
        sink = sink.with_dead_letter(Box::new(BufWriter::new(file)));
    }

    let worker = Worker::new(config, Arc::new(pipeline));

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, draining in-flight records");
            shutdown.shutdown();
        }
    });

    let stats = worker.run(Arc::new(source), Arc::new(sink)).await?;
    Ok(Outcome::Completed(stats))
}
