//! rf-run CLI
//!
//! Runs JSON-lines records through a recflow script pipeline.

use clap::Parser;

mod args;
mod run;

use args::Cli;
use run::Outcome;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Initialize logging (to stderr, so stdout is clean for records)
    run::init_logging(args.log_level)?;

    let stats = match run::execute(args).await? {
        Outcome::Validated { stages } => {
            eprintln!("Pipeline OK: {} stage(s): {}", stages.len(), stages.join(", "));
            return Ok(());
        }
        Outcome::Completed(stats) => stats,
    };

    // Report results to stderr
    eprintln!();
    eprintln!("Run completed:");
    eprintln!("  Records in:      {}", format_number(stats.records_in));
    eprintln!("  Emitted:         {}", format_number(stats.records_emitted));
    eprintln!("  Dropped:         {}", format_number(stats.records_dropped));
    eprintln!("  Failed:          {}", format_number(stats.records_failed));
    if stats.records_rejected > 0 {
        eprintln!("  Unparseable:     {}", format_number(stats.records_rejected));
    }
    for (kind, count) in &stats.failures_by_kind {
        eprintln!("    {:<15}{}", kind, format_number(*count));
    }

    if let Some(duration) = stats.duration() {
        let secs = duration.num_milliseconds() as f64 / 1000.0;
        eprintln!("  Duration:        {:.2}s", secs);
    }
    if let Some(rate) = stats.records_per_second() {
        if rate > 0.0 {
            eprintln!("  Throughput:      {} records/sec", format_number(rate as u64));
        }
    }

    // Exit with error code if any record failed
    if stats.has_failures() {
        std::process::exit(4); // Partial failure
    }

    Ok(())
}

/// Format a large number with commas.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}
