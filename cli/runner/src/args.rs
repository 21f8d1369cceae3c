//! CLI argument definitions for rf-run.

use clap::{Parser, ValueEnum};
use rf_script::ErrorPolicy;
use std::path::PathBuf;
use tracing::Level;

/// Runs JSON-lines records through a script pipeline.
///
/// Reads one JSON object per line on stdin and writes every emitted record
/// as a JSON line on stdout. Logs and the run summary go to stderr.
///
/// ## Examples
///
/// Single script stage:
///   rf-run --script-file scripts/order_transform.rhai < orders.jsonl
///
/// Full pipeline config with a dead-letter file:
///   rf-run --config pipeline.json --dead-letter failed.jsonl < orders.jsonl
///
/// Check that the scripts load, then exit:
///   rf-run --config pipeline.json --validate
#[derive(Parser, Debug)]
#[command(name = "rf-run")]
#[command(version, about, long_about = None)]
pub struct Cli {
    // === Pipeline ===
    /// Pipeline configuration file (JSON)
    #[arg(short = 'c', long, env = "RF_CONFIG", conflicts_with_all = ["script_file", "script"])]
    pub config: Option<PathBuf>,

    /// Script file for a single script stage
    #[arg(short = 's', long, conflicts_with = "script")]
    pub script_file: Option<PathBuf>,

    /// Inline script for a single script stage
    #[arg(long)]
    pub script: Option<String>,

    /// Evaluator pool size (single-stage mode)
    #[arg(long, value_parser = parse_positive_usize)]
    pub pool_size: Option<usize>,

    /// Per-record execution deadline in milliseconds (single-stage mode)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_ms: Option<u64>,

    /// What to do when a transform throws or returns a non-record
    #[arg(long, value_parser = parse_error_policy)]
    pub on_error: Option<ErrorPolicy>,

    // === Processing ===
    /// Number of concurrent workers (overrides the config file)
    #[arg(short = 'w', long, value_parser = parse_positive_usize)]
    pub workers: Option<usize>,

    /// Stop after this many input records
    #[arg(short = 'n', long)]
    pub limit: Option<u64>,

    /// Build the pipeline, report problems, and exit without reading input
    #[arg(long)]
    pub validate: bool,

    // === Output ===
    /// Write failed records as JSON lines to this file
    #[arg(long)]
    pub dead_letter: Option<PathBuf>,

    // === Logging ===
    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

/// Log level.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Parse a positive usize (>= 1).
fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value < 1 {
        return Err(format!("{} is not in 1..", value));
    }
    Ok(value)
}

fn parse_error_policy(s: &str) -> Result<ErrorPolicy, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_single_stage() {
        let cli = Cli::try_parse_from([
            "rf-run",
            "--script-file",
            "order.rhai",
            "--pool-size",
            "8",
            "--on-error",
            "skip",
            "--limit",
            "10",
        ])
        .unwrap();

        assert_eq!(cli.script_file, Some(PathBuf::from("order.rhai")));
        assert_eq!(cli.pool_size, Some(8));
        assert_eq!(cli.on_error, Some(ErrorPolicy::Drop));
        assert_eq!(cli.limit, Some(10));
    }

    #[test]
    fn test_rejects_conflicting_sources() {
        assert!(Cli::try_parse_from(["rf-run", "--config", "p.json", "--script", "x"]).is_err());
        assert!(Cli::try_parse_from(["rf-run", "--workers", "0"]).is_err());
        assert!(Cli::try_parse_from(["rf-run", "--on-error", "explode"]).is_err());
    }
}
