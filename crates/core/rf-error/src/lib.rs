//! Error types and classification for recflow.
//!
//! This crate provides:
//! - [`RfError`] - Top-level error enum for pipeline-fatal errors
//! - [`DefinitionError`] - Script loading/validation failures reported at startup
//! - [`RecordError`] and [`ErrorKind`] - Per-record failures surfaced as `Failed` outcomes
//! - [`ErrorCategory`] for retry/dead-letter decision making

use thiserror::Error;

/// Top-level error type for recflow.
///
/// Everything here is fatal to a pipeline run. Per-record failures never
/// become an `RfError`; they are carried by [`RecordError`] inside an outcome.
#[derive(Error, Debug)]
pub enum RfError {
    /// Script definition could not be loaded or validated
    #[error("Script definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record source failed (read or decode)
    #[error("Source error: {0}")]
    Source(String),

    /// Record sink failed (write or flush)
    #[error("Sink error: {0}")]
    Sink(String),

    /// The evaluator pool stayed exhausted for too many consecutive records
    #[error("Evaluator pool exhausted for {consecutive} consecutive records")]
    PoolExhausted { consecutive: u64 },

    /// Generic errors (wrapped anyhow)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Script definition errors, raised while building a pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Neither or both of inline script and script file were given
    #[error("Invalid script source: {0}")]
    InvalidSource(String),

    /// Script file path rejected before reading
    #[error("Invalid script path: {0}")]
    InvalidPath(String),

    /// Script file could not be read
    #[error("Failed to read script: {0}")]
    Read(String),

    /// Script is empty or whitespace only
    #[error("Script cannot be empty")]
    Empty,

    /// Script exceeds the maximum accepted length
    #[error("Script exceeds maximum length: {len} bytes exceeds maximum {max} bytes")]
    TooLong { len: usize, max: usize },

    /// Script failed to compile
    #[error("Script compilation failed: {0}")]
    Compilation(String),

    /// Script does not define a `transform` function
    #[error("transform function not found in script")]
    MissingTransform,

    /// `transform` is defined with the wrong number of parameters
    #[error("transform must take exactly 1 parameter, found {0}")]
    TransformArity(usize),
}

/// Kind of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// No evaluator became available within the acquire timeout
    ResourceExhausted,

    /// The transform threw or otherwise failed to evaluate
    ScriptError,

    /// The transform exceeded its execution deadline
    Timeout,

    /// The transform exceeded a memory or operation ceiling
    ResourceLimit,

    /// The transform returned something that is neither a record nor a drop signal
    MalformedOutput,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::ResourceExhausted,
        ErrorKind::ScriptError,
        ErrorKind::Timeout,
        ErrorKind::ResourceLimit,
        ErrorKind::MalformedOutput,
    ];

    /// Returns the kind's name as used in logs and dead-letter output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhausted => "ResourceExhausted",
            Self::ScriptError => "ScriptError",
            Self::Timeout => "Timeout",
            Self::ResourceLimit => "ResourceLimit",
            Self::MalformedOutput => "MalformedOutput",
        }
    }

    /// Whether an evaluator that produced this kind can be reused.
    ///
    /// A call that completed with malformed output keeps the evaluator, and
    /// `ResourceExhausted` never ran on one. Throws and limit hits mark it
    /// faulted.
    pub fn evaluator_healthy(&self) -> bool {
        matches!(self, Self::ResourceExhausted | Self::MalformedOutput)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-record failure with its kind and a human-readable message.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct RecordError {
    /// Failure kind
    pub kind: ErrorKind,

    /// Detail message
    pub message: String,
}

impl RecordError {
    /// Creates a new record error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceLimit, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedOutput, message)
    }

    /// Returns the retry category for this error.
    pub fn category(&self) -> ErrorCategory {
        classify(self.kind)
    }
}

/// Error classification for retry decisions.
///
/// Used by sinks to decide whether to retry a record or dead-letter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error - a retry may succeed
    ///
    /// Examples: pool exhausted under load, deadline hit on a busy host
    Transient,

    /// Permanent error - never retry, dead-letter directly
    ///
    /// Examples: script throws, returns a malformed value, blows a ceiling
    Permanent,
}

/// Classifies a per-record failure kind to determine retry behavior.
pub fn classify(kind: ErrorKind) -> ErrorCategory {
    match kind {
        ErrorKind::ResourceExhausted => ErrorCategory::Transient,
        ErrorKind::Timeout => ErrorCategory::Transient,
        ErrorKind::ScriptError => ErrorCategory::Permanent,
        ErrorKind::ResourceLimit => ErrorCategory::Permanent,
        ErrorKind::MalformedOutput => ErrorCategory::Permanent,
    }
}

/// Result type alias using RfError.
pub type Result<T> = std::result::Result<T, RfError>;
