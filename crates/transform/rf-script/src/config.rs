//! Configuration types for script stages.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution ceilings applied to every evaluator in a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceLimits {
    /// Wall-clock deadline for one transform call
    #[serde(rename = "timeoutMs", with = "duration_ms")]
    pub timeout: Duration,

    /// Extra time the host waits for the evaluator to stop itself after the
    /// deadline before abandoning the call
    #[serde(rename = "terminationGraceMs", with = "duration_ms")]
    pub termination_grace: Duration,

    /// Operation budget per call (0 = unlimited)
    pub max_operations: u64,

    /// Largest string a script may build, in bytes
    pub max_string_size: usize,

    /// Largest array a script may build
    pub max_array_size: usize,

    /// Largest object map a script may build
    pub max_map_size: usize,

    /// Maximum function call nesting
    pub max_call_levels: usize,

    /// Maximum expression nesting accepted by the parser
    pub max_expr_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(25),
            termination_grace: Duration::from_millis(100),
            max_operations: 1_000_000,
            max_string_size: 1_000_000,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_call_levels: 16,
            max_expr_depth: 64,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn with_max_operations(mut self, ops: u64) -> Self {
        self.max_operations = ops;
        self
    }

    pub fn with_max_string_size(mut self, size: usize) -> Self {
        self.max_string_size = size;
        self
    }

    pub fn with_max_array_size(mut self, size: usize) -> Self {
        self.max_array_size = size;
        self
    }

    pub fn with_max_map_size(mut self, size: usize) -> Self {
        self.max_map_size = size;
        self
    }

    pub fn with_max_call_levels(mut self, levels: usize) -> Self {
        self.max_call_levels = levels;
        self
    }

    /// Longest the host waits for one call before abandoning it.
    pub fn hard_deadline(&self) -> Duration {
        self.timeout + self.termination_grace
    }

    /// Validate the limits.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".to_string());
        }
        if self.max_string_size == 0 {
            return Err("max_string_size must be at least 1".to_string());
        }
        if self.max_array_size == 0 {
            return Err("max_array_size must be at least 1".to_string());
        }
        if self.max_map_size == 0 {
            return Err("max_map_size must be at least 1".to_string());
        }
        if self.max_call_levels == 0 {
            return Err("max_call_levels must be at least 1".to_string());
        }
        if self.max_expr_depth == 0 {
            return Err("max_expr_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

/// What a script stage does when the transform throws or returns garbage.
///
/// Resource failures (exhausted pool, deadline, ceilings) always fail the
/// record regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Report the record as failed.
    #[default]
    Fail,

    /// Drop the record, keeping the error in the drop reason.
    #[serde(alias = "skip")]
    Drop,

    /// Emit the input record unchanged.
    #[serde(alias = "log")]
    Passthrough,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "drop" | "skip" => Ok(Self::Drop),
            "passthrough" | "log" => Ok(Self::Passthrough),
            other => Err(format!(
                "unknown error policy '{other}' (expected fail, drop or passthrough)"
            )),
        }
    }
}

/// Per-stage settings that do not affect the evaluators themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptStageConfig {
    /// How long a record waits for a free evaluator
    #[serde(rename = "acquireTimeoutMs", with = "duration_ms")]
    pub acquire_timeout: Duration,

    pub error_policy: ErrorPolicy,
}

impl Default for ScriptStageConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(100),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl ScriptStageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

/// Serde helper for Duration as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
