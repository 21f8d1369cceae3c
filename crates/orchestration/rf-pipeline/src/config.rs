//! Pipeline configuration and assembly.

use crate::pipeline::StagePipeline;
use rf_error::{RfError, Result};
use rf_script::{
    duration_ms, Clock, ErrorPolicy, EvaluatorPool, ResourceLimits, ScriptDefinition,
    ScriptSource, ScriptStage, ScriptStageConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default evaluator pool size for a script stage.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Stages, in execution order
    pub stages: Vec<StageDescriptor>,

    /// Number of concurrent worker tasks
    pub workers: usize,

    /// Channel buffer size per worker
    pub channel_buffer: usize,

    /// How long in-flight records may take to finish after intake stops
    #[serde(rename = "shutdownTimeoutMs", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Consecutive `ResourceExhausted` outcomes that make the run fatal
    pub exhaustion_threshold: u64,

    /// Directory relative script paths are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            workers: num_cpus(),
            channel_buffer: 100,
            shutdown_timeout: Duration::from_secs(30),
            exhaustion_threshold: 1_000,
            base_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| RfError::Config(format!("invalid pipeline config: {e}")))
    }

    /// Load a configuration file. Relative script paths resolve against its directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RfError::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config = Self::from_json_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn with_stage(mut self, stage: StageDescriptor) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_channel_buffer(mut self, size: usize) -> Self {
        self.channel_buffer = size;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_exhaustion_threshold(mut self, threshold: u64) -> Self {
        self.exhaustion_threshold = threshold;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }
        if self.channel_buffer == 0 {
            return Err("channelBuffer must be at least 1".to_string());
        }
        if self.exhaustion_threshold == 0 {
            return Err("exhaustionThreshold must be at least 1".to_string());
        }
        for (index, stage) in self.stages.iter().enumerate() {
            stage
                .validate()
                .map_err(|e| format!("stage {index}: {e}"))?;
        }
        Ok(())
    }

    /// Loads and validates every script and assembles the pipeline.
    ///
    /// Any definition or limit error is returned here, before a single
    /// record is read.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<StagePipeline> {
        self.validate().map_err(RfError::Config)?;

        let mut pipeline = StagePipeline::empty();
        for (index, descriptor) in self.stages.iter().enumerate() {
            match descriptor {
                StageDescriptor::Script(script) => {
                    let stage = script.build(index, self.base_dir.as_deref(), clock.clone())?;
                    pipeline = pipeline.with_script_stage(stage);
                }
            }
        }

        info!(
            stages = pipeline.len(),
            names = ?pipeline.stage_names(),
            "Pipeline built"
        );
        Ok(pipeline)
    }
}

/// One stage entry in a pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stageType", rename_all = "camelCase")]
pub enum StageDescriptor {
    Script(ScriptStageDescriptor),
}

impl StageDescriptor {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Script(script) => script.validate(),
        }
    }
}

/// Configuration of a script stage.
///
/// Exactly one of `script` (inline) and `scriptSource` (file) must be set.
/// Unset overrides fall back to [`ResourceLimits`] and [`ScriptStageConfig`]
/// defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStageDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_operations: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_string_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_array_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_map_size: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warm_up: Option<bool>,
}

impl ScriptStageDescriptor {
    /// A stage running an inline script.
    pub fn inline(script: impl Into<String>) -> Self {
        Self {
            script: Some(script.into()),
            ..Default::default()
        }
    }

    /// A stage running a script file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            script_source: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = Some(ms);
        self
    }

    pub fn with_max_operations(mut self, ops: u64) -> Self {
        self.max_operations = Some(ops);
        self
    }

    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    pub fn with_warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = Some(warm_up);
        self
    }

    pub fn limits(&self) -> ResourceLimits {
        let mut limits = ResourceLimits::default();
        if let Some(ms) = self.timeout_ms {
            limits.timeout = Duration::from_millis(ms);
        }
        if let Some(ops) = self.max_operations {
            limits.max_operations = ops;
        }
        if let Some(size) = self.max_string_size {
            limits.max_string_size = size;
        }
        if let Some(size) = self.max_array_size {
            limits.max_array_size = size;
        }
        if let Some(size) = self.max_map_size {
            limits.max_map_size = size;
        }
        limits
    }

    pub fn stage_config(&self) -> ScriptStageConfig {
        let mut config = ScriptStageConfig::default();
        if let Some(ms) = self.acquire_timeout_ms {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = self.on_error {
            config.error_policy = policy;
        }
        config
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(DEFAULT_POOL_SIZE)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.pool_size == Some(0) {
            return Err("poolSize must be at least 1".to_string());
        }
        self.limits().validate()
    }

    /// Resolves the script source, joining relative file paths onto `base_dir`.
    fn source(&self, base_dir: Option<&Path>) -> Result<ScriptSource> {
        let source = ScriptSource::from_parts(self.script.clone(), self.script_source.clone())?;
        Ok(match (source, base_dir) {
            (ScriptSource::File(path), Some(base)) if path.is_relative() => {
                ScriptSource::File(base.join(path))
            }
            (source, _) => source,
        })
    }

    fn build(
        &self,
        index: usize,
        base_dir: Option<&Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<ScriptStage> {
        let limits = self.limits();
        let source = self.source(base_dir)?;
        let definition = Arc::new(ScriptDefinition::load(&source, &limits)?);

        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("script-{index}"));
        let pool = EvaluatorPool::new(definition, limits, self.pool_size(), clock);
        if self.warm_up.unwrap_or(true) {
            pool.warm_up();
        }

        debug!(stage = %name, index, "Built script stage");
        Ok(ScriptStage::new(name, pool, self.stage_config()))
    }
}

/// Get the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
