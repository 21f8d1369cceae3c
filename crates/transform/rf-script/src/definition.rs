//! Script loading and validation.

use crate::config::ResourceLimits;
use crate::evaluator::base_engine;
use rf_error::DefinitionError;
use rhai::AST;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Largest accepted script, in bytes.
pub const MAX_SCRIPT_LENGTH: usize = 100 * 1024;

/// Name of the function every script must define.
pub const TRANSFORM_FN: &str = "transform";

/// Where a script's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    File(PathBuf),
}

impl ScriptSource {
    /// Builds a source from the two mutually exclusive config fields.
    pub fn from_parts(
        inline: Option<String>,
        file: Option<PathBuf>,
    ) -> Result<Self, DefinitionError> {
        match (inline, file) {
            (Some(script), None) => Ok(Self::Inline(script)),
            (None, Some(path)) => Ok(Self::File(path)),
            (Some(_), Some(_)) => Err(DefinitionError::InvalidSource(
                "cannot specify both an inline script and a script file".to_string(),
            )),
            (None, None) => Err(DefinitionError::InvalidSource(
                "either an inline script or a script file is required".to_string(),
            )),
        }
    }
}

/// A compiled, validated transform script.
///
/// Built once at pipeline start and shared read-only by every evaluator.
#[derive(Debug)]
pub struct ScriptDefinition {
    identity: String,
    content_hash: String,
    source: String,
    ast: AST,
    compiled: bool,
}

impl ScriptDefinition {
    /// Loads, compiles and validates a script.
    pub fn load(source: &ScriptSource, limits: &ResourceLimits) -> Result<Self, DefinitionError> {
        let (text, identity) = match source {
            ScriptSource::Inline(text) => {
                let digest = blake3::hash(text.as_bytes()).to_hex();
                (text.clone(), format!("inline:{}", &digest[..16]))
            }
            ScriptSource::File(path) => {
                validate_path(path)?;
                let text = std::fs::read_to_string(path)
                    .map_err(|e| DefinitionError::Read(format!("{}: {e}", path.display())))?;
                (text, format!("file:{}", path.display()))
            }
        };
        Self::compile(text, identity, limits)
    }

    /// Convenience for an inline script with default limits.
    pub fn from_inline(script: impl Into<String>) -> Result<Self, DefinitionError> {
        Self::load(&ScriptSource::Inline(script.into()), &ResourceLimits::default())
    }

    fn compile(
        text: String,
        identity: String,
        limits: &ResourceLimits,
    ) -> Result<Self, DefinitionError> {
        if text.trim().is_empty() {
            return Err(DefinitionError::Empty);
        }
        if text.len() > MAX_SCRIPT_LENGTH {
            return Err(DefinitionError::TooLong {
                len: text.len(),
                max: MAX_SCRIPT_LENGTH,
            });
        }

        let engine = base_engine(limits);
        let ast = engine
            .compile(&text)
            .map_err(|e| DefinitionError::Compilation(e.to_string()))?;
        validate_transform(&ast)?;

        let content_hash = format!("blake3:{}", blake3::hash(text.as_bytes()).to_hex());
        debug!(identity = %identity, hash = %content_hash, bytes = text.len(), "Compiled script");

        Ok(Self {
            identity,
            content_hash,
            source: text,
            ast,
            compiled: true,
        })
    }

    /// Stable identity: `file:<path>` or `inline:<digest prefix>`.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// `blake3:<hex>` digest of the source text.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }
}

fn validate_path(path: &Path) -> Result<(), DefinitionError> {
    let display = path.to_string_lossy();
    if display.is_empty() {
        return Err(DefinitionError::InvalidPath("path is empty".to_string()));
    }
    if display.contains('\0') {
        return Err(DefinitionError::InvalidPath(
            "path contains a NUL byte".to_string(),
        ));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(DefinitionError::InvalidPath(format!(
            "path traversal not allowed: {display}"
        )));
    }
    Ok(())
}

fn validate_transform(ast: &AST) -> Result<(), DefinitionError> {
    let arities: Vec<usize> = ast
        .iter_functions()
        .filter(|f| f.name == TRANSFORM_FN)
        .map(|f| f.params.len())
        .collect();

    match arities.as_slice() {
        [] => Err(DefinitionError::MissingTransform),
        found if found.contains(&1) => Ok(()),
        [first, ..] => Err(DefinitionError::TransformArity(*first)),
    }
}
