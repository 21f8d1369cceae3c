//! A single isolated evaluator.

use crate::builtin::register_builtin_functions;
use crate::clock::Clock;
use crate::config::ResourceLimits;
use crate::conversion::{dynamic_to_record, record_to_dynamic};
use crate::definition::{ScriptDefinition, TRANSFORM_FN};
use parking_lot::Mutex;
use rf_error::RecordError;
use rf_types::Record;
use rhai::{
    CallFnOptions, Dynamic, Engine, EvalAltResult, OptimizationLevel, ParseErrorType, Scope,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Operations between two deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 64;

/// Result of one transform call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    /// The transform returned a map
    Emit(Record),

    /// The transform returned `()`
    Drop,

    /// The call failed
    Failed(RecordError),
}

impl CallResult {
    /// Whether the evaluator can serve another record after this result.
    pub fn evaluator_healthy(&self) -> bool {
        match self {
            Self::Emit(_) | Self::Drop => true,
            Self::Failed(error) => error.kind.evaluator_healthy(),
        }
    }
}

/// Deadline shared between an evaluator and its progress callback.
#[derive(Debug, Default)]
struct Deadline {
    at: Mutex<Option<Instant>>,
}

impl Deadline {
    fn arm(&self, after: Duration) {
        *self.at.lock() = Some(Instant::now() + after);
    }

    fn disarm(&self) {
        *self.at.lock() = None;
    }

    fn expired(&self) -> bool {
        self.at.lock().is_some_and(|at| Instant::now() >= at)
    }
}

/// Builds an engine with the ceilings applied and host access removed.
///
/// Used both to compile definitions and as the base of every evaluator.
pub(crate) fn base_engine(limits: &ResourceLimits) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_call_levels(limits.max_call_levels);

    // No file imports, no eval, no stdout.
    engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.on_print(|text| debug!(target: "rf_script::print", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "rf_script::debug", source = ?source, position = %pos, "{text}")
    });

    // Simple, not Full: built-ins like timestamp() must run on every call.
    engine.set_optimization_level(OptimizationLevel::Simple);

    engine
}

/// One execution context for a script.
///
/// Owned by the pool and checked out for exactly one call at a time.
pub struct Evaluator {
    id: u64,
    engine: Engine,
    definition: Arc<ScriptDefinition>,
    deadline: Arc<Deadline>,
    timeout: Duration,
    calls: u64,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("id", &self.id)
            .field("script", &self.definition.identity())
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    pub fn new(
        id: u64,
        definition: Arc<ScriptDefinition>,
        limits: &ResourceLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut engine = base_engine(limits);
        register_builtin_functions(&mut engine, clock);

        let deadline = Arc::new(Deadline::default());
        let watch = deadline.clone();
        engine.on_progress(move |ops| {
            if ops % DEADLINE_CHECK_INTERVAL == 0 && watch.expired() {
                Some(Dynamic::from("execution deadline exceeded"))
            } else {
                None
            }
        });

        Self {
            id,
            engine,
            definition,
            deadline,
            timeout: limits.timeout,
            calls: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of calls this evaluator has served.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Runs the transform against one record.
    ///
    /// Blocks the calling thread for at most the configured timeout plus the
    /// time between two deadline checks.
    pub fn call(&mut self, record: &Record) -> CallResult {
        self.calls += 1;
        let input = record_to_dynamic(record);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let mut scope = Scope::new();

        self.deadline.arm(self.timeout);
        let result = self.engine.call_fn_with_options::<Dynamic>(
            options,
            &mut scope,
            self.definition.ast(),
            TRANSFORM_FN,
            (input,),
        );
        self.deadline.disarm();

        let outcome = match result {
            Ok(value) => match dynamic_to_record(value) {
                Ok(Some(record)) => CallResult::Emit(record),
                Ok(None) => CallResult::Drop,
                Err(message) => CallResult::Failed(RecordError::malformed(message)),
            },
            Err(error) => CallResult::Failed(classify_error(&error)),
        };
        trace!(
            evaluator = self.id,
            call = self.calls,
            healthy = outcome.evaluator_healthy(),
            "Transform call finished"
        );
        outcome
    }
}

/// Maps an evaluation error to a record error kind.
fn classify_error(error: &EvalAltResult) -> RecordError {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => classify_error(inner),
        EvalAltResult::ErrorTerminated(_, _) => {
            RecordError::timeout("execution deadline exceeded")
        }
        EvalAltResult::ErrorTooManyOperations(_) => {
            RecordError::resource_limit("operation budget exceeded")
        }
        EvalAltResult::ErrorDataTooLarge(what, _) => {
            RecordError::resource_limit(format!("{what} exceeds the configured ceiling"))
        }
        EvalAltResult::ErrorStackOverflow(_) => {
            RecordError::resource_limit("call nesting exceeds the configured ceiling")
        }
        EvalAltResult::ErrorParsing(ParseErrorType::ExprTooDeep, _) => {
            RecordError::resource_limit("expression nesting exceeds the configured ceiling")
        }
        EvalAltResult::ErrorRuntime(thrown, _) => RecordError::script(thrown_message(thrown)),
        other => RecordError::script(other.to_string()),
    }
}

fn thrown_message(thrown: &Dynamic) -> String {
    if thrown.is_unit() {
        "transform threw ()".to_string()
    } else {
        thrown.to_string()
    }
}
