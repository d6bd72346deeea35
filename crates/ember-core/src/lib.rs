pub mod ast;
pub mod builtins;
pub mod condition;
pub mod destructure;
pub mod dynamic_vars;
pub mod env;
pub mod error;
pub mod eval;
pub mod fn_builder;
pub mod interrupt;
pub mod loader;
pub mod monitor;
pub mod multimethods;
pub mod namespaces;
pub mod options;
pub mod profiler;
pub mod protocols;
pub mod quasiquote;
pub mod reader;
pub mod runtime;
pub mod security;
pub mod special_forms;
pub mod symbols;
pub mod try_form;
pub mod type_registry;
pub mod value_format;

pub use ast::{Key, Symbol, Value};
pub use condition::{Condition, ConditionKind};
pub use error::{format_error, EmberError};
pub use eval::{call_value, Evaluator};
pub use loader::{ModuleLoader, StaticLoader};
pub use options::EvalOptions;
pub use runtime::RuntimeCtx;
pub use security::{AllowAll, DenyListPolicy, SecurityPolicy};

/// Evaluate `source` in a fresh runtime.
pub fn eval_source(source: &str, options: Option<EvalOptions>) -> Result<Value, EmberError> {
    let runtime = RuntimeCtx::new(options.unwrap_or_default())?;
    runtime.eval_source(source)
}
