#![allow(dead_code)]

use std::sync::Arc;

use ember_core::{EmberError, EvalOptions, RuntimeCtx, Value};

pub fn options() -> EvalOptions {
    EvalOptions {
        seal_system_ns: true,
        suggest_symbols: true,
        profile: false,
        macroexpand_limit: 100,
        default_namespace: "user".to_string(),
    }
}

pub fn runtime() -> Arc<RuntimeCtx> {
    RuntimeCtx::new(options()).unwrap_or_else(|e| panic!("failed to build runtime: {}", e))
}

pub fn eval(src: &str) -> Value {
    runtime()
        .eval_source(src)
        .unwrap_or_else(|e| panic!("eval failed for {}: {}", src, e))
}

/// Printed (readable) form of the result.
pub fn eval_str(src: &str) -> String {
    eval(src).to_string()
}

pub fn eval_err(src: &str) -> EmberError {
    match runtime().eval_source(src) {
        Ok(value) => panic!("expected {} to fail, got {}", src, value),
        Err(err) => err,
    }
}
