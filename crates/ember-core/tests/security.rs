mod common;

use std::sync::Arc;

use common::options;
use ember_core::{
    DenyListPolicy, EmberError, RuntimeCtx, SecurityPolicy, StaticLoader, Value,
};

fn guarded(denied: &[&str]) -> Arc<RuntimeCtx> {
    let policy: Arc<dyn SecurityPolicy> = Arc::new(DenyListPolicy::new(denied.iter().copied()));
    RuntimeCtx::with_policy(options(), policy).unwrap()
}

#[test]
fn denied_operations_fail_with_permission_errors() {
    let rt = guarded(&["import"]);
    let err = rt.eval_source("(import util.text.Wrap)").unwrap_err();
    assert!(matches!(err, EmberError::Permission(_)), "{}", err);
    assert_eq!(
        rt.eval_source("(get (inspect 1) :type)").unwrap(),
        Value::keyword("core/long")
    );
}

#[test]
fn permission_errors_are_catchable() {
    let rt = guarded(&["eval"]);
    let caught = rt
        .eval_source("(try (eval '(+ 1 2)) (catch PermissionError e :denied))")
        .unwrap();
    assert_eq!(caught, Value::keyword("denied"));
}

#[test]
fn inspect_can_be_denied() {
    let rt = guarded(&["inspect"]);
    assert!(matches!(
        rt.eval_source("(inspect 1)").unwrap_err(),
        EmberError::Permission(_)
    ));
}

#[test]
fn module_loads_are_checked() {
    let loader = StaticLoader::new().with_module("m", "(def x 1)");
    let policy: Arc<dyn SecurityPolicy> = Arc::new(DenyListPolicy::new(["load-module"]));
    let rt = RuntimeCtx::with_parts(options(), policy, Arc::new(loader)).unwrap();
    assert!(matches!(rt.load_module("m"), Err(EmberError::Permission(_))));
    assert!(rt.evaluator().loaded_modules().is_empty());
}

#[test]
fn inspect_describes_values() {
    let rt = guarded(&[]);
    let src = "(defn greet [name] name) (let [info (inspect greet)] [(:type info) (:name info)])";
    assert_eq!(
        rt.eval_source(src).unwrap().to_string(),
        "[:core/function \"greet\"]"
    );
    assert_eq!(
        rt.eval_source("(:count (inspect [1 2 3]))").unwrap(),
        Value::Int(3)
    );
}
