mod common;

use std::sync::Arc;
use std::thread;

use common::{eval, eval_err, eval_str, runtime};
use ember_core::{EmberError, Value};

#[test]
fn binding_is_visible_to_called_functions() {
    let src = "
(def-dynamic *depth* 1)
(defn depth [] *depth*)
[(binding [*depth* 2] (depth)) (depth)]";
    assert_eq!(eval_str(src), "[2 1]");
}

#[test]
fn binding_values_are_evaluated_before_any_are_pushed() {
    let src = "
(def-dynamic *a* 1)
(def-dynamic *b* 2)
(binding [*a* 10 *b* *a*] [*a* *b*])";
    assert_eq!(eval_str(src), "[10 1]");
}

#[test]
fn bindings_unwind_after_errors() {
    let src = "
(def-dynamic *x* :root)
(try (binding [*x* :inner] (throw \"x\")) (catch ValueException e nil))
*x*";
    assert_eq!(eval(src), Value::keyword("root"));
}

#[test]
fn set_inside_binding_changes_only_the_binding() {
    let src = "
(def-dynamic *x* 1)
[(binding [*x* 2] (set! *x* 3) *x*) *x*]";
    assert_eq!(eval_str(src), "[3 1]");
}

#[test]
fn set_outside_binding_changes_the_root() {
    assert_eq!(eval("(def counter 1) (set! counter 5) counter"), Value::Int(5));
}

#[test]
fn set_rejects_locals_and_unknown_vars() {
    let err = eval_err("(let [x 1] (set! x 2))");
    assert!(err.to_string().contains("local"), "{}", err);
    assert!(matches!(eval_err("(set! missing 1)"), EmberError::SymbolNotFound(_)));
}

#[test]
fn set_respects_defonce() {
    let err = eval_err("(defonce fixed 1) (set! fixed 2)");
    assert!(matches!(err, EmberError::DuplicateDefinition(_)), "{}", err);
}

#[test]
fn thread_local_queries() {
    let src = "
(def-dynamic *d* 1)
(def plain 1)
[(var-thread-local? '*d*) (var-thread-local? 'plain) (binding [plain 2] (var-thread-local? 'plain))]";
    assert_eq!(eval_str(src), "[true false true]");
}

#[test]
fn bindings_do_not_leak_across_threads() {
    let rt = runtime();
    rt.eval_source("(def-dynamic *who* :main)").unwrap();
    let worker = Arc::clone(&rt);
    let handle = thread::spawn(move || {
        worker
            .eval_source("(binding [*who* :worker] *who*)")
            .unwrap()
    });
    let from_worker = handle.join().unwrap();
    assert_eq!(from_worker, Value::keyword("worker"));
    assert_eq!(rt.eval_source("*who*").unwrap(), Value::keyword("main"));
}

#[test]
fn globals_are_shared_across_threads() {
    let rt = runtime();
    rt.eval_source("(def hits (atom 0)) (defn hit [] (swap! hits inc))").unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let worker = Arc::clone(&rt);
            thread::spawn(move || {
                for _ in 0..25 {
                    worker.eval_source("(locking hits (hit))").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(rt.eval_source("(deref hits)").unwrap(), Value::Int(100));
}
