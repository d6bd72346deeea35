mod common;

use common::{eval, eval_err, eval_str, options, runtime};
use ember_core::{EmberError, RuntimeCtx, Value};

#[test]
fn def_interns_and_resolves() {
    assert_eq!(eval("(def x 1) x"), Value::Int(1));
    assert_eq!(eval_str("(def x 1)"), "#'user/x");
}

#[test]
fn qualified_symbols_reach_other_namespaces() {
    assert_eq!(eval("(ns other) (def y 2) (ns user) other/y"), Value::Int(2));
}

#[test]
fn private_vars_are_hidden_outside_their_namespace() {
    let err = eval_err("(ns a) (def- secret 1) (ns user) a/secret");
    assert!(matches!(err, EmberError::SymbolNotFound(_)), "{}", err);
    assert_eq!(eval("(ns a) (def- secret 1) secret"), Value::Int(1));
}

#[test]
fn defonce_refuses_redefinition() {
    let rt = runtime();
    rt.eval_source("(defonce z 1)").unwrap();
    let err = rt.eval_source("(defonce z 2)").unwrap_err();
    assert!(matches!(err, EmberError::DuplicateDefinition(_)), "{}", err);
    assert_eq!(rt.eval_source("z").unwrap(), Value::Int(1));
}

#[test]
fn unresolved_symbols_suggest_close_names() {
    let err = eval_err("(defn greet [] 1) (gret)");
    assert!(matches!(err, EmberError::SymbolNotFound(_)));
    let message = err.to_string();
    assert!(message.contains("Unable to resolve symbol: gret"), "{}", message);
    assert!(message.contains("greet"), "{}", message);
}

#[test]
fn core_is_sealed_after_startup() {
    let err = eval_err("(ns core)");
    assert!(matches!(err, EmberError::NamespaceSealed(_)), "{}", err);
    assert_eq!(
        eval("(try (ns core) (catch PermissionError e :denied))"),
        Value::keyword("denied")
    );
}

#[test]
fn unsealed_core_accepts_definitions() {
    let mut opts = options();
    opts.seal_system_ns = false;
    let rt = RuntimeCtx::new(opts).unwrap();
    let value = rt
        .eval_source("(ns core) (def extra 41) (ns user) (inc extra)")
        .unwrap();
    assert_eq!(value, Value::Int(42));
}

#[test]
fn namespace_listing_and_unmapping() {
    let listed = eval("(ns-list)").to_items().unwrap();
    assert!(listed.contains(&Value::symbol("user")));
    assert!(listed.contains(&Value::symbol("core")));
    assert_eq!(
        eval("(def q 1) [(bound? 'q) (ns-unmap 'user 'q) (bound? 'q)]").to_string(),
        "[true true false]"
    );
    assert_eq!(eval("(ns gone) (ns user) (ns-remove 'gone)"), Value::Bool(true));
}

#[test]
fn var_queries() {
    assert_eq!(eval("(let [a 1] (var-local? 'a))"), Value::Bool(true));
    assert_eq!(eval("(def g 1) (var-global? 'g)"), Value::Bool(true));
    assert_eq!(eval("(def g 1) (var-thread-local? 'g)"), Value::Bool(false));
    assert_eq!(eval("(def-dynamic *d* 1) (var-thread-local? '*d*)"), Value::Bool(true));
    assert_eq!(eval("(def r 5) (var-get (resolve 'r))"), Value::Int(5));
    assert_eq!(eval_str("(def r 5) [(var-name 'r) (var-ns 'r)]"), "[\"r\" \"user\"]");
    assert_eq!(eval("(resolve 'nothing-here)"), Value::Nil);
}

#[test]
fn doc_reads_docstrings_and_special_forms() {
    assert_eq!(
        eval("(defn f \"adds one\" [x] (inc x)) (doc f)"),
        Value::string("adds one")
    );
    assert_eq!(eval("(def v \"a value\" 1) (doc v)"), Value::string("a value"));
    assert_eq!(eval("(string? (doc if))"), Value::Bool(true));
}

#[test]
fn current_namespace_is_restored_after_eval() {
    let rt = runtime();
    rt.eval_source("(eval '(ns elsewhere))").unwrap();
    assert_eq!(rt.evaluator().current_ns(), "user");
    rt.eval_source("(ns elsewhere)").unwrap();
    assert_eq!(rt.evaluator().current_ns(), "elsewhere");
}

#[test]
fn imports_record_short_names() {
    assert_eq!(
        eval("(import \"a.b.Widget\") (get (imports) \"Widget\")"),
        Value::string("a.b.Widget")
    );
}

#[test]
fn metadata_flags_mark_vars() {
    assert_eq!(
        eval("(def ^:dynamic *flag* 1) (var-thread-local? '*flag*)"),
        Value::Bool(true)
    );
    assert_eq!(eval("(def ^{:doc \"meta doc\"} m 1) (doc m)"), Value::string("meta doc"));
}
