mod common;

use common::{eval, eval_err, eval_str};
use ember_core::{ConditionKind, EmberError, Value};

#[test]
fn body_catch_and_finally_run_in_order() {
    let src = "
(def trail (atom []))
(try
  (swap! trail conj :body)
  (throw \"boom\")
  (catch ValueException e (swap! trail conj :catch))
  (finally (swap! trail conj :finally)))
(deref trail)";
    assert_eq!(eval_str(src), "[:body :catch :finally]");
}

#[test]
fn finally_does_not_change_the_result() {
    assert_eq!(eval("(try 1 (finally 2))"), Value::Int(1));
    assert_eq!(eval("(try (throw 1) (catch ValueException e 3) (finally 4))"), Value::Int(3));
}

#[test]
fn first_matching_catch_wins() {
    let src = "(try (throw \"x\") (catch ArityError e :arity) (catch RuntimeException e :runtime) (catch ValueException e :value))";
    assert_eq!(eval(src), Value::keyword("runtime"));
}

#[test]
fn unmatched_errors_propagate() {
    let err = eval_err("(try (throw \"x\") (catch ArityError e :arity))");
    assert!(matches!(err, EmberError::Thrown(_, _)), "{}", err);
    assert_eq!(err.kind(), ConditionKind::ValueException);
}

#[test]
fn a_throwing_catch_still_runs_finally() {
    let src = "
(def trail (atom []))
[(try
   (try (throw \"a\")
        (catch ValueException e (swap! trail conj :catch) (throw \"b\"))
        (finally (swap! trail conj :fin)))
   (catch ValueException e (ex-message e)))
 (deref trail)]";
    assert_eq!(eval_str(src), "[\"b\" [:catch :fin]]");
}

#[test]
fn an_error_in_finally_overrides_the_outcome() {
    assert_eq!(eval_err("(try 1 (finally (throw \"late\")))").message(), "late");
    assert_eq!(
        eval_err("(try (throw \"early\") (finally (throw \"late\")))").message(),
        "late"
    );
}

#[test]
fn thrown_values_travel_as_payload() {
    let src = "(try (throw {:code 7}) (catch ValueException e (:code (ex-value e))))";
    assert_eq!(eval(src), Value::Int(7));
    let kind = "(try (throw 1) (catch Throwable e (ex-kind e)))";
    assert_eq!(eval(kind), Value::keyword("ValueException"));
}

#[test]
fn key_value_selectors_match_the_payload() {
    let src = "(try (throw {:code 7}) (catch [:code 8] e :eight) (catch [:code 7] e :seven))";
    assert_eq!(eval(src), Value::keyword("seven"));
}

#[test]
fn predicate_selectors_see_the_payload() {
    let src = "(try (throw 42) (catch (fn [v] (= v 42)) e :answer))";
    assert_eq!(eval(src), Value::keyword("answer"));
}

#[test]
fn runtime_errors_are_catchable_by_kind() {
    let src = "(try nope-x (catch SymbolNotFound e (ex-message e)))";
    match eval(src) {
        Value::String(message) => assert!(message.contains("nope-x"), "{}", message),
        other => panic!("expected a message, got {}", other),
    }
    assert_eq!(
        eval("(try (/ 1 0) (catch RuntimeException e (ex-kind e)))"),
        Value::keyword("RuntimeFailure")
    );
    assert_eq!(
        eval("(defn one [x] x) (try (one) (catch ArityError e :arity))"),
        Value::keyword("arity")
    );
}

#[test]
fn cause_selectors_filter_on_the_cause_kind() {
    let src = "
(try
  (throw (ex :ValueException \"outer\" {:code 7} (ex :ArityError \"inner\")))
  (catch [:cause TypeMismatchError :code 7] e :wrong-cause)
  (catch [:cause ArityError :code 8] e :wrong-code)
  (catch [:cause ArityError :code 7] e (ex-message (ex-cause e))))";
    assert_eq!(eval_str(src), "\"inner\"");
}

#[test]
fn cause_selectors_need_a_cause() {
    let err = eval_err("(try (throw {:code 7}) (catch [:cause Throwable :code 7] e :matched))");
    assert_eq!(err.kind(), ConditionKind::ValueException);
}

#[test]
fn rethrowing_keeps_the_condition() {
    let src = "
(def original (ex :ArityError \"bad\"))
(try (try (throw original) (catch Throwable e (throw e)))
     (catch ArityError e (= e original)))";
    assert_eq!(eval(src), Value::Bool(true));
}

const RESOURCES: &str = "
(def closed (atom []))
(deftype Res [id])
(extend Res AutoCloseable (close [r] (swap! closed conj (:id r))))
(deftype Bad [id])
(extend Bad AutoCloseable (close [r] (throw \"close failed\")))
";

fn with_resources(src: &str) -> String {
    format!("{} {}", RESOURCES, src)
}

#[test]
fn try_with_closes_in_reverse_order() {
    let src = with_resources("(try-with [a (Res. :a) b (Res. :b)] (:id b)) (deref closed)");
    assert_eq!(eval_str(&src), "[:b :a]");
}

#[test]
fn try_with_closes_after_an_error() {
    let src = with_resources(
        "(try (try-with [a (Res. :a)] (throw \"body\")) (catch ValueException e nil)) (deref closed)",
    );
    assert_eq!(eval_str(&src), "[:a]");
}

#[test]
fn close_failure_surfaces_when_the_body_succeeds() {
    let err = eval_err(&with_resources("(try-with [r (Bad. 1)] :ok)"));
    assert_eq!(err.message(), "close failed");
}

#[test]
fn body_failure_wins_over_close_failure() {
    let src = with_resources("(try-with [r (Bad. 1) a (Res. :a)] (throw \"body failed\"))");
    let err = eval_err(&src);
    assert_eq!(err.message(), "body failed");
    let closed = with_resources(
        "(try (try-with [r (Bad. 1) a (Res. :a)] (throw \"body failed\")) (catch Throwable e nil)) (deref closed)",
    );
    assert_eq!(eval_str(&closed), "[:a]");
}
