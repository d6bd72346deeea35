mod common;

use common::{eval, eval_err, eval_str};
use ember_core::{EmberError, Value};

const POINT: &str = "(deftype Point [x :long y :long])";

fn with_point(src: &str) -> String {
    format!("{} {}", POINT, src)
}

#[test]
fn records_construct_and_expose_fields() {
    assert_eq!(eval(&with_point("(:x (Point. 1 2))")), Value::Int(1));
    assert_eq!(eval(&with_point("(get (Point 3 4) :y)")), Value::Int(4));
    assert_eq!(eval_str(&with_point("(Point. 1 2)")), "#user/Point{:x 1, :y 2}");
}

#[test]
fn records_get_a_predicate_and_a_type() {
    assert_eq!(eval(&with_point("(Point? (Point. 1 2))")), Value::Bool(true));
    assert_eq!(eval(&with_point("(Point? 1)")), Value::Bool(false));
    assert_eq!(eval(&with_point("(type (Point. 1 2))")), Value::keyword("user/Point"));
    assert_eq!(eval("(type 1)"), Value::keyword("core/long"));
}

#[test]
fn constructor_checks_field_types_and_count() {
    let err = eval_err(&with_point("(Point. 1 \"two\")"));
    assert!(matches!(err, EmberError::TypeMismatch(_)), "{}", err);
    assert!(err.to_string().contains("argument 2 (y)"), "{}", err);
    assert!(matches!(eval_err(&with_point("(Point. 1)")), EmberError::Arity(_)));
}

#[test]
fn equal_records_compare_equal() {
    assert_eq!(eval(&with_point("(= (Point. 1 2) (Point. 1 2))")), Value::Bool(true));
    assert_eq!(eval(&with_point("(= (Point. 1 2) (Point. 2 1))")), Value::Bool(false));
}

#[test]
fn redefining_a_type_is_rejected() {
    let err = eval_err(&with_point(POINT));
    assert!(matches!(err, EmberError::DuplicateDefinition(_)), "{}", err);
}

#[test]
fn wrapper_types_run_their_validator() {
    let defs = "(deftype-of Age :long (fn [n] (>= n 0)))";
    assert_eq!(eval_str(&format!("{} (Age. 3)", defs)), "#user/Age 3");
    let invalid = eval_err(&format!("{} (Age. -1)", defs));
    assert!(invalid.to_string().contains("validation failed"), "{}", invalid);
    assert!(matches!(
        eval_err(&format!("{} (Age. \"old\")", defs)),
        EmberError::TypeMismatch(_)
    ));
}

#[test]
fn wrappers_satisfy_their_base_type() {
    let src = "(deftype-of Age :long) (deftype Person [age :long]) (Person? (Person. (Age. 30)))";
    assert_eq!(eval(src), Value::Bool(true));
}

#[test]
fn choice_types_accept_listed_values() {
    let defs = "(deftype-or Color :red :green :blue)";
    assert_eq!(eval(&format!("{} (Color? (Color. :red))", defs)), Value::Bool(true));
    assert_eq!(eval(&format!("{} (Color? :red)", defs)), Value::Bool(true));
    assert!(matches!(
        eval_err(&format!("{} (Color. :purple)", defs)),
        EmberError::TypeMismatch(_)
    ));
}

#[test]
fn choice_types_mix_types_and_literals() {
    let defs = "(deftype-or Limit :long :unbounded)";
    assert_eq!(eval(&format!("{} (Limit? 5)", defs)), Value::Bool(true));
    assert_eq!(eval(&format!("{} (Limit? :unbounded)", defs)), Value::Bool(true));
    assert_eq!(eval(&format!("{} (Limit? \"x\")", defs)), Value::Bool(false));
}

#[test]
fn type_queries() {
    assert_eq!(eval(&with_point("(deftype? :Point)")), Value::Bool(true));
    assert_eq!(eval("(deftype? :Missing)"), Value::Bool(false));
    assert_eq!(
        eval(&with_point("(get (deftype-describe :Point) :kind)")),
        Value::keyword("record")
    );
    assert_eq!(
        eval(&with_point("(count (get (deftype-describe Point) :fields))")),
        Value::Int(2)
    );
    assert_eq!(
        eval("(deftype-of Age :long) (get (deftype-describe :Age) :base)"),
        Value::keyword("core/long")
    );
}
