mod common;

use common::{eval, eval_err, eval_str};
use ember_core::Value;

const SHAPES: &str = "
(defprotocol Shape
  (area [s])
  (label [s] ([s] \"shape\")))
(deftype Sq [side :long])
(deftype Circle [r :long])
(extend Sq Shape (area [s] (* (:side s) (:side s))))
";

fn with_shapes(src: &str) -> String {
    format!("{} {}", SHAPES, src)
}

#[test]
fn protocol_functions_dispatch_on_the_first_argument() {
    assert_eq!(eval(&with_shapes("(area (Sq. 3))")), Value::Int(9));
}

#[test]
fn missing_implementation_names_the_type() {
    let err = eval_err(&with_shapes("(area (Circle. 1))"));
    assert!(
        err.to_string().contains("not implemented for type user/Circle"),
        "{}",
        err
    );
}

#[test]
fn protocol_default_methods_apply_to_every_type() {
    assert_eq!(eval_str(&with_shapes("(label (Circle. 1))")), "\"shape\"");
}

#[test]
fn extends_reports_registration() {
    assert_eq!(eval(&with_shapes("(extends? Sq Shape)")), Value::Bool(true));
    assert_eq!(eval(&with_shapes("(extends? :Circle Shape)")), Value::Bool(false));
}

#[test]
fn builtin_types_can_be_extended() {
    let src = "(defprotocol Twice (twice [x])) (extend :long Twice (twice [n] (* 2 n))) (twice 21)";
    assert_eq!(eval(src), Value::Int(42));
}

#[test]
fn object_overrides_drive_str_and_compare() {
    let src = with_shapes(
        "(extend Sq Object
           (toString [s] (str \"Sq(\" (:side s) \")\"))
           (compareTo [a b] (compare (:side a) (:side b))))
         [(str (Sq. 2)) (compare (Sq. 1) (Sq. 5))]",
    );
    assert_eq!(eval_str(&src), "[\"Sq(2)\" -1]");
}

#[test]
fn multimethods_dispatch_on_computed_values() {
    let src = "
(defmulti speak (fn [animal] (:kind animal)))
(defmethod speak :dog [_] \"woof\")
(defmethod speak :default [_] \"...\")
[(speak {:kind :dog}) (speak {:kind :fish})]";
    assert_eq!(eval_str(src), "[\"woof\" \"...\"]");
}

#[test]
fn multimethod_without_match_fails() {
    let src = "(defmulti area2 :shape) (defmethod area2 :sq [s] 1) (area2 {:shape :tri})";
    assert!(eval_err(src).to_string().contains("no method for dispatch value"));
}

#[test]
fn redefining_a_method_replaces_it() {
    let src = "
(defmulti kind identity)
(defmethod kind 1 [_] :one)
(defmethod kind 1 [_] :uno)
(defmulti kind identity)
(kind 1)";
    assert_eq!(eval(src), Value::keyword("uno"));
}
