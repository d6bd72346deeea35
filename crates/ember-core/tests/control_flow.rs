mod common;

use common::{eval, eval_err, eval_str};
use ember_core::{EmberError, Value};

#[test]
fn loop_recur_runs_without_stack_growth() {
    let src = "(loop [i 0 acc 0] (if (= i 100000) acc (recur (inc i) (+ acc i))))";
    assert_eq!(eval(src), Value::Int(4_999_950_000));
}

#[test]
fn fn_bodies_are_recur_targets() {
    let src = "(defn count-down [n] (if (zero? n) :done (recur (dec n)))) (count-down 50000)";
    assert_eq!(eval(src), Value::keyword("done"));
}

#[test]
fn variadic_recur_takes_the_rest_as_a_sequence() {
    let src = "(defn total [acc & xs] (if (empty? xs) acc (recur (+ acc (first xs)) (rest xs)))) (total 0 1 2 3)";
    assert_eq!(eval(src), Value::Int(6));
}

#[test]
fn recur_outside_tail_position_fails() {
    let err = eval_err("(loop [i 0] (inc (recur i)))");
    assert!(err.to_string().contains("tail position"), "{}", err);
    assert!(eval_err("(recur 1)").to_string().contains("tail position"));
    assert!(matches!(
        eval_err("(loop [i 0] (if (< i 1) (recur 1 2) i))"),
        EmberError::Arity(_)
    ));
}

#[test]
fn tail_pos_reports_position() {
    assert_eq!(eval("(defn t [] (tail-pos)) (t)"), Value::Nil);
    assert_eq!(eval("(defn t [x] (if x (do 1 (tail-pos)) 0)) (t true)"), Value::Nil);
    assert!(eval_err("(tail-pos)").to_string().contains("not in tail position"));
    assert!(eval_err("(defn t [] (try (tail-pos))) (t)")
        .to_string()
        .contains("not in tail position"));
}

#[test]
fn let_destructures_sequentially() {
    let src = "(let [[a b & more] [1 2 3 4] {:keys [x y] :or {y 9}} {:x a}] [a b more x y])";
    assert_eq!(eval_str(src), "[1 2 (3 4) 1 9]");
    assert_eq!(eval("(let [a 1 b (inc a)] b)"), Value::Int(2));
}

#[test]
fn quote_and_quasiquote() {
    assert_eq!(eval_str("'(a b c)"), "(a b c)");
    assert_eq!(eval_str("(let [x 1 xs [2 3]] `(a ~x ~@xs))"), "(a 1 2 3)");
    assert_eq!(eval_str("(let [x 1] `[x ~x])"), "[x 1]");
}

#[test]
fn macros_expand_before_evaluation() {
    let defs = "(defmacro unless [c & body] `(if ~c nil (do ~@body)))";
    assert_eq!(eval(&format!("{} (unless false 1 2)", defs)), Value::Int(2));
    assert_eq!(eval(&format!("{} (unless true 1 2)", defs)), Value::Nil);
    assert_eq!(
        eval_str(&format!("{} (macroexpand '(unless x 1))", defs)),
        "(if x nil (do 1))"
    );
}

#[test]
fn multi_arity_and_variadic_functions() {
    let src = "(defn f ([] 0) ([x] x) ([x & more] (apply + x more))) [(f) (f 1) (f 1 2 3)]";
    assert_eq!(eval_str(src), "[0 1 6]");
    assert!(matches!(
        eval_err("(defn g [x] x) (g 1 2)"),
        EmberError::Arity(_)
    ));
}

#[test]
fn closures_capture_their_environment() {
    let src = "(defn adder [n] (fn [x] (+ x n))) ((adder 10) 5)";
    assert_eq!(eval(src), Value::Int(15));
    assert_eq!(eval("(map (fn [x] (* x x)) [1 2 3])").to_string(), "(1 4 9)");
}

#[test]
fn preconditions_guard_calls() {
    let src = "(defn pos-only [x] {:pre [(pos? x)]} x)";
    assert_eq!(eval(&format!("{} (pos-only 3)", src)), Value::Int(3));
    let err = eval_err(&format!("{} (pos-only -1)", src));
    assert!(matches!(err, EmberError::Precondition(_)), "{}", err);
}

#[test]
fn errors_carry_the_function_stack() {
    let err = eval_err("(defn inner [] (undefined-thing)) (defn outer [] (inner) 1) (outer)");
    let frames: Vec<&str> = err.stack().iter().map(|f| f.function.as_str()).collect();
    assert_eq!(frames, vec!["inner", "outer"]);
}

#[test]
fn eval_and_gensym() {
    assert_eq!(eval("(eval '(+ 1 2))"), Value::Int(3));
    assert_eq!(eval("(symbol? (gensym))"), Value::Bool(true));
    assert_eq!(eval("(= (gensym \"t\") (gensym \"t\"))"), Value::Bool(false));
}

#[test]
fn repetition_forms() {
    assert_eq!(eval("(count (dobench 3 (+ 1 1)))"), Value::Int(3));
    assert_eq!(eval("(def n (atom 0)) (dorun 4 (swap! n inc)) (deref n)"), Value::Int(4));
}

#[test]
fn locking_runs_its_body() {
    assert_eq!(eval("(def lk (atom 0)) (locking lk (swap! lk inc))"), Value::Int(1));
}

#[test]
fn collection_literals_evaluate_their_elements() {
    assert_eq!(eval_str("(let [x 2] [x (inc x)])"), "[2 3]");
    assert_eq!(eval("(let [k :a] (get {k 1} :a))"), Value::Int(1));
    assert_eq!(eval("(count #{1 2 (+ 1 2)})"), Value::Int(3));
}

#[test]
fn keywords_and_maps_are_callable() {
    assert_eq!(eval("(:a {:a 1})"), Value::Int(1));
    assert_eq!(eval("(:b {:a 1} 7)"), Value::Int(7));
    assert_eq!(eval("({:a 1} :a)"), Value::Int(1));
}

#[test]
fn prof_collects_call_counts() {
    let src = "(prof :clear) (prof :on) (defn hot [] 1) (hot) (hot) (prof :off) (get (get (prof :data) \"hot\") :calls)";
    assert_eq!(eval(src), Value::Int(2));
}
