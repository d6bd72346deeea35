use std::cmp::Ordering;

use crate::ast::{FnArity, Value};
use crate::builtins::{as_f64, compare_values, def_builtin, err};
use crate::error::EmberError;
use crate::namespaces::NamespaceRegistry;

pub(crate) fn install(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    // --- Arithmetic ---
    def_builtin!(registry, "+", FnArity::at_least(0), |args| {
        arith("+", args, 0, i64::checked_add, |a, b| a + b)
    });
    def_builtin!(registry, "*", FnArity::at_least(0), |args| {
        arith("*", args, 1, i64::checked_mul, |a, b| a * b)
    });
    def_builtin!(registry, "-", FnArity::at_least(1), |args| {
        if args.len() == 1 {
            return match &args[0] {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EmberError::runtime("integer overflow in -")),
                Value::Float(n) => Ok(Value::Float(-n)),
                other => Err(EmberError::expected("number", other)),
            };
        }
        arith_from("-", &args[0], &args[1..], i64::checked_sub, |a, b| a - b)
    });
    def_builtin!(registry, "/", FnArity::at_least(1), |args| {
        if args.len() == 1 {
            return divide(&Value::Int(1), &args[0]);
        }
        let mut acc = args[0].clone();
        for arg in &args[1..] {
            acc = divide(&acc, arg)?;
        }
        Ok(acc)
    });
    def_builtin!(registry, "inc", FnArity::exact(1), |args| {
        arith_from("inc", &args[0], &[Value::Int(1)], i64::checked_add, |a, b| a + b)
    });
    def_builtin!(registry, "dec", FnArity::exact(1), |args| {
        arith_from("dec", &args[0], &[Value::Int(1)], i64::checked_sub, |a, b| a - b)
    });
    def_builtin!(registry, "mod", FnArity::exact(2), |args| modulo(&args[0], &args[1]));

    // --- Comparison ---
    def_builtin!(registry, "=", FnArity::at_least(1), |args| {
        Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
    });
    def_builtin!(registry, "not=", FnArity::at_least(1), |args| {
        Ok(Value::Bool(!args.windows(2).all(|pair| pair[0] == pair[1])))
    });
    def_builtin!(registry, "<", FnArity::at_least(1), |args| {
        numeric_chain("<", args, |ord| ord == Ordering::Less)
    });
    def_builtin!(registry, ">", FnArity::at_least(1), |args| {
        numeric_chain(">", args, |ord| ord == Ordering::Greater)
    });
    def_builtin!(registry, "<=", FnArity::at_least(1), |args| {
        numeric_chain("<=", args, |ord| ord != Ordering::Greater)
    });
    def_builtin!(registry, ">=", FnArity::at_least(1), |args| {
        numeric_chain(">=", args, |ord| ord != Ordering::Less)
    });
    def_builtin!(registry, "compare", FnArity::exact(2), |args| {
        Ok(Value::Int(match compare_values(&args[0], &args[1])? {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }))
    });
    Ok(())
}

fn arith(
    name: &str,
    args: &[Value],
    identity: i64,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EmberError> {
    arith_from(name, &Value::Int(identity), args, int_op, float_op)
}

/// Left fold; stays integral until a float shows up.
fn arith_from(
    name: &str,
    first: &Value,
    rest: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, EmberError> {
    let mut acc = match first {
        Value::Int(_) | Value::Float(_) => first.clone(),
        other => return err(format!("{} expects numbers, got {}", name, other.type_name())),
    };
    for (idx, arg) in rest.iter().enumerate() {
        acc = match (&acc, arg) {
            (Value::Int(a), Value::Int(b)) => match int_op(*a, *b) {
                Some(n) => Value::Int(n),
                None => return err(format!("integer overflow in {}", name)),
            },
            (_, Value::Int(_) | Value::Float(_)) => Value::Float(float_op(as_f64(&acc)?, as_f64(arg)?)),
            (_, other) => {
                return err(format!(
                    "{} expects numbers (arg {}), got {}",
                    name,
                    idx + 2,
                    other.type_name()
                ))
            }
        };
    }
    Ok(acc)
}

fn divide(a: &Value, b: &Value) -> Result<Value, EmberError> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => err("Divide by zero"),
        (Value::Int(x), Value::Int(y)) if x.checked_rem(*y) == Some(0) => x
            .checked_div(*y)
            .map(Value::Int)
            .ok_or_else(|| EmberError::runtime("integer overflow in /")),
        _ => Ok(Value::Float(as_f64(a)? / as_f64(b)?)),
    }
}

fn modulo(a: &Value, b: &Value) -> Result<Value, EmberError> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => err("mod: divide by zero"),
        (Value::Int(x), Value::Int(y)) => x
            .checked_rem_euclid(*y)
            .map(Value::Int)
            .ok_or_else(|| EmberError::runtime("integer overflow in mod")),
        _ => Ok(Value::Float(as_f64(a)?.rem_euclid(as_f64(b)?))),
    }
}

fn numeric_chain(
    name: &str,
    args: &[Value],
    holds: fn(Ordering) -> bool,
) -> Result<Value, EmberError> {
    for arg in args {
        if !matches!(arg, Value::Int(_) | Value::Float(_)) {
            return err(format!("{} expects numbers, got {}", name, arg.type_name()));
        }
    }
    for pair in args.windows(2) {
        if !holds(compare_values(&pair[0], &pair[1])?) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        let sum = arith("+", &[Value::Int(1), Value::Int(2)], 0, i64::checked_add, |a, b| a + b);
        assert_eq!(sum.unwrap(), Value::Int(3));
        let mixed = arith("+", &[Value::Int(1), Value::Float(0.5)], 0, i64::checked_add, |a, b| a + b);
        assert_eq!(mixed.unwrap(), Value::Float(1.5));
    }

    #[test]
    fn overflow_is_an_error() {
        let result = arith("+", &[Value::Int(i64::MAX), Value::Int(1)], 0, i64::checked_add, |a, b| a + b);
        assert!(result.is_err());
        assert!(modulo(&Value::Int(i64::MIN), &Value::Int(-1)).is_err());
    }

    #[test]
    fn division_keeps_exact_results_integral() {
        assert_eq!(divide(&Value::Int(6), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(divide(&Value::Int(1), &Value::Int(2)).unwrap(), Value::Float(0.5));
        assert!(divide(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn modulo_is_non_negative_for_positive_divisors() {
        assert_eq!(modulo(&Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(modulo(&Value::Int(7), &Value::Int(3)).unwrap(), Value::Int(1));
        assert!(modulo(&Value::Int(7), &Value::Int(0)).is_err());
    }
}
