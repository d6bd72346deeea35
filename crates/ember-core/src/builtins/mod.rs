use std::cmp::Ordering;

use crate::ast::{Key, MetaMap, Value};
use crate::error::EmberError;
use crate::eval::call_value;
use crate::namespaces::{NamespaceRegistry, VarFlags};
use crate::symbols::CORE_NS;
use crate::type_registry::CustomData;
use crate::value_format::format_value;

macro_rules! def_builtin {
    ($registry:expr, $name:expr, $arity:expr, |$args:ident| $body:block) => {
        $crate::builtins::define_builtin(
            $registry,
            $name,
            $crate::ast::Value::native_fn($arity, $name, move |$args: &[$crate::ast::Value]| -> Result<$crate::ast::Value, $crate::error::EmberError> {
                $body
            }),
        )?;
    };
    ($registry:expr, $name:expr, $arity:expr, |$args:ident| $body:expr) => {
        $crate::builtins::define_builtin(
            $registry,
            $name,
            $crate::ast::Value::native_fn($arity, $name, move |$args: &[$crate::ast::Value]| -> Result<$crate::ast::Value, $crate::error::EmberError> {
                $body
            }),
        )?;
    };
}

pub(crate) use def_builtin;

mod core;
mod math;
mod seq;

/// Install the function library into `core`. Runs before `core` is sealed.
pub fn install(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    registry.ensure(CORE_NS);
    math::install(registry)?;
    core::install(registry)?;
    seq::install(registry)?;
    Ok(())
}

pub(crate) fn define_builtin(
    registry: &NamespaceRegistry,
    name: &str,
    value: Value,
) -> Result<(), EmberError> {
    registry.intern(CORE_NS, name, value, VarFlags::plain(), MetaMap::new())?;
    Ok(())
}

pub fn err<T>(msg: impl Into<String>) -> Result<T, EmberError> {
    Err(EmberError::runtime(msg))
}

/// `(get target key default?)` semantics shared with keyword/map calls.
pub fn get_value(target: &Value, key: &Value, default: Option<&Value>) -> Result<Value, EmberError> {
    let or_default = |found: Option<Value>| found.unwrap_or_else(|| default.cloned().unwrap_or(Value::Nil));
    Ok(match target {
        Value::Map(map) => or_default(Key::from_value(key).ok().and_then(|k| map.get(&k).cloned())),
        Value::Vector(items) | Value::List(items) => or_default(match key {
            Value::Int(idx) if *idx >= 0 => items.get(*idx as usize).cloned(),
            _ => None,
        }),
        Value::Set(set) => or_default(set.contains(key).then(|| key.clone())),
        Value::String(s) => or_default(match key {
            Value::Int(idx) if *idx >= 0 => s
                .chars()
                .nth(*idx as usize)
                .map(|c| Value::String(c.to_string())),
            _ => None,
        }),
        Value::Custom(custom) => or_default(match (&custom.data, key) {
            (CustomData::Record(_), Value::Keyword(name)) => custom.field(name),
            _ => None,
        }),
        _ => or_default(None),
    })
}

/// Printed form used by `str`: custom types may override it through
/// `Object/toString`.
pub fn display_string(value: &Value) -> Result<String, EmberError> {
    if let Value::Custom(custom) = value {
        if let Some(to_string) = custom.def.overrides().to_string {
            return match call_value(&to_string, std::slice::from_ref(value))? {
                Value::String(s) => Ok(s),
                other => Ok(format_value(&other, false)),
            };
        }
    }
    Ok(format_value(value, false))
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Nil => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Keyword(_) => 4,
        Value::Symbol(_) => 5,
        Value::List(_) | Value::Vector(_) => 6,
        _ => 7,
    }
}

/// Total order used by `compare`. Custom values defer to `Object/compareTo`.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, EmberError> {
    if let Value::Custom(custom) = a {
        if let Some(compare_to) = custom.def.overrides().compare_to {
            return match call_value(&compare_to, &[a.clone(), b.clone()])? {
                Value::Int(n) => Ok(n.cmp(&0)),
                other => Err(EmberError::expected("integer from compareTo", &other)),
            };
        }
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (x, y) = (as_f64(a)?, as_f64(b)?);
            x.partial_cmp(&y)
                .ok_or_else(|| EmberError::runtime("cannot compare NaN"))
        }
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) | (Value::Keyword(x), Value::Keyword(y)) => {
            Ok(x.cmp(y))
        }
        (Value::Symbol(x), Value::Symbol(y)) => Ok(x.qualified().cmp(&y.qualified())),
        (
            Value::List(xs) | Value::Vector(xs),
            Value::List(ys) | Value::Vector(ys),
        ) => {
            for (x, y) in xs.iter().zip(ys.iter()) {
                let ord = compare_values(x, y)?;
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(xs.len().cmp(&ys.len()))
        }
        _ if rank(a) != rank(b) && rank(a) < 7 && rank(b) < 7 => Ok(rank(a).cmp(&rank(b))),
        _ => Err(EmberError::type_mismatch(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

pub fn as_f64(value: &Value) -> Result<f64, EmberError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(EmberError::expected("number", other)),
    }
}
