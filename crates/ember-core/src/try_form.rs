use crate::ast::{Key, Value};
use crate::condition::{Condition, ConditionKind};
use crate::error::EmberError;
use crate::type_registry::CustomData;

/// `(catch selector name body...)`, parsed for one `try` evaluation.
#[derive(Clone, Debug)]
pub struct CatchBlock {
    pub selector: Value,
    pub binding: String,
    pub body: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct FinallyBlock {
    pub body: Vec<Value>,
}

#[derive(Clone, Debug)]
pub struct TryPlan {
    pub body: Vec<Value>,
    pub catches: Vec<CatchBlock>,
    pub finally: Option<FinallyBlock>,
}

fn clause_tag(form: &Value) -> Option<&str> {
    match form {
        Value::List(items) => items.front().and_then(|head| head.as_simple_symbol()),
        _ => None,
    }
}

/// Split `try` operands into body, catch clauses and an optional finally.
/// Catch clauses follow the body; finally comes last.
pub fn parse_try(forms: &[Value]) -> Result<TryPlan, EmberError> {
    let mut body = Vec::new();
    let mut catches = Vec::new();
    let mut finally = None;
    for form in forms {
        match clause_tag(form) {
            Some("catch") => {
                if finally.is_some() {
                    return Err(EmberError::runtime("try: catch must come before finally"));
                }
                let items: Vec<Value> = form.as_seq().map(|v| v.iter().cloned().collect()).unwrap_or_default();
                if items.len() < 3 {
                    return Err(EmberError::runtime("try: catch expects a selector and a name"));
                }
                let binding = items[2]
                    .as_simple_symbol()
                    .ok_or_else(|| EmberError::runtime("try: catch binding must be a symbol"))?
                    .to_string();
                catches.push(CatchBlock {
                    selector: items[1].clone(),
                    binding,
                    body: items[3..].to_vec(),
                });
            }
            Some("finally") => {
                if finally.is_some() {
                    return Err(EmberError::runtime("try: only one finally clause allowed"));
                }
                let items: Vec<Value> = form.as_seq().map(|v| v.iter().cloned().collect()).unwrap_or_default();
                finally = Some(FinallyBlock {
                    body: items[1..].to_vec(),
                });
            }
            _ => {
                if !catches.is_empty() || finally.is_some() {
                    return Err(EmberError::runtime(
                        "try: body forms must precede catch and finally",
                    ));
                }
                body.push(form.clone());
            }
        }
    }
    Ok(TryPlan {
        body,
        catches,
        finally,
    })
}

/// How a catch clause decides whether it handles a condition.
#[derive(Clone, Debug)]
pub enum Selector {
    /// The condition's kind is this kind or a descendant.
    Kind(ConditionKind),
    /// One-argument function applied to the carried value (nil if absent).
    Predicate(Value),
    /// Carried map must contain every pair; `cause` additionally requires
    /// the condition's cause to be of that kind.
    KeyValues {
        cause: Option<ConditionKind>,
        pairs: Vec<(Key, Value)>,
    },
}

fn kind_named(form: &Value) -> Option<ConditionKind> {
    match form {
        Value::Symbol(sym) if sym.ns.is_none() => ConditionKind::from_name(&sym.name),
        Value::Keyword(k) => ConditionKind::from_name(k),
        _ => None,
    }
}

/// Turn a selector form into a `Selector`. Kind names are taken literally;
/// anything else is evaluated with `eval`.
pub fn resolve_selector(
    form: &Value,
    eval: &mut dyn FnMut(&Value) -> Result<Value, EmberError>,
) -> Result<Selector, EmberError> {
    if let Some(kind) = kind_named(form) {
        return Ok(Selector::Kind(kind));
    }
    if let Value::Vector(items) = form {
        if items.len() % 2 != 0 {
            return Err(EmberError::runtime(
                "catch: key/value selector needs an even number of forms",
            ));
        }
        let items: Vec<Value> = items.iter().cloned().collect();
        let mut cause = None;
        let mut pairs = Vec::new();
        for pair in items.chunks(2) {
            if matches!(&pair[0], Value::Keyword(k) if k == "cause") {
                let kind = kind_named(&pair[1]).ok_or_else(|| {
                    EmberError::runtime(format!("catch: unknown condition kind {}", pair[1]))
                })?;
                cause = Some(kind);
                continue;
            }
            pairs.push((Key::from_value(&pair[0])?, eval(&pair[1])?));
        }
        return Ok(Selector::KeyValues { cause, pairs });
    }
    let value = eval(form)?;
    if let Some(kind) = kind_named(&value) {
        return Ok(Selector::Kind(kind));
    }
    if value.is_callable() {
        return Ok(Selector::Predicate(value));
    }
    Err(EmberError::runtime(format!(
        "catch: invalid selector {}",
        value
    )))
}

fn carried_entry(value: &Value, key: &Key) -> Option<Value> {
    match value {
        Value::Map(map) => map.get(key).cloned(),
        Value::Custom(custom) => match (&custom.data, key) {
            (CustomData::Record(_), Key::Keyword(name)) => custom.field(name),
            _ => None,
        },
        _ => None,
    }
}

impl Selector {
    /// `call` applies a predicate to one argument.
    pub fn matches(
        &self,
        condition: &Condition,
        call: &mut dyn FnMut(&Value, Value) -> Result<Value, EmberError>,
    ) -> Result<bool, EmberError> {
        match self {
            Selector::Kind(kind) => Ok(condition.kind.is_a(*kind)),
            Selector::Predicate(pred) => {
                let arg = condition.value.clone().unwrap_or(Value::Nil);
                Ok(call(pred, arg)?.is_truthy())
            }
            Selector::KeyValues { cause, pairs } => {
                if let Some(kind) = cause {
                    match &condition.cause {
                        Some(c) if c.kind.is_a(*kind) => {}
                        _ => return Ok(false),
                    }
                }
                let Some(carried) = &condition.value else {
                    return Ok(pairs.is_empty());
                };
                Ok(pairs
                    .iter()
                    .all(|(key, expected)| carried_entry(carried, key).as_ref() == Some(expected)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_source;
    use std::sync::Arc;

    fn forms(src: &str) -> Vec<Value> {
        read_source(src).unwrap()
    }

    #[test]
    fn parses_clauses_in_order() {
        let plan = parse_try(&forms("(a) (b) (catch Exception e 1) (finally 2)")).unwrap();
        assert_eq!(plan.body.len(), 2);
        assert_eq!(plan.catches.len(), 1);
        assert_eq!(plan.catches[0].binding, "e");
        assert!(plan.finally.is_some());
    }

    #[test]
    fn body_after_catch_is_rejected() {
        assert!(parse_try(&forms("(catch Exception e 1) (a)")).is_err());
        assert!(parse_try(&forms("(finally 1) (catch Exception e 1)")).is_err());
    }

    #[test]
    fn kind_selector_matches_descendants() {
        let mut eval = |v: &Value| Ok::<Value, EmberError>(v.clone());
        let selector = resolve_selector(&forms("RuntimeException")[0], &mut eval).unwrap();
        let cond = Condition::new(ConditionKind::ArityError, "bad");
        let mut call = |_: &Value, _: Value| Ok::<Value, EmberError>(Value::Nil);
        assert!(selector.matches(&cond, &mut call).unwrap());
        let interrupted = Condition::new(ConditionKind::InterruptedError, "stop");
        assert!(!selector.matches(&interrupted, &mut call).unwrap());
    }

    #[test]
    fn key_value_selector_with_cause() {
        let mut eval = |v: &Value| Ok::<Value, EmberError>(v.clone());
        let selector =
            resolve_selector(&forms("[:cause ArityError :code 7]")[0], &mut eval).unwrap();
        let data = forms("{:code 7}").remove(0);
        let cause = Arc::new(Condition::new(ConditionKind::ArityError, "inner"));
        let outer = Condition::new(ConditionKind::ValueException, "outer")
            .with_value(data.clone())
            .with_cause(cause.clone());
        let mut call = |_: &Value, _: Value| Ok::<Value, EmberError>(Value::Nil);
        assert!(selector.matches(&outer, &mut call).unwrap());

        let plain = Condition::new(ConditionKind::ValueException, "no cause").with_value(data.clone());
        assert!(!selector.matches(&plain, &mut call).unwrap());

        // Pairs are read from the thrown condition, not from its cause.
        let payload_on_cause = Condition::new(ConditionKind::ValueException, "outer")
            .with_cause(Arc::new(Condition::new(ConditionKind::ArityError, "inner").with_value(data)));
        assert!(!selector.matches(&payload_on_cause, &mut call).unwrap());
    }
}
