use crate::ast::{Symbol, Value};
use crate::error::EmberError;
use crate::symbols::CORE_NS;

fn core(name: &str) -> Value {
    Value::Symbol(Symbol::qualified_in(CORE_NS, name))
}

fn quote(form: Value) -> Value {
    Value::list(vec![Value::symbol("quote"), form])
}

fn tagged<'a>(form: &'a Value, tag: &str) -> Option<&'a Value> {
    match form {
        Value::List(items) if items.len() == 2 => {
            if items[0].as_simple_symbol() == Some(tag) {
                Some(&items[1])
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Rewrite a quasiquote template into `core/concat`/`core/list`/`quote`
/// calls. `depth` starts at 1 and grows with nested quasiquotes.
pub fn expand(form: &Value, depth: usize) -> Result<Value, EmberError> {
    if let Some(inner) = tagged(form, "unquote") {
        return if depth == 1 {
            Ok(inner.clone())
        } else {
            Ok(Value::list(vec![
                core("list"),
                quote(Value::symbol("unquote")),
                expand(inner, depth - 1)?,
            ]))
        };
    }
    if tagged(form, "unquote-splicing").is_some() && depth == 1 {
        return Err(EmberError::runtime(
            "unquote-splicing used outside of a list, vector or set",
        ));
    }
    if let Some(inner) = tagged(form, "quasiquote") {
        return Ok(Value::list(vec![
            core("list"),
            quote(Value::symbol("quasiquote")),
            expand(inner, depth + 1)?,
        ]));
    }
    match form {
        Value::List(items) if items.is_empty() => Ok(quote(form.clone())),
        Value::List(items) => {
            let items: Vec<Value> = items.iter().cloned().collect();
            Ok(Value::list(vec![
                core("apply"),
                core("list"),
                concat_parts(&items, depth)?,
            ]))
        }
        Value::Vector(items) => {
            let items: Vec<Value> = items.iter().cloned().collect();
            Ok(Value::list(vec![core("vec"), concat_parts(&items, depth)?]))
        }
        Value::Set(items) => {
            let items: Vec<Value> = items.iter().cloned().collect();
            Ok(Value::list(vec![
                core("apply"),
                core("hash-set"),
                concat_parts(&items, depth)?,
            ]))
        }
        Value::Map(map) => {
            let mut flat = Vec::with_capacity(map.len() * 2);
            for (k, v) in map.iter() {
                flat.push(k.to_value());
                flat.push(v.clone());
            }
            Ok(Value::list(vec![
                core("apply"),
                core("hash-map"),
                concat_parts(&flat, depth)?,
            ]))
        }
        Value::Symbol(_) => Ok(quote(form.clone())),
        other => Ok(other.clone()),
    }
}

fn concat_parts(items: &[Value], depth: usize) -> Result<Value, EmberError> {
    let mut parts = vec![core("concat")];
    for item in items {
        match tagged(item, "unquote-splicing") {
            Some(spliced) if depth == 1 => parts.push(spliced.clone()),
            Some(spliced) => parts.push(Value::list(vec![
                core("list"),
                Value::list(vec![
                    core("list"),
                    quote(Value::symbol("unquote-splicing")),
                    expand(spliced, depth - 1)?,
                ]),
            ])),
            None => parts.push(Value::list(vec![core("list"), expand(item, depth)?])),
        }
    }
    Ok(Value::list(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_source;

    #[test]
    fn unquote_is_spliced_into_concat() {
        let form = read_source("(a ~b ~@c)").unwrap().remove(0);
        assert_eq!(
            expand(&form, 1).unwrap().to_string(),
            "(core/apply core/list (core/concat (core/list (quote a)) (core/list b) c))"
        );
    }

    #[test]
    fn literals_stay_literal() {
        assert_eq!(expand(&Value::Int(1), 1).unwrap(), Value::Int(1));
        assert_eq!(
            expand(&Value::symbol("x"), 1).unwrap().to_string(),
            "(quote x)"
        );
    }

    #[test]
    fn top_level_splice_is_an_error() {
        let form = read_source("~@xs").unwrap().remove(0);
        assert!(expand(&form, 1).is_err());
    }
}
