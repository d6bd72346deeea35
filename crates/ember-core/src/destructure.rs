use crate::ast::{Key, MetaMap, Value};
use crate::error::EmberError;
use crate::type_registry::CustomData;

/// Evaluates `:or` default expressions.
pub type DefaultEval<'a> = dyn FnMut(&Value) -> Result<Value, EmberError> + 'a;

/// Destructure `value` against `pattern`, appending `(name, value)` pairs
/// to `out` in binding order.
pub fn bind_pattern(
    pattern: &Value,
    value: Value,
    out: &mut Vec<(String, Value)>,
    defaults: &mut DefaultEval<'_>,
) -> Result<(), EmberError> {
    match pattern {
        Value::Symbol(sym) if sym.ns.is_none() => {
            out.push((sym.name.clone(), value));
            Ok(())
        }
        Value::Vector(items) => {
            let items: Vec<Value> = items.iter().cloned().collect();
            bind_vector_pattern(&items, value, out, defaults)
        }
        Value::Map(entries) => bind_map_pattern(entries, value, out, defaults),
        other => Err(EmberError::runtime(format!(
            "invalid binding pattern: {}",
            other
        ))),
    }
}

fn bind_vector_pattern(
    items: &[Value],
    value: Value,
    out: &mut Vec<(String, Value)>,
    defaults: &mut DefaultEval<'_>,
) -> Result<(), EmberError> {
    let seq = match &value {
        Value::Nil | Value::List(_) | Value::Vector(_) | Value::String(_) => value.to_items()?,
        other => return Err(EmberError::expected("sequential value to destructure", other)),
    };
    let mut idx = 0;
    let mut pos = 0;
    while idx < items.len() {
        let item = &items[idx];
        if item.as_simple_symbol() == Some("&") {
            let rest_pat = items
                .get(idx + 1)
                .ok_or_else(|| EmberError::runtime("& must be followed by a binding"))?;
            let rest: Vec<Value> = seq.iter().skip(pos).cloned().collect();
            let rest_value = if rest.is_empty() {
                Value::Nil
            } else {
                Value::list(rest)
            };
            bind_pattern(rest_pat, rest_value, out, defaults)?;
            idx += 2;
            continue;
        }
        if matches!(item, Value::Keyword(k) if k == "as") {
            let name = items
                .get(idx + 1)
                .and_then(|v| v.as_simple_symbol())
                .ok_or_else(|| EmberError::runtime(":as expects a symbol"))?;
            out.push((name.to_string(), value.clone()));
            idx += 2;
            continue;
        }
        let element = seq.get(pos).cloned().unwrap_or(Value::Nil);
        bind_pattern(item, element, out, defaults)?;
        pos += 1;
        idx += 1;
    }
    Ok(())
}

fn lookup(value: &Value, key: &Key) -> Value {
    match value {
        Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Nil),
        Value::Custom(custom) => match (&custom.data, key) {
            (CustomData::Record(fields), Key::Keyword(name)) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nil),
            _ => Value::Nil,
        },
        _ => Value::Nil,
    }
}

fn bind_map_pattern(
    entries: &MetaMap,
    value: Value,
    out: &mut Vec<(String, Value)>,
    defaults: &mut DefaultEval<'_>,
) -> Result<(), EmberError> {
    if !matches!(value, Value::Nil | Value::Map(_) | Value::Custom(_)) {
        return Err(EmberError::expected("map to destructure", &value));
    }
    let or_map = match entries.get(&Key::keyword("or")) {
        Some(Value::Map(m)) => Some(m.clone()),
        Some(other) => return Err(EmberError::expected(":or map", other)),
        None => None,
    };
    let mut bind_one = |name: &str, key: Key, out: &mut Vec<(String, Value)>| -> Result<(), EmberError> {
        let mut found = lookup(&value, &key);
        if matches!(found, Value::Nil) {
            if let Some(default) = or_map
                .as_ref()
                .and_then(|m| m.get(&Key::Symbol(name.to_string())))
            {
                found = defaults(default)?;
            }
        }
        out.push((name.to_string(), found));
        Ok(())
    };
    let mut sorted: Vec<(&Key, &Value)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    for (key, pattern) in sorted {
        match key {
            Key::Keyword(kw) if kw == "keys" || kw == "strs" || kw == "syms" => {
                let names = pattern
                    .as_seq()
                    .ok_or_else(|| EmberError::runtime(format!(":{} expects a vector", kw)))?;
                for name in names.iter() {
                    let name = name
                        .as_simple_symbol()
                        .ok_or_else(|| EmberError::runtime(format!(":{} expects symbols", kw)))?;
                    let lookup_key = match kw.as_str() {
                        "keys" => Key::Keyword(name.to_string()),
                        "strs" => Key::String(name.to_string()),
                        _ => Key::Symbol(name.to_string()),
                    };
                    bind_one(name, lookup_key, out)?;
                }
            }
            Key::Keyword(kw) if kw == "or" => {}
            Key::Keyword(kw) if kw == "as" => {}
            Key::Symbol(local) => {
                let lookup_key = Key::from_value(pattern)?;
                bind_one(local, lookup_key, out)?;
            }
            other => {
                return Err(EmberError::runtime(format!(
                    "invalid map binding key: {}",
                    other
                )))
            }
        }
    }
    if let Some(alias) = entries.get(&Key::keyword("as")) {
        let name = alias
            .as_simple_symbol()
            .ok_or_else(|| EmberError::runtime(":as expects a symbol"))?;
        out.push((name.to_string(), value.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_source;

    fn bind(pattern: &str, value: &str) -> Vec<(String, Value)> {
        let pattern = read_source(pattern).unwrap().remove(0);
        let value = read_source(value).unwrap().remove(0);
        let mut out = Vec::new();
        let mut defaults = |form: &Value| Ok::<Value, EmberError>(form.clone());
        bind_pattern(&pattern, value, &mut out, &mut defaults).unwrap();
        out
    }

    #[test]
    fn vector_with_rest_and_as() {
        let out = bind("[a b & more :as all]", "[1 2 3 4]");
        assert_eq!(out[0], ("a".into(), Value::Int(1)));
        assert_eq!(out[1], ("b".into(), Value::Int(2)));
        assert_eq!(out[2].1.to_string(), "(3 4)");
        assert_eq!(out[3].1.to_string(), "[1 2 3 4]");
    }

    #[test]
    fn missing_elements_bind_nil() {
        let out = bind("[a b]", "[1]");
        assert_eq!(out[1], ("b".into(), Value::Nil));
    }

    #[test]
    fn map_keys_with_defaults() {
        let out = bind("{:keys [x y] :or {y 9}}", "{:x 1}");
        assert!(out.contains(&("x".into(), Value::Int(1))));
        assert!(out.contains(&("y".into(), Value::Int(9))));
    }
}
