use im::{HashMap, HashSet, Vector};

use crate::ast::{Key, Value};
use crate::type_registry::CustomData;

/// Printed form of a value. `readable` quotes strings so the output reads
/// back as the same data; `str` and `println` pass `false`.
pub fn format_value(value: &Value, readable: bool) -> String {
    let mut out = String::new();
    write_value(&mut out, value, readable);
    out
}

fn write_value(out: &mut String, value: &Value, readable: bool) {
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => out.push_str(&b.to_string()),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Float(n) => out.push_str(&format_float(*n)),
        Value::String(s) if readable => {
            out.push('"');
            out.push_str(&escape_string(s));
            out.push('"');
        }
        Value::String(s) => out.push_str(s),
        Value::Keyword(k) => {
            out.push(':');
            out.push_str(k);
        }
        Value::Symbol(sym) => out.push_str(&sym.qualified()),
        Value::List(items) => write_seq(out, "(", ")", items, readable),
        Value::Vector(items) => write_seq(out, "[", "]", items, readable),
        Value::Map(map) => write_map(out, map, readable),
        Value::Set(set) => write_set(out, set, readable),
        Value::Func(f) => out.push_str(&format!("#<fn {}>", f.name())),
        Value::Lambda(l) => out.push_str(&format!(
            "#<fn {}>",
            l.name.as_deref().unwrap_or("anonymous")
        )),
        Value::Macro(l) => out.push_str(&format!(
            "#<macro {}>",
            l.name.as_deref().unwrap_or("anonymous")
        )),
        Value::MultiFn(m) => out.push_str(&format!("#<multimethod {}>", m.name)),
        Value::Protocol(p) => out.push_str(&format!("#<protocol {}>", p.name)),
        Value::ProtocolFn(p) => out.push_str(&format!("#<protocol-fn {}>", p.name)),
        Value::TypeDef(t) => out.push_str(&format!("#<type {}>", t.qualified_name())),
        Value::Custom(c) => {
            out.push('#');
            out.push_str(&c.type_name());
            match &c.data {
                CustomData::Record(fields) => {
                    out.push('{');
                    for (idx, (name, v)) in fields.iter().enumerate() {
                        if idx > 0 {
                            out.push_str(", ");
                        }
                        out.push(':');
                        out.push_str(name);
                        out.push(' ');
                        write_value(out, v, readable);
                    }
                    out.push('}');
                }
                CustomData::Wrapped(v) => {
                    out.push(' ');
                    write_value(out, v, readable);
                }
            }
        }
        Value::Atom(a) => {
            out.push_str("#<atom ");
            write_value(out, &a.get(), readable);
            out.push('>');
        }
        Value::Var(v) => out.push_str(&format!("#'{}", v.qualified_name())),
        Value::Condition(c) => out.push_str(&format!("#<{} {}>", c.kind, c.message)),
    }
}

fn write_seq(out: &mut String, open: &str, close: &str, items: &Vector<Value>, readable: bool) {
    out.push_str(open);
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        write_value(out, item, readable);
    }
    out.push_str(close);
}

fn write_map(out: &mut String, map: &HashMap<Key, Value>, readable: bool) {
    let mut entries: Vec<(&Key, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (idx, (k, v)) in entries.into_iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        write_value(out, &k.to_value(), readable);
        out.push(' ');
        write_value(out, v, readable);
    }
    out.push('}');
}

fn write_set(out: &mut String, set: &HashSet<Value>, readable: bool) {
    let mut items: Vec<String> = set.iter().map(|v| format_value(v, readable)).collect();
    items.sort();
    out.push_str("#{");
    out.push_str(&items.join(" "));
    out.push('}');
}

fn format_float(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{:.1}", n)
    } else {
        n.to_string()
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_and_display_strings() {
        let v = Value::vector(vec![Value::string("a\"b"), Value::Float(2.0), Value::Nil]);
        assert_eq!(format_value(&v, true), "[\"a\\\"b\" 2.0 nil]");
        assert_eq!(format_value(&Value::string("hi"), false), "hi");
    }

    #[test]
    fn maps_print_in_key_order() {
        let mut map = HashMap::new();
        map.insert(Key::keyword("b"), Value::Int(2));
        map.insert(Key::keyword("a"), Value::Int(1));
        assert_eq!(format_value(&Value::Map(map), true), "{:a 1, :b 2}");
    }
}
