use im::{HashMap, HashSet, Vector};

use crate::ast::{FnArity, Key, Value};
use crate::builtins::{def_builtin, err, get_value};
use crate::error::EmberError;
use crate::eval::call_value;
use crate::namespaces::NamespaceRegistry;

pub(crate) fn install(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    install_constructors(registry)?;
    install_access(registry)?;
    install_functional(registry)?;
    Ok(())
}

fn install_constructors(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "list", FnArity::at_least(0), |args| {
        Ok(Value::list(args.to_vec()))
    });
    def_builtin!(registry, "vector", FnArity::at_least(0), |args| {
        Ok(Value::vector(args.to_vec()))
    });
    def_builtin!(registry, "hash-map", FnArity::at_least(0), |args| {
        if args.len() % 2 != 0 {
            return err("hash-map expects an even number of arguments");
        }
        let mut map = HashMap::new();
        for pair in args.chunks(2) {
            map.insert(Key::from_value(&pair[0])?, pair[1].clone());
        }
        Ok(Value::Map(map))
    });
    def_builtin!(registry, "hash-set", FnArity::at_least(0), |args| {
        Ok(Value::Set(args.iter().cloned().collect::<HashSet<Value>>()))
    });
    def_builtin!(registry, "vec", FnArity::exact(1), |args| {
        Ok(Value::vector(args[0].to_items()?))
    });
    def_builtin!(registry, "seq", FnArity::exact(1), |args| {
        let items = args[0].to_items()?;
        Ok(if items.is_empty() {
            Value::Nil
        } else {
            Value::list(items)
        })
    });
    def_builtin!(registry, "cons", FnArity::exact(2), |args| {
        let mut items: Vector<Value> = args[1].to_items()?.into_iter().collect();
        items.push_front(args[0].clone());
        Ok(Value::List(items))
    });
    def_builtin!(registry, "concat", FnArity::at_least(0), |args| {
        let mut items = Vector::new();
        for arg in args {
            items.extend(arg.to_items()?);
        }
        Ok(Value::List(items))
    });
    def_builtin!(registry, "range", FnArity::range(1, 3), |args| {
        let ints = args
            .iter()
            .map(|arg| match arg {
                Value::Int(n) => Ok(*n),
                other => Err(EmberError::expected("integer", other)),
            })
            .collect::<Result<Vec<i64>, _>>()?;
        let (start, end, step) = match ints.as_slice() {
            [end] => (0, *end, 1),
            [start, end] => (*start, *end, 1),
            [start, end, step] => (*start, *end, *step),
            _ => return err("range expects one to three integers"),
        };
        if step == 0 {
            return err("range step must not be zero");
        }
        let mut items = Vector::new();
        let mut n = start;
        while (step > 0 && n < end) || (step < 0 && n > end) {
            items.push_back(Value::Int(n));
            n = match n.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(Value::List(items))
    });
    Ok(())
}

fn install_access(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "first", FnArity::exact(1), |args| {
        Ok(args[0].to_items()?.into_iter().next().unwrap_or(Value::Nil))
    });
    def_builtin!(registry, "rest", FnArity::exact(1), |args| {
        Ok(Value::list(args[0].to_items()?.into_iter().skip(1).collect()))
    });
    def_builtin!(registry, "next", FnArity::exact(1), |args| {
        let rest: Vec<Value> = args[0].to_items()?.into_iter().skip(1).collect();
        Ok(if rest.is_empty() {
            Value::Nil
        } else {
            Value::list(rest)
        })
    });
    def_builtin!(registry, "nth", FnArity::range(2, 3), |args| {
        let Value::Int(idx) = &args[1] else {
            return Err(EmberError::expected("integer index", &args[1]));
        };
        let items = args[0].to_items()?;
        let found = usize::try_from(*idx).ok().and_then(|i| items.get(i).cloned());
        match (found, args.get(2)) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => err(format!(
                "nth: index {} out of bounds for length {}",
                idx,
                items.len()
            )),
        }
    });
    def_builtin!(registry, "count", FnArity::exact(1), |args| {
        let count = match &args[0] {
            Value::Nil => 0,
            Value::String(s) => s.chars().count(),
            Value::List(items) | Value::Vector(items) => items.len(),
            Value::Map(map) => map.len(),
            Value::Set(set) => set.len(),
            other => return Err(EmberError::expected("countable collection", other)),
        };
        Ok(Value::Int(count as i64))
    });
    def_builtin!(registry, "empty?", FnArity::exact(1), |args| {
        Ok(Value::Bool(match &args[0] {
            Value::Nil => true,
            Value::String(s) => s.is_empty(),
            Value::List(items) | Value::Vector(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            other => return Err(EmberError::expected("collection", other)),
        }))
    });
    def_builtin!(registry, "get", FnArity::range(2, 3), |args| {
        get_value(&args[0], &args[1], args.get(2))
    });
    def_builtin!(registry, "conj", FnArity::at_least(1), |args| {
        conj(&args[0], &args[1..])
    });
    def_builtin!(registry, "assoc", FnArity::at_least(3), |args| {
        if (args.len() - 1) % 2 != 0 {
            return err("assoc expects key/value pairs");
        }
        let mut target = args[0].clone();
        for pair in args[1..].chunks(2) {
            target = assoc(&target, &pair[0], pair[1].clone())?;
        }
        Ok(target)
    });
    Ok(())
}

fn conj(target: &Value, items: &[Value]) -> Result<Value, EmberError> {
    match target {
        Value::Nil | Value::List(_) => {
            let mut list = target.as_seq().cloned().unwrap_or_default();
            for item in items {
                list.push_front(item.clone());
            }
            Ok(Value::List(list))
        }
        Value::Vector(vec) => {
            let mut vec = vec.clone();
            vec.extend(items.iter().cloned());
            Ok(Value::Vector(vec))
        }
        Value::Set(set) => {
            let mut set = set.clone();
            set.extend(items.iter().cloned());
            Ok(Value::Set(set))
        }
        Value::Map(_) => {
            let mut out = target.clone();
            for item in items {
                match item.as_seq() {
                    Some(entry) if entry.len() == 2 => {
                        out = assoc(&out, &entry[0], entry[1].clone())?;
                    }
                    _ => return err("conj on a map expects [key value] entries"),
                }
            }
            Ok(out)
        }
        other => Err(EmberError::expected("collection", other)),
    }
}

fn assoc(target: &Value, key: &Value, value: Value) -> Result<Value, EmberError> {
    match target {
        Value::Nil => {
            let mut map = HashMap::new();
            map.insert(Key::from_value(key)?, value);
            Ok(Value::Map(map))
        }
        Value::Map(map) => {
            let mut map = map.clone();
            map.insert(Key::from_value(key)?, value);
            Ok(Value::Map(map))
        }
        Value::Vector(vec) => {
            let idx = match key {
                Value::Int(n) if *n >= 0 && (*n as usize) <= vec.len() => *n as usize,
                _ => return err(format!("assoc: index {} out of bounds", key)),
            };
            let mut vec = vec.clone();
            if idx == vec.len() {
                vec.push_back(value);
            } else {
                vec[idx] = value;
            }
            Ok(Value::Vector(vec))
        }
        other => Err(EmberError::expected("map or vector", other)),
    }
}

fn install_functional(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "apply", FnArity::at_least(2), |args| {
        let Some((last, middle)) = args[1..].split_last() else {
            return err("apply expects a final argument sequence");
        };
        let mut call_args = middle.to_vec();
        call_args.extend(last.to_items()?);
        call_value(&args[0], &call_args)
    });
    def_builtin!(registry, "map", FnArity::at_least(2), |args| {
        let colls = args[1..]
            .iter()
            .map(Value::to_items)
            .collect::<Result<Vec<_>, _>>()?;
        let len = colls.iter().map(Vec::len).min().unwrap_or(0);
        let mut out = Vector::new();
        for idx in 0..len {
            let call_args: Vec<Value> = colls.iter().map(|coll| coll[idx].clone()).collect();
            out.push_back(call_value(&args[0], &call_args)?);
        }
        Ok(Value::List(out))
    });
    def_builtin!(registry, "filter", FnArity::exact(2), |args| {
        let mut out = Vector::new();
        for item in args[1].to_items()? {
            if call_value(&args[0], std::slice::from_ref(&item))?.is_truthy() {
                out.push_back(item);
            }
        }
        Ok(Value::List(out))
    });
    def_builtin!(registry, "reduce", FnArity::range(2, 3), |args| {
        let (mut acc, items) = if args.len() == 3 {
            (args[1].clone(), args[2].to_items()?)
        } else {
            let mut items = args[1].to_items()?.into_iter();
            match items.next() {
                Some(first) => (first, items.collect()),
                None => return call_value(&args[0], &[]),
            }
        };
        for item in items {
            acc = call_value(&args[0], &[acc, item])?;
        }
        Ok(acc)
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conj_adds_at_the_natural_end() {
        let list = conj(&Value::list(vec![Value::Int(2)]), &[Value::Int(1)]).unwrap();
        assert_eq!(list.to_string(), "(1 2)");
        let vec = conj(&Value::vector(vec![Value::Int(1)]), &[Value::Int(2)]).unwrap();
        assert_eq!(vec.to_string(), "[1 2]");
    }

    #[test]
    fn assoc_extends_vectors_by_one() {
        let vec = Value::vector(vec![Value::Int(1)]);
        assert_eq!(assoc(&vec, &Value::Int(1), Value::Int(2)).unwrap().to_string(), "[1 2]");
        assert!(assoc(&vec, &Value::Int(5), Value::Int(2)).is_err());
    }
}
