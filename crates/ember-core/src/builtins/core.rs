use std::sync::Arc;

use crate::ast::{AtomHandle, FnArity, Symbol, Value};
use crate::builtins::{def_builtin, display_string, err};
use crate::condition::{Condition, ConditionKind};
use crate::error::{EmberError, ErrorContext};
use crate::eval::call_value;
use crate::interrupt::request_interrupt;
use crate::namespaces::NamespaceRegistry;
use crate::symbols::split_qualified;
use crate::type_registry::runtime_type;

pub(crate) fn install(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    install_predicates(registry)?;
    install_strings(registry)?;
    install_atoms(registry)?;
    install_conditions(registry)?;

    def_builtin!(registry, "type", FnArity::exact(1), |args| {
        Ok(Value::keyword(runtime_type(&args[0])))
    });
    def_builtin!(registry, "identity", FnArity::exact(1), |args| Ok(args[0].clone()));
    def_builtin!(registry, "not", FnArity::exact(1), |args| {
        Ok(Value::Bool(!args[0].is_truthy()))
    });
    def_builtin!(registry, "println", FnArity::at_least(0), |args| {
        let parts = args
            .iter()
            .map(display_string)
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", parts.join(" "));
        Ok(Value::Nil)
    });
    def_builtin!(registry, "meta", FnArity::exact(1), |args| {
        Ok(args[0].meta().map(Value::Map).unwrap_or(Value::Nil))
    });
    def_builtin!(registry, "with-meta", FnArity::exact(2), |args| {
        match &args[1] {
            Value::Map(meta) => Ok(args[0].merge_meta(meta)),
            Value::Nil => Ok(args[0].clone()),
            other => Err(EmberError::expected("map", other)),
        }
    });
    def_builtin!(registry, "interrupt!", FnArity::exact(0), |_args| {
        request_interrupt();
        Ok(Value::Nil)
    });
    Ok(())
}

fn install_predicates(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "nil?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::Nil)))
    });
    def_builtin!(registry, "some?", FnArity::exact(1), |args| {
        Ok(Value::Bool(!matches!(args[0], Value::Nil)))
    });
    def_builtin!(registry, "zero?", FnArity::exact(1), |args| {
        number_test("zero?", &args[0], |n| n == 0.0)
    });
    def_builtin!(registry, "pos?", FnArity::exact(1), |args| {
        number_test("pos?", &args[0], |n| n > 0.0)
    });
    def_builtin!(registry, "neg?", FnArity::exact(1), |args| {
        number_test("neg?", &args[0], |n| n < 0.0)
    });
    def_builtin!(registry, "even?", FnArity::exact(1), |args| match &args[0] {
        Value::Int(n) => Ok(Value::Bool(n % 2 == 0)),
        other => err(format!("even? expects an integer, got {}", other.type_name())),
    });
    def_builtin!(registry, "odd?", FnArity::exact(1), |args| match &args[0] {
        Value::Int(n) => Ok(Value::Bool(n % 2 != 0)),
        other => err(format!("odd? expects an integer, got {}", other.type_name())),
    });
    def_builtin!(registry, "fn?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(
            args[0],
            Value::Func(_) | Value::Lambda(_) | Value::MultiFn(_) | Value::ProtocolFn(_)
        )))
    });
    def_builtin!(registry, "keyword?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::Keyword(_))))
    });
    def_builtin!(registry, "symbol?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
    });
    def_builtin!(registry, "string?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::String(_))))
    });
    def_builtin!(registry, "map?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::Map(_))))
    });
    def_builtin!(registry, "vector?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::Vector(_))))
    });
    def_builtin!(registry, "list?", FnArity::exact(1), |args| {
        Ok(Value::Bool(matches!(args[0], Value::List(_))))
    });
    Ok(())
}

fn number_test(name: &str, value: &Value, test: fn(f64) -> bool) -> Result<Value, EmberError> {
    match value {
        Value::Int(n) => Ok(Value::Bool(test(*n as f64))),
        Value::Float(n) => Ok(Value::Bool(test(*n))),
        other => err(format!("{} expects a number, got {}", name, other.type_name())),
    }
}

fn install_strings(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "str", FnArity::at_least(0), |args| {
        let mut out = String::new();
        for arg in args {
            if !matches!(arg, Value::Nil) {
                out.push_str(&display_string(arg)?);
            }
        }
        Ok(Value::String(out))
    });
    def_builtin!(registry, "name", FnArity::exact(1), |args| match &args[0] {
        Value::Keyword(k) => Ok(Value::string(split_qualified(k).1)),
        Value::Symbol(sym) => Ok(Value::String(sym.name.clone())),
        Value::String(s) => Ok(Value::String(s.clone())),
        other => Err(EmberError::expected("keyword, symbol or string", other)),
    });
    def_builtin!(registry, "namespace", FnArity::exact(1), |args| match &args[0] {
        Value::Keyword(k) => Ok(split_qualified(k)
            .0
            .map(Value::string)
            .unwrap_or(Value::Nil)),
        Value::Symbol(sym) => Ok(sym.ns.clone().map(Value::String).unwrap_or(Value::Nil)),
        other => Err(EmberError::expected("keyword or symbol", other)),
    });
    def_builtin!(registry, "keyword", FnArity::range(1, 2), |args| {
        match args {
            [Value::Keyword(k)] => Ok(Value::Keyword(k.clone())),
            [Value::String(name)] => Ok(Value::Keyword(name.clone())),
            [Value::Symbol(sym)] => Ok(Value::Keyword(sym.qualified())),
            [Value::String(ns), Value::String(name)] => Ok(Value::Keyword(format!("{}/{}", ns, name))),
            [Value::Nil, Value::String(name)] => Ok(Value::Keyword(name.clone())),
            _ => err("keyword expects a name string or a namespace and name"),
        }
    });
    def_builtin!(registry, "symbol", FnArity::range(1, 2), |args| {
        match args {
            [Value::Symbol(sym)] => Ok(Value::Symbol(sym.clone())),
            [Value::String(name)] => Ok(Value::Symbol(Symbol::parse(name))),
            [Value::Keyword(k)] => Ok(Value::Symbol(Symbol::parse(k))),
            [Value::String(ns), Value::String(name)] => {
                Ok(Value::Symbol(Symbol::qualified_in(ns.as_str(), name.as_str())))
            }
            [Value::Nil, Value::String(name)] => Ok(Value::Symbol(Symbol::simple(name.as_str()))),
            _ => err("symbol expects a name string or a namespace and name"),
        }
    });
    Ok(())
}

fn install_atoms(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    def_builtin!(registry, "atom", FnArity::exact(1), |args| {
        Ok(Value::Atom(AtomHandle::new(args[0].clone())))
    });
    def_builtin!(registry, "deref", FnArity::exact(1), |args| match &args[0] {
        Value::Atom(atom) => Ok(atom.get()),
        Value::Var(var) => Ok(var.value()),
        other => Err(EmberError::expected("atom or var", other)),
    });
    def_builtin!(registry, "reset!", FnArity::exact(2), |args| match &args[0] {
        Value::Atom(atom) => {
            atom.set(args[1].clone());
            Ok(args[1].clone())
        }
        other => Err(EmberError::expected("atom", other)),
    });
    def_builtin!(registry, "swap!", FnArity::at_least(2), |args| match &args[0] {
        Value::Atom(atom) => {
            let mut call_args = Vec::with_capacity(args.len() - 1);
            call_args.push(atom.get());
            call_args.extend_from_slice(&args[2..]);
            let updated = call_value(&args[1], &call_args)?;
            atom.set(updated.clone());
            Ok(updated)
        }
        other => Err(EmberError::expected("atom", other)),
    });
    Ok(())
}

fn condition_arg<'a>(name: &str, value: &'a Value) -> Result<&'a Arc<Condition>, EmberError> {
    match value {
        Value::Condition(cond) => Ok(cond),
        other => err(format!("{} expects a condition, got {}", name, other.type_name())),
    }
}

fn install_conditions(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    // A condition is rethrown as-is; any other value travels as the payload
    // of a ValueException.
    def_builtin!(registry, "throw", FnArity::exact(1), |args| match &args[0] {
        Value::Condition(cond) => Err(EmberError::Thrown(cond.clone(), ErrorContext::default())),
        other => Err(EmberError::thrown(
            Condition::new(ConditionKind::ValueException, display_string(other)?)
                .with_value(other.clone()),
        )),
    });
    // (ex :Kind? message value? cause?)
    def_builtin!(registry, "ex", FnArity::range(1, 4), |args| {
        let (kind, rest) = match &args[0] {
            Value::Keyword(name) => match ConditionKind::from_name(name) {
                Some(kind) => (Some(kind), &args[1..]),
                None => return err(format!("ex: unknown condition kind :{}", name)),
            },
            _ => (None, args),
        };
        let message = match rest.first() {
            Some(Value::String(s)) => s.clone(),
            Some(other) => display_string(other)?,
            None => return err("ex: missing message"),
        };
        let value = rest.get(1).filter(|v| !matches!(v, Value::Nil));
        let kind = kind.unwrap_or(if value.is_some() {
            ConditionKind::ValueException
        } else {
            ConditionKind::RuntimeException
        });
        let mut cond = Condition::new(kind, message);
        if let Some(value) = value {
            cond = cond.with_value(value.clone());
        }
        match rest.get(2) {
            Some(Value::Condition(cause)) => cond = cond.with_cause(cause.clone()),
            Some(Value::Nil) | None => {}
            Some(other) => return Err(EmberError::expected("condition", other)),
        }
        Ok(Value::Condition(Arc::new(cond)))
    });
    def_builtin!(registry, "ex-message", FnArity::exact(1), |args| {
        Ok(Value::String(condition_arg("ex-message", &args[0])?.message.clone()))
    });
    def_builtin!(registry, "ex-value", FnArity::exact(1), |args| {
        Ok(condition_arg("ex-value", &args[0])?
            .value
            .clone()
            .unwrap_or(Value::Nil))
    });
    def_builtin!(registry, "ex-cause", FnArity::exact(1), |args| {
        Ok(condition_arg("ex-cause", &args[0])?
            .cause
            .clone()
            .map(Value::Condition)
            .unwrap_or(Value::Nil))
    });
    def_builtin!(registry, "ex-kind", FnArity::exact(1), |args| {
        Ok(Value::keyword(condition_arg("ex-kind", &args[0])?.kind.name()))
    });
    Ok(())
}
