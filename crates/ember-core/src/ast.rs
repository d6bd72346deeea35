use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use im::{HashMap, HashSet, Vector};

use crate::condition::Condition;
use crate::error::EmberError;
use crate::fn_builder::Lambda;
use crate::multimethods::MultiMethod;
use crate::namespaces::Var;
use crate::protocols::{Protocol, ProtocolFn};
use crate::type_registry::{CustomTypeDef, CustomValue};

pub type MetaMap = HashMap<Key, Value>;

/// Map keys. Only scalar values may key a map.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Nil,
    Bool(bool),
    Int(i64),
    String(String),
    Keyword(String),
    Symbol(String),
}

impl Key {
    pub fn keyword(name: impl Into<String>) -> Self {
        Key::Keyword(name.into())
    }

    pub fn from_value(value: &Value) -> Result<Key, EmberError> {
        match value {
            Value::Nil => Ok(Key::Nil),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            Value::Int(n) => Ok(Key::Int(*n)),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Keyword(k) => Ok(Key::Keyword(k.clone())),
            Value::Symbol(sym) => Ok(Key::Symbol(sym.qualified())),
            other => Err(EmberError::type_mismatch(format!(
                "{} cannot be used as a map key",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Nil => Value::Nil,
            Key::Bool(b) => Value::Bool(*b),
            Key::Int(n) => Value::Int(*n),
            Key::String(s) => Value::String(s.clone()),
            Key::Keyword(k) => Value::Keyword(k.clone()),
            Key::Symbol(s) => Value::Symbol(Symbol::parse(s)),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// A symbol as read from source. Equality ignores metadata.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub ns: Option<String>,
    pub name: String,
    pub meta: Option<MetaMap>,
}

impl Symbol {
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            ns: None,
            name: name.into(),
            meta: None,
        }
    }

    pub fn qualified_in(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.into()),
            name: name.into(),
            meta: None,
        }
    }

    /// Split `ns/name`. A lone `/` is the division symbol.
    pub fn parse(text: &str) -> Self {
        match text.find('/') {
            Some(idx) if idx > 0 && idx + 1 < text.len() => {
                Self::qualified_in(&text[..idx], &text[idx + 1..])
            }
            _ => Self::simple(text),
        }
    }

    pub fn qualified(&self) -> String {
        match &self.ns {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn with_meta(mut self, meta: Option<MetaMap>) -> Self {
        self.meta = meta;
        self
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.name.hash(state);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FnArity {
    min: usize,
    max: Option<usize>,
}

impl FnArity {
    pub fn new(min: usize, max: Option<usize>) -> Self {
        if let Some(max_val) = max {
            assert!(min <= max_val, "min arity cannot exceed max arity");
        }
        Self { min, max }
    }

    pub fn exact(count: usize) -> Self {
        Self::new(count, Some(count))
    }

    pub fn at_least(min: usize) -> Self {
        Self::new(min, None)
    }

    pub fn range(min: usize, max: usize) -> Self {
        Self::new(min, Some(max))
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    pub fn describe(&self) -> String {
        match self.max {
            Some(max) if max == self.min => format!("{}", max),
            Some(max) => format!("{}..{}", self.min, max),
            None => format!("{}+", self.min),
        }
    }
}

pub type NativeFnBody = dyn Fn(&[Value]) -> Result<Value, EmberError> + Send + Sync;

pub struct NativeFn {
    func: Box<NativeFnBody>,
    arity: FnArity,
    name: Arc<str>,
}

impl NativeFn {
    pub fn new(
        arity: FnArity,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, EmberError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            func: Box::new(func),
            arity,
            name: name.into().into(),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EmberError> {
        if !self.arity.accepts(args.len()) {
            return Err(EmberError::arity(format!(
                "{} expects {} arguments, got {}",
                self.name,
                self.arity.describe(),
                args.len()
            )));
        }
        (self.func)(args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> FnArity {
        self.arity
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native {}>", self.name)
    }
}

/// Shared mutable cell behind `atom`.
#[derive(Clone, Debug)]
pub struct AtomHandle(Arc<RwLock<Value>>);

impl AtomHandle {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.read().unwrap().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.write().unwrap() = value;
    }

    pub fn ptr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Keyword(String),
    Symbol(Symbol),
    List(Vector<Value>),
    Vector(Vector<Value>),
    Map(HashMap<Key, Value>),
    Set(HashSet<Value>),
    Func(Arc<NativeFn>),
    Lambda(Arc<Lambda>),
    Macro(Arc<Lambda>),
    MultiFn(Arc<MultiMethod>),
    Protocol(Arc<Protocol>),
    ProtocolFn(Arc<ProtocolFn>),
    TypeDef(Arc<CustomTypeDef>),
    Custom(Arc<CustomValue>),
    Atom(AtomHandle),
    Var(Arc<Var>),
    Condition(Arc<Condition>),
}

impl Value {
    pub fn symbol(text: &str) -> Value {
        Value::Symbol(Symbol::parse(text))
    }

    pub fn keyword(name: impl Into<String>) -> Value {
        Value::Keyword(name.into())
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(items.into_iter().collect())
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(items.into_iter().collect())
    }

    pub fn native_fn(
        arity: FnArity,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, EmberError> + Send + Sync + 'static,
    ) -> Value {
        Value::Func(Arc::new(NativeFn::new(arity, name, func)))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Func(_)
                | Value::Lambda(_)
                | Value::MultiFn(_)
                | Value::ProtocolFn(_)
                | Value::Keyword(_)
                | Value::Map(_)
                | Value::Set(_)
        )
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    /// Unqualified symbol name, if this is one.
    pub fn as_simple_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(sym) if sym.ns.is_none() => Some(sym.name.as_str()),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&Vector<Value>> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// Elements of any sequential collection; nil is empty.
    pub fn to_items(&self) -> Result<Vec<Value>, EmberError> {
        match self {
            Value::Nil => Ok(Vec::new()),
            Value::List(items) | Value::Vector(items) => Ok(items.iter().cloned().collect()),
            Value::Set(items) => Ok(items.iter().cloned().collect()),
            Value::Map(map) => Ok(map
                .iter()
                .map(|(k, v)| Value::vector(vec![k.to_value(), v.clone()]))
                .collect()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            other => Err(EmberError::expected("sequence", other)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "long",
            Value::Float(_) => "double",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Func(_) | Value::Lambda(_) => "function",
            Value::Macro(_) => "macro",
            Value::MultiFn(_) => "multimethod",
            Value::Protocol(_) => "protocol",
            Value::ProtocolFn(_) => "protocol-fn",
            Value::TypeDef(_) => "type",
            Value::Custom(_) => "record",
            Value::Atom(_) => "atom",
            Value::Var(_) => "var",
            Value::Condition(_) => "condition",
        }
    }

    pub fn meta(&self) -> Option<MetaMap> {
        match self {
            Value::Symbol(sym) => sym.meta.clone(),
            Value::Lambda(lambda) | Value::Macro(lambda) => lambda.meta.clone(),
            Value::Custom(custom) => custom.meta.clone(),
            Value::Var(var) => Some(var.meta()),
            _ => None,
        }
    }

    /// Copy of the value with `meta` merged over existing metadata. Values
    /// that cannot carry metadata are returned unchanged.
    pub fn merge_meta(&self, meta: &MetaMap) -> Value {
        if meta.is_empty() {
            return self.clone();
        }
        let merged = |existing: &Option<MetaMap>| {
            let mut base = existing.clone().unwrap_or_default();
            for (k, v) in meta.iter() {
                base.insert(k.clone(), v.clone());
            }
            Some(base)
        };
        match self {
            Value::Symbol(sym) => Value::Symbol(sym.clone().with_meta(merged(&sym.meta))),
            Value::Lambda(lambda) => {
                let mut copy = (**lambda).clone();
                copy.meta = merged(&lambda.meta);
                Value::Lambda(Arc::new(copy))
            }
            Value::Macro(lambda) => {
                let mut copy = (**lambda).clone();
                copy.meta = merged(&lambda.meta);
                Value::Macro(Arc::new(copy))
            }
            Value::Custom(custom) => {
                let mut copy = (**custom).clone();
                copy.meta = merged(&custom.meta);
                Value::Custom(Arc::new(copy))
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b))
            | (Value::Vector(a), Value::Vector(b))
            | (Value::List(a), Value::Vector(b))
            | (Value::Vector(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Lambda(a), Value::Lambda(b)) | (Value::Macro(a), Value::Macro(b)) => {
                Arc::ptr_eq(a, b) || a.id == b.id
            }
            (Value::MultiFn(a), Value::MultiFn(b)) => Arc::ptr_eq(a, b),
            (Value::Protocol(a), Value::Protocol(b)) => a.name == b.name,
            (Value::ProtocolFn(a), Value::ProtocolFn(b)) => a.name == b.name,
            (Value::TypeDef(a), Value::TypeDef(b)) => a.name == b.name,
            (Value::Custom(a), Value::Custom(b)) => a.type_name() == b.type_name() && a.data == b.data,
            (Value::Atom(a), Value::Atom(b)) => a.ptr() == b.ptr(),
            (Value::Var(a), Value::Var(b)) => Arc::ptr_eq(a, b),
            (Value::Condition(a), Value::Condition(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            // lists and vectors compare equal, so they share a hash
            Value::List(items) | Value::Vector(items) => {
                0u8.hash(state);
                items.hash(state);
            }
            Value::Map(map) => {
                1u8.hash(state);
                map.len().hash(state);
                let mut acc: u64 = 0;
                for (k, v) in map.iter() {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut hasher);
                    v.hash(&mut hasher);
                    acc = acc.wrapping_add(hasher.finish());
                }
                acc.hash(state);
            }
            Value::Set(set) => {
                2u8.hash(state);
                set.len().hash(state);
                let mut acc: u64 = 0;
                for v in set.iter() {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    v.hash(&mut hasher);
                    acc = acc.wrapping_add(hasher.finish());
                }
                acc.hash(state);
            }
            _ => {
                std::mem::discriminant(self).hash(state);
                match self {
                    Value::Bool(b) => b.hash(state),
                    Value::Int(n) => n.hash(state),
                    Value::Float(f) => f.to_bits().hash(state),
                    Value::String(s) | Value::Keyword(s) => s.hash(state),
                    Value::Symbol(sym) => sym.hash(state),
                    Value::Func(f) => (Arc::as_ptr(f) as *const () as usize).hash(state),
                    Value::Lambda(l) | Value::Macro(l) => l.id.hash(state),
                    Value::MultiFn(m) => (Arc::as_ptr(m) as usize).hash(state),
                    Value::Protocol(p) => p.name.hash(state),
                    Value::ProtocolFn(p) => p.name.hash(state),
                    Value::TypeDef(t) => t.name.hash(state),
                    Value::Custom(c) => {
                        c.type_name().hash(state);
                        c.data.hash(state);
                    }
                    Value::Atom(a) => a.ptr().hash(state),
                    Value::Var(v) => (Arc::as_ptr(v) as usize).hash(state),
                    Value::Condition(c) => (Arc::as_ptr(c) as usize).hash(state),
                    _ => {}
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::value_format::format_value(self, true))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
