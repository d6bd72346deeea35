use std::sync::{Arc, RwLock};

use im::{HashMap, Vector};

use crate::ast::{Key, MetaMap, Value};
use crate::error::EmberError;
use crate::namespaces::NamespaceRegistry;
use crate::symbols::{split_qualified, CORE_NS};

/// Built-in types and their parents. `any` is the root.
const BUILTIN_TYPES: &[(&str, Option<&str>)] = &[
    ("any", None),
    ("nil", Some("any")),
    ("boolean", Some("any")),
    ("number", Some("any")),
    ("long", Some("number")),
    ("double", Some("number")),
    ("string", Some("any")),
    ("keyword", Some("any")),
    ("symbol", Some("any")),
    ("collection", Some("any")),
    ("sequence", Some("collection")),
    ("list", Some("sequence")),
    ("vector", Some("sequence")),
    ("map", Some("collection")),
    ("set", Some("collection")),
    ("function", Some("any")),
    ("multimethod", Some("function")),
    ("protocol-fn", Some("function")),
    ("macro", Some("any")),
    ("protocol", Some("any")),
    ("type", Some("any")),
    ("record", Some("any")),
    ("atom", Some("any")),
    ("var", Some("any")),
    ("condition", Some("any")),
];

fn builtin_parent(name: &str) -> Option<Option<&'static str>> {
    BUILTIN_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, parent)| *parent)
}

pub fn is_builtin_type(name: &str) -> bool {
    builtin_parent(name).is_some()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    /// Qualified declared type, e.g. `core/long` or `user/Point`.
    pub declared: String,
    /// 1-based position in the constructor call.
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChoiceAlt {
    Literal(Value),
    Type(String),
}

#[derive(Clone, Debug)]
pub enum CustomKind {
    Record { fields: Vec<FieldDef> },
    Wrapper { base: String },
    Choice { alternatives: Vec<ChoiceAlt> },
}

/// Functions attached through the reserved `Object` protocol.
#[derive(Clone, Debug, Default)]
pub struct ObjectOverrides {
    pub to_string: Option<Value>,
    pub compare_to: Option<Value>,
}

#[derive(Debug)]
pub struct CustomTypeDef {
    pub ns: String,
    pub name: String,
    pub kind: CustomKind,
    pub validator: Option<Value>,
    overrides: RwLock<ObjectOverrides>,
}

impl CustomTypeDef {
    pub fn new(ns: &str, name: &str, kind: CustomKind, validator: Option<Value>) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            kind,
            validator,
            overrides: RwLock::new(ObjectOverrides::default()),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns, self.name)
    }

    pub fn supertype(&self) -> String {
        match &self.kind {
            CustomKind::Record { .. } => format!("{}/record", CORE_NS),
            CustomKind::Wrapper { base } => base.clone(),
            CustomKind::Choice { .. } => format!("{}/any", CORE_NS),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            CustomKind::Record { .. } => "record",
            CustomKind::Wrapper { .. } => "wrapper",
            CustomKind::Choice { .. } => "choice",
        }
    }

    pub fn overrides(&self) -> ObjectOverrides {
        self.overrides.read().unwrap().clone()
    }

    pub fn set_override(&self, method: &str, func: Value) -> Result<(), EmberError> {
        let mut overrides = self.overrides.write().unwrap();
        match method {
            "toString" => overrides.to_string = Some(func),
            "compareTo" => overrides.compare_to = Some(func),
            other => {
                return Err(EmberError::runtime(format!(
                    "Object has no method {}",
                    other
                )))
            }
        }
        Ok(())
    }

    pub fn describe(&self) -> Value {
        let mut map = HashMap::new();
        map.insert(Key::keyword("name"), Value::keyword(self.qualified_name()));
        map.insert(Key::keyword("kind"), Value::keyword(self.kind_name()));
        map.insert(Key::keyword("supertype"), Value::keyword(self.supertype()));
        match &self.kind {
            CustomKind::Record { fields } => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        let mut entry = HashMap::new();
                        entry.insert(Key::keyword("name"), Value::keyword(field.name.clone()));
                        entry.insert(Key::keyword("type"), Value::keyword(field.declared.clone()));
                        entry.insert(Key::keyword("index"), Value::Int(field.index as i64));
                        Value::Map(entry)
                    })
                    .collect();
                map.insert(Key::keyword("fields"), Value::Vector(fields));
            }
            CustomKind::Wrapper { base } => {
                map.insert(Key::keyword("base"), Value::keyword(base.clone()));
            }
            CustomKind::Choice { alternatives } => {
                let alts = alternatives
                    .iter()
                    .map(|alt| match alt {
                        ChoiceAlt::Literal(v) => v.clone(),
                        ChoiceAlt::Type(t) => Value::keyword(t.clone()),
                    })
                    .collect();
                map.insert(Key::keyword("alternatives"), Value::Vector(alts));
            }
        }
        map.insert(Key::keyword("validator?"), Value::Bool(self.validator.is_some()));
        Value::Map(map)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CustomData {
    Record(Vec<(String, Value)>),
    Wrapped(Value),
}

#[derive(Clone, Debug)]
pub struct CustomValue {
    pub def: Arc<CustomTypeDef>,
    pub data: CustomData,
    pub meta: Option<MetaMap>,
}

impl CustomValue {
    pub fn type_name(&self) -> String {
        self.def.qualified_name()
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        match &self.data {
            CustomData::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, v)| v.clone()),
            CustomData::Wrapped(_) => None,
        }
    }
}

/// Qualified runtime type of a value, the key protocol dispatch uses.
pub fn runtime_type(value: &Value) -> String {
    match value {
        Value::Custom(custom) => custom.type_name(),
        other => format!("{}/{}", CORE_NS, other.type_name()),
    }
}

/// The type itself followed by its ancestors, nearest first.
pub fn type_chain(registry: &NamespaceRegistry, type_name: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = Some(type_name.to_string());
    while let Some(name) = current {
        if chain.contains(&name) {
            break;
        }
        chain.push(name.clone());
        current = match split_qualified(&name) {
            (Some(CORE_NS), simple) => builtin_parent(simple)
                .flatten()
                .map(|parent| format!("{}/{}", CORE_NS, parent)),
            (Some(ns), simple) => registry.lookup_type(ns, simple).map(|def| def.supertype()),
            (None, _) => None,
        };
    }
    chain
}

pub fn is_subtype(registry: &NamespaceRegistry, type_name: &str, ancestor: &str) -> bool {
    type_chain(registry, type_name).iter().any(|t| t == ancestor)
}

/// Structural compatibility of `value` with a declared type.
pub fn conforms(registry: &NamespaceRegistry, value: &Value, declared: &str) -> bool {
    if is_subtype(registry, &runtime_type(value), declared) {
        return true;
    }
    if let (Some(ns), simple) = split_qualified(declared) {
        if let Some(def) = registry.lookup_type(ns, simple) {
            if let CustomKind::Choice { alternatives } = &def.kind {
                return choice_allows(registry, alternatives, value);
            }
        }
    }
    false
}

pub fn choice_allows(registry: &NamespaceRegistry, alternatives: &[ChoiceAlt], value: &Value) -> bool {
    alternatives.iter().any(|alt| match alt {
        ChoiceAlt::Literal(lit) => lit == value,
        ChoiceAlt::Type(t) => conforms(registry, value, t),
    })
}

/// Resolve a type designator (`:long`, `:Point`, `:user/Point`) to its
/// qualified name.
pub fn resolve_type_name(
    registry: &NamespaceRegistry,
    current_ns: &str,
    designator: &Value,
) -> Result<String, EmberError> {
    let text = match designator {
        Value::Keyword(k) => k.clone(),
        Value::Symbol(sym) => sym.qualified(),
        Value::TypeDef(def) => return Ok(def.qualified_name()),
        other => return Err(EmberError::expected("type name", other)),
    };
    lookup_type_name(registry, current_ns, &text)
        .ok_or_else(|| EmberError::runtime(format!("unknown type: {}", text)))
}

pub fn lookup_type_name(registry: &NamespaceRegistry, current_ns: &str, text: &str) -> Option<String> {
    match split_qualified(text) {
        (Some(CORE_NS), simple) if is_builtin_type(simple) => Some(text.to_string()),
        (Some(ns), simple) => registry
            .lookup_type(ns, simple)
            .map(|def| def.qualified_name()),
        (None, simple) => {
            if let Some(def) = registry.lookup_type(current_ns, simple) {
                Some(def.qualified_name())
            } else if is_builtin_type(simple) {
                Some(format!("{}/{}", CORE_NS, simple))
            } else {
                None
            }
        }
    }
}

/// `[x :long y :string z]` -> field definitions; untyped fields are `any`.
pub fn parse_fields(
    registry: &NamespaceRegistry,
    current_ns: &str,
    spec: &Vector<Value>,
) -> Result<Vec<FieldDef>, EmberError> {
    let items: Vec<&Value> = spec.iter().collect();
    let mut fields: Vec<FieldDef> = Vec::new();
    let mut idx = 0;
    while idx < items.len() {
        let name = items[idx]
            .as_simple_symbol()
            .ok_or_else(|| EmberError::runtime(format!("deftype: invalid field {}", items[idx])))?
            .to_string();
        if fields.iter().any(|f| f.name == name) {
            return Err(EmberError::duplicate(format!("deftype: duplicate field {}", name)));
        }
        let declared = match items.get(idx + 1) {
            Some(designator @ Value::Keyword(_)) => {
                idx += 2;
                resolve_type_name(registry, current_ns, designator)?
            }
            _ => {
                idx += 1;
                format!("{}/any", CORE_NS)
            }
        };
        fields.push(FieldDef {
            name,
            declared,
            index: fields.len() + 1,
        });
    }
    Ok(fields)
}

/// Alternatives of a choice type: a keyword naming a known type is a type
/// alternative, anything else is a literal.
pub fn parse_alternatives(
    registry: &NamespaceRegistry,
    current_ns: &str,
    forms: &[Value],
) -> Vec<ChoiceAlt> {
    forms
        .iter()
        .map(|form| match form {
            Value::Keyword(k) => match lookup_type_name(registry, current_ns, k) {
                Some(name) => ChoiceAlt::Type(name),
                None => ChoiceAlt::Literal(form.clone()),
            },
            other => ChoiceAlt::Literal(other.clone()),
        })
        .collect()
}

/// Validate constructor arguments and build the value. The user validator
/// (if any) runs last: records pass it the built value, wrapper and choice
/// types the raw argument.
pub fn construct(
    registry: &NamespaceRegistry,
    def: &Arc<CustomTypeDef>,
    args: &[Value],
) -> Result<Value, EmberError> {
    let qualified = def.qualified_name();
    let (built, validator_arg) = match &def.kind {
        CustomKind::Record { fields } => {
            if args.len() != fields.len() {
                return Err(EmberError::arity(format!(
                    "{} expects {} fields, got {}",
                    qualified,
                    fields.len(),
                    args.len()
                )));
            }
            for (field, arg) in fields.iter().zip(args) {
                if !conforms(registry, arg, &field.declared) {
                    return Err(EmberError::type_mismatch(format!(
                        "{}: argument {} ({}) expects {}, got {}",
                        qualified,
                        field.index,
                        field.name,
                        field.declared,
                        runtime_type(arg)
                    )));
                }
            }
            let data = fields
                .iter()
                .zip(args)
                .map(|(field, arg)| (field.name.clone(), arg.clone()))
                .collect();
            let built = custom(def, CustomData::Record(data));
            (built.clone(), built)
        }
        CustomKind::Wrapper { base } => {
            let [arg] = args else {
                return Err(EmberError::arity(format!(
                    "{} expects 1 argument, got {}",
                    qualified,
                    args.len()
                )));
            };
            if !conforms(registry, arg, base) {
                return Err(EmberError::type_mismatch(format!(
                    "{}: expects {}, got {}",
                    qualified,
                    base,
                    runtime_type(arg)
                )));
            }
            (custom(def, CustomData::Wrapped(arg.clone())), arg.clone())
        }
        CustomKind::Choice { alternatives } => {
            let [arg] = args else {
                return Err(EmberError::arity(format!(
                    "{} expects 1 argument, got {}",
                    qualified,
                    args.len()
                )));
            };
            if !choice_allows(registry, alternatives, arg) {
                return Err(EmberError::type_mismatch(format!(
                    "{}: {} is not one of the allowed values",
                    qualified, arg
                )));
            }
            (custom(def, CustomData::Wrapped(arg.clone())), arg.clone())
        }
    };
    if let Some(validator) = &def.validator {
        let ok = crate::eval::call_value(validator, &[validator_arg])?;
        if !ok.is_truthy() {
            return Err(EmberError::type_mismatch(format!(
                "{}: validation failed",
                qualified
            )));
        }
    }
    Ok(built)
}

fn custom(def: &Arc<CustomTypeDef>, data: CustomData) -> Value {
    Value::Custom(Arc::new(CustomValue {
        def: def.clone(),
        data,
        meta: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lattice() {
        let registry = NamespaceRegistry::new();
        assert!(is_subtype(&registry, "core/long", "core/number"));
        assert!(is_subtype(&registry, "core/vector", "core/collection"));
        assert!(!is_subtype(&registry, "core/map", "core/sequence"));
        assert!(conforms(&registry, &Value::Nil, "core/any"));
    }

    #[test]
    fn wrapper_supertype_is_its_base() {
        let registry = NamespaceRegistry::new();
        let def = Arc::new(CustomTypeDef::new(
            "user",
            "Age",
            CustomKind::Wrapper {
                base: "core/long".into(),
            },
            None,
        ));
        registry.register_type(def.clone()).unwrap();
        assert_eq!(
            type_chain(&registry, "user/Age"),
            vec!["user/Age", "core/long", "core/number", "core/any"]
        );
        assert!(construct(&registry, &def, &[Value::Int(3)]).is_ok());
        assert!(matches!(
            construct(&registry, &def, &[Value::string("x")]),
            Err(EmberError::TypeMismatch(_))
        ));
    }

    #[test]
    fn record_mismatch_names_position() {
        let registry = NamespaceRegistry::new();
        let fields = vec![
            FieldDef {
                name: "x".into(),
                declared: "core/long".into(),
                index: 1,
            },
            FieldDef {
                name: "y".into(),
                declared: "core/long".into(),
                index: 2,
            },
        ];
        let def = Arc::new(CustomTypeDef::new(
            "user",
            "Point",
            CustomKind::Record { fields },
            None,
        ));
        let err = construct(&registry, &def, &[Value::Int(1), Value::string("2")]).unwrap_err();
        assert!(err.message().contains("argument 2"));
        assert!(matches!(
            construct(&registry, &def, &[Value::Int(1)]),
            Err(EmberError::Arity(_))
        ));
    }
}
