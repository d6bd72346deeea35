use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::ast::{FnArity, Key, MetaMap, Value};
use crate::error::EmberError;
use crate::namespaces::{NamespaceRegistry, VarFlags};
use crate::symbols::{qualify, split_qualified, CORE_NS};
use crate::type_registry::{runtime_type, type_chain};

pub const OBJECT_PROTOCOL: &str = "Object";
pub const CLOSEABLE_PROTOCOL: &str = "AutoCloseable";

/// One function of a protocol as declared by `defprotocol`.
#[derive(Clone, Debug)]
pub struct MethodSpec {
    pub name: String,
    pub arities: Vec<FnArity>,
    pub default: Option<Value>,
    pub doc: Option<String>,
}

#[derive(Debug)]
pub struct Protocol {
    /// Qualified name.
    pub name: String,
    pub ns: String,
    pub methods: Vec<MethodSpec>,
    pub doc: Option<String>,
    types: RwLock<BTreeSet<String>>,
}

impl Protocol {
    pub fn simple_name(&self) -> &str {
        split_qualified(&self.name).1
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.name == method)
    }

    pub fn types(&self) -> Vec<String> {
        self.types.read().unwrap().iter().cloned().collect()
    }

    pub fn is_registered(&self, registry: &NamespaceRegistry, type_name: &str) -> bool {
        let types = self.types.read().unwrap();
        type_chain(registry, type_name)
            .iter()
            .any(|t| types.contains(t))
    }
}

/// Dispatch function installed for each protocol function name.
#[derive(Debug)]
pub struct ProtocolFn {
    /// Qualified name.
    pub name: String,
    pub method: String,
    pub protocol: Arc<Protocol>,
    pub arities: Vec<FnArity>,
    impls: RwLock<HashMap<String, Value>>,
    default: Option<Value>,
}

impl ProtocolFn {
    /// Implementation for the first argument's type: exact type, then its
    /// ancestors, then the protocol default.
    pub fn dispatch_target(
        &self,
        registry: &NamespaceRegistry,
        args: &[Value],
    ) -> Result<Value, EmberError> {
        let Some(first) = args.first() else {
            return Err(EmberError::arity(format!(
                "{} requires at least one argument",
                self.name
            )));
        };
        let type_name = runtime_type(first);
        {
            let impls = self.impls.read().unwrap();
            for candidate in type_chain(registry, &type_name) {
                if let Some(func) = impls.get(&candidate) {
                    return Ok(func.clone());
                }
            }
        }
        if let Some(default) = &self.default {
            return Ok(default.clone());
        }
        Err(EmberError::runtime(format!(
            "{} not implemented for type {}",
            self.name, type_name
        )))
    }

    pub fn implemented_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.impls.read().unwrap().keys().cloned().collect();
        types.sort();
        types
    }
}

fn lookup_protocol_fn(registry: &NamespaceRegistry, ns: &str, method: &str) -> Option<Arc<ProtocolFn>> {
    registry
        .lookup(ns, method)
        .and_then(|var| match var.root_value() {
            Value::ProtocolFn(pf) => Some(pf),
            _ => None,
        })
}

/// Install the protocol var and one dispatch var per function.
pub fn install_protocol(
    registry: &NamespaceRegistry,
    ns: &str,
    name: &str,
    methods: Vec<MethodSpec>,
    doc: Option<String>,
) -> Result<Arc<Protocol>, EmberError> {
    let qualified = qualify(ns, name);
    if let Some(var) = registry.lookup(ns, name) {
        if matches!(var.root_value(), Value::Protocol(_)) {
            return Err(EmberError::duplicate(format!(
                "protocol {} is already defined",
                qualified
            )));
        }
    }
    let mut seen = BTreeSet::new();
    for method in &methods {
        if !seen.insert(method.name.clone()) {
            return Err(EmberError::duplicate(format!(
                "protocol {} declares {} twice",
                qualified, method.name
            )));
        }
        if let Some(existing) = lookup_protocol_fn(registry, ns, &method.name) {
            if existing.protocol.name != qualified {
                return Err(EmberError::duplicate(format!(
                    "{} is already a function of protocol {}",
                    qualify(ns, &method.name),
                    existing.protocol.name
                )));
            }
        }
    }
    let protocol = Arc::new(Protocol {
        name: qualified,
        ns: ns.to_string(),
        methods: methods.clone(),
        doc: doc.clone(),
        types: RwLock::new(BTreeSet::new()),
    });
    let mut meta = MetaMap::new();
    if let Some(doc) = doc {
        meta.insert(Key::keyword("doc"), Value::String(doc));
    }
    registry.intern(
        ns,
        name,
        Value::Protocol(protocol.clone()),
        VarFlags::plain(),
        meta,
    )?;
    for method in methods {
        let pf = ProtocolFn {
            name: qualify(ns, &method.name),
            method: method.name.clone(),
            protocol: protocol.clone(),
            arities: method.arities.clone(),
            impls: RwLock::new(HashMap::new()),
            default: method.default.clone(),
        };
        let mut meta = MetaMap::new();
        if let Some(doc) = &method.doc {
            meta.insert(Key::keyword("doc"), Value::String(doc.clone()));
        }
        registry.intern(
            ns,
            &method.name,
            Value::ProtocolFn(Arc::new(pf)),
            VarFlags::plain(),
            meta,
        )?;
    }
    Ok(protocol)
}

/// Attach implementations of `protocol` for `type_name`.
pub fn extend_type(
    registry: &NamespaceRegistry,
    type_name: &str,
    protocol: &Arc<Protocol>,
    impls: Vec<(String, Value)>,
) -> Result<(), EmberError> {
    let is_object = protocol.name == qualify(CORE_NS, OBJECT_PROTOCOL);
    let custom_def = match split_qualified(type_name) {
        (Some(ns), simple) if ns != CORE_NS => registry.lookup_type(ns, simple),
        _ => None,
    };
    for (method, func) in impls {
        if !protocol.has_method(&method) {
            return Err(EmberError::runtime(format!(
                "{} is not a function of protocol {}",
                method, protocol.name
            )));
        }
        let pf = lookup_protocol_fn(registry, &protocol.ns, &method).ok_or_else(|| {
            EmberError::runtime(format!(
                "protocol function {} is no longer defined",
                qualify(&protocol.ns, &method)
            ))
        })?;
        if is_object {
            if let Some(def) = &custom_def {
                def.set_override(&method, func.clone())?;
            }
        }
        pf.impls
            .write()
            .unwrap()
            .insert(type_name.to_string(), func);
    }
    protocol
        .types
        .write()
        .unwrap()
        .insert(type_name.to_string());
    Ok(())
}

/// `core/Object` (toString, compareTo) and `core/AutoCloseable` (close).
pub fn install_core_protocols(registry: &NamespaceRegistry) -> Result<(), EmberError> {
    let method = |name: &str, arity: usize, doc: &str| MethodSpec {
        name: name.to_string(),
        arities: vec![FnArity::exact(arity)],
        default: None,
        doc: Some(doc.to_string()),
    };
    install_protocol(
        registry,
        CORE_NS,
        OBJECT_PROTOCOL,
        vec![
            method("toString", 1, "(toString x): printed form used by str."),
            method("compareTo", 2, "(compareTo a b): ordering used by compare."),
        ],
        Some("Methods consulted by generic printing and ordering.".to_string()),
    )?;
    install_protocol(
        registry,
        CORE_NS,
        CLOSEABLE_PROTOCOL,
        vec![method("close", 1, "(close r): releases a resource.")],
        Some("Resources closed by try-with.".to_string()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> MethodSpec {
        MethodSpec {
            name: name.to_string(),
            arities: vec![FnArity::exact(1)],
            default: None,
            doc: None,
        }
    }

    #[test]
    fn function_name_collision_across_protocols() {
        let registry = NamespaceRegistry::new();
        install_protocol(&registry, "user", "A", vec![spec("f")], None).unwrap();
        let err = install_protocol(&registry, "user", "B", vec![spec("f")], None).unwrap_err();
        assert!(matches!(err, EmberError::DuplicateDefinition(_)));
    }

    #[test]
    fn redefining_a_protocol_fails() {
        let registry = NamespaceRegistry::new();
        install_protocol(&registry, "user", "A", vec![spec("f")], None).unwrap();
        assert!(install_protocol(&registry, "user", "A", vec![spec("f")], None).is_err());
    }

    #[test]
    fn dispatch_walks_supertypes() {
        let registry = NamespaceRegistry::new();
        let proto = install_protocol(&registry, "user", "A", vec![spec("f")], None).unwrap();
        extend_type(&registry, "core/number", &proto, vec![("f".into(), Value::Int(1))]).unwrap();
        let pf = lookup_protocol_fn(&registry, "user", "f").unwrap();
        assert_eq!(pf.dispatch_target(&registry, &[Value::Int(5)]).unwrap(), Value::Int(1));
        assert!(proto.is_registered(&registry, "core/double"));
        let err = pf.dispatch_target(&registry, &[Value::string("s")]).unwrap_err();
        assert!(err.message().contains("not implemented"));
    }
}
