use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::ast::{MetaMap, Value};
use crate::dynamic_vars;
use crate::error::EmberError;
use crate::symbols::qualify;
use crate::type_registry::CustomTypeDef;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarFlags {
    pub overwritable: bool,
    pub dynamic: bool,
    pub private: bool,
}

impl VarFlags {
    pub fn plain() -> Self {
        Self {
            overwritable: true,
            ..Self::default()
        }
    }
}

/// A global binding `ns/name -> value`.
pub struct Var {
    ns: String,
    name: String,
    qualified: String,
    root: RwLock<Value>,
    flags: VarFlags,
    meta: RwLock<MetaMap>,
}

impl Var {
    pub fn new(ns: &str, name: &str, value: Value, flags: VarFlags, meta: MetaMap) -> Self {
        Self {
            ns: ns.to_string(),
            name: name.to_string(),
            qualified: qualify(ns, name),
            root: RwLock::new(value),
            flags,
            meta: RwLock::new(meta),
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    pub fn flags(&self) -> VarFlags {
        self.flags
    }

    pub fn is_dynamic(&self) -> bool {
        self.flags.dynamic
    }

    pub fn is_private(&self) -> bool {
        self.flags.private
    }

    pub fn is_overwritable(&self) -> bool {
        self.flags.overwritable
    }

    /// Current value: the thread's innermost `binding`, otherwise the root.
    pub fn value(&self) -> Value {
        if let Some(v) = dynamic_vars::current_value(&self.qualified) {
            return v;
        }
        self.root_value()
    }

    pub fn root_value(&self) -> Value {
        self.root.read().unwrap().clone()
    }

    pub fn set_root(&self, value: Value) {
        *self.root.write().unwrap() = value;
    }

    pub fn has_thread_binding(&self) -> bool {
        dynamic_vars::has_binding(&self.qualified)
    }

    pub fn meta(&self) -> MetaMap {
        self.meta.read().unwrap().clone()
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}", self.qualified)
    }
}

#[derive(Default)]
pub struct Namespace {
    pub name: String,
    vars: HashMap<String, Arc<Var>>,
    types: HashMap<String, Arc<CustomTypeDef>>,
    imports: BTreeMap<String, String>,
    system: bool,
}

impl Namespace {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Global symbol table shared by every evaluation of one runtime.
pub struct NamespaceRegistry {
    namespaces: RwLock<HashMap<String, Namespace>>,
    sealing: AtomicBool,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            sealing: AtomicBool::new(false),
        }
    }

    pub fn set_sealing(&self, on: bool) {
        self.sealing.store(on, Ordering::SeqCst);
    }

    pub fn sealing(&self) -> bool {
        self.sealing.load(Ordering::SeqCst)
    }

    pub fn mark_system(&self, ns: &str) {
        let mut namespaces = self.namespaces.write().unwrap();
        namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(ns))
            .system = true;
    }

    pub fn is_sealed(&self, ns: &str) -> bool {
        self.sealing()
            && self
                .namespaces
                .read()
                .unwrap()
                .get(ns)
                .is_some_and(|data| data.system)
    }

    pub fn check_mutable(&self, ns: &str) -> Result<(), EmberError> {
        if self.is_sealed(ns) {
            Err(EmberError::sealed(ns))
        } else {
            Ok(())
        }
    }

    pub fn exists(&self, ns: &str) -> bool {
        self.namespaces.read().unwrap().contains_key(ns)
    }

    /// Create the namespace on first reference.
    pub fn ensure(&self, ns: &str) {
        if self.exists(ns) {
            return;
        }
        let mut namespaces = self.namespaces.write().unwrap();
        if !namespaces.contains_key(ns) {
            log::debug!("creating namespace {}", ns);
            namespaces.insert(ns.to_string(), Namespace::new(ns));
        }
    }

    /// Fails when `ns/name` exists and may not be redefined.
    pub fn check_definable(&self, ns: &str, name: &str) -> Result<(), EmberError> {
        self.check_mutable(ns)?;
        match self.lookup(ns, name) {
            Some(var) if !var.is_overwritable() => Err(EmberError::duplicate(format!(
                "{} cannot be redefined",
                var.qualified_name()
            ))),
            _ => Ok(()),
        }
    }

    /// Install (or replace) `ns/name`.
    pub fn intern(
        &self,
        ns: &str,
        name: &str,
        value: Value,
        flags: VarFlags,
        meta: MetaMap,
    ) -> Result<Arc<Var>, EmberError> {
        self.check_mutable(ns)?;
        let mut namespaces = self.namespaces.write().unwrap();
        let data = namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(ns));
        if let Some(existing) = data.vars.get(name) {
            if !existing.is_overwritable() {
                return Err(EmberError::duplicate(format!(
                    "{} cannot be redefined",
                    existing.qualified_name()
                )));
            }
            log::debug!("redefining {}", existing.qualified_name());
        }
        let var = Arc::new(Var::new(ns, name, value, flags, meta));
        data.vars.insert(name.to_string(), var.clone());
        Ok(var)
    }

    pub fn lookup(&self, ns: &str, name: &str) -> Option<Arc<Var>> {
        self.namespaces
            .read()
            .unwrap()
            .get(ns)
            .and_then(|data| data.vars.get(name).cloned())
    }

    pub fn unmap(&self, ns: &str, name: &str) -> Result<bool, EmberError> {
        self.check_mutable(ns)?;
        let mut namespaces = self.namespaces.write().unwrap();
        Ok(namespaces
            .get_mut(ns)
            .map(|data| data.vars.remove(name).is_some())
            .unwrap_or(false))
    }

    pub fn remove(&self, ns: &str) -> Result<bool, EmberError> {
        self.check_mutable(ns)?;
        Ok(self.namespaces.write().unwrap().remove(ns).is_some())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn var_names(&self, ns: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .unwrap()
            .get(ns)
            .map(|data| data.vars.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn register_type(&self, def: Arc<CustomTypeDef>) -> Result<(), EmberError> {
        let ns = def.ns.clone();
        self.check_mutable(&ns)?;
        let mut namespaces = self.namespaces.write().unwrap();
        let data = namespaces
            .entry(ns.clone())
            .or_insert_with(|| Namespace::new(&ns));
        if data.types.contains_key(&def.name) {
            return Err(EmberError::duplicate(format!(
                "type {} is already defined",
                def.qualified_name()
            )));
        }
        data.types.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn lookup_type(&self, ns: &str, name: &str) -> Option<Arc<CustomTypeDef>> {
        self.namespaces
            .read()
            .unwrap()
            .get(ns)
            .and_then(|data| data.types.get(name).cloned())
    }

    pub fn add_import(&self, ns: &str, full_name: &str) -> Result<String, EmberError> {
        self.check_mutable(ns)?;
        let short = full_name
            .rsplit(['.', '/'])
            .next()
            .unwrap_or(full_name)
            .to_string();
        let mut namespaces = self.namespaces.write().unwrap();
        namespaces
            .entry(ns.to_string())
            .or_insert_with(|| Namespace::new(ns))
            .imports
            .insert(short.clone(), full_name.to_string());
        Ok(short)
    }

    pub fn imports(&self, ns: &str) -> Vec<(String, String)> {
        self.namespaces
            .read()
            .unwrap()
            .get(ns)
            .map(|data| {
                data.imports
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_system_namespace_rejects_mutation() {
        let registry = NamespaceRegistry::new();
        registry
            .intern("core", "x", Value::Int(1), VarFlags::plain(), MetaMap::new())
            .unwrap();
        registry.mark_system("core");
        registry.set_sealing(true);
        assert!(matches!(
            registry.intern("core", "y", Value::Nil, VarFlags::plain(), MetaMap::new()),
            Err(EmberError::NamespaceSealed(_))
        ));
        assert!(matches!(
            registry.unmap("core", "x"),
            Err(EmberError::NamespaceSealed(_))
        ));
        assert!(registry.remove("core").is_err());
        registry.set_sealing(false);
        assert!(registry.unmap("core", "x").unwrap());
    }

    #[test]
    fn non_overwritable_var_is_kept() {
        let registry = NamespaceRegistry::new();
        let flags = VarFlags {
            overwritable: false,
            ..VarFlags::default()
        };
        registry
            .intern("user", "x", Value::Int(1), flags, MetaMap::new())
            .unwrap();
        assert!(registry.check_definable("user", "x").is_err());
        assert!(registry
            .intern("user", "x", Value::Int(2), VarFlags::plain(), MetaMap::new())
            .is_err());
        assert_eq!(registry.lookup("user", "x").unwrap().value(), Value::Int(1));
    }
}
