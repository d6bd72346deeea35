use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ast::Value;

pub type EnvRef = Arc<RwLock<Env>>;

/// One local frame. Globals live in the namespace registry, not here.
#[derive(Clone, Debug, Default)]
pub struct Env {
    data: HashMap<String, Value>,
    outer: Option<EnvRef>,
    namespace: Option<String>,
    recur_target: Option<usize>,
}

impl Env {
    pub fn new_child(outer: EnvRef) -> Self {
        Self {
            data: HashMap::new(),
            outer: Some(outer),
            namespace: None,
            recur_target: None,
        }
    }

    /// Frame for a function body: remembers the namespace the function was
    /// defined in and accepts `recur` with `target`.
    pub fn new_call_frame(outer: EnvRef, namespace: &str, target: usize) -> Self {
        Self {
            data: HashMap::new(),
            outer: Some(outer),
            namespace: Some(namespace.to_string()),
            recur_target: Some(target),
        }
    }

    pub fn mark_recur_target(&mut self, target: usize) {
        self.recur_target = Some(target);
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.data.get(key) {
            return Some(v.clone());
        }
        if let Some(ref outer) = self.outer {
            return outer.read().unwrap().get(key);
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
            || self
                .outer
                .as_ref()
                .is_some_and(|outer| outer.read().unwrap().contains(key))
    }

    /// Nearest recursion target (`loop` frame or function call frame).
    pub fn recur_target(&self) -> Option<usize> {
        if let Some(target) = self.recur_target {
            return Some(target);
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.read().unwrap().recur_target())
    }

    /// Namespace of the innermost enclosing function, if any.
    pub fn namespace(&self) -> Option<String> {
        if let Some(ns) = &self.namespace {
            return Some(ns.clone());
        }
        self.outer
            .as_ref()
            .and_then(|outer| outer.read().unwrap().namespace())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .outer
            .as_ref()
            .map(|o| o.read().unwrap().names())
            .unwrap_or_default();
        names.extend(self.data.keys().cloned());
        names
    }
}

pub fn new_ref(env: Env) -> EnvRef {
    Arc::new(RwLock::new(env))
}

pub fn child_of(outer: &EnvRef) -> EnvRef {
    new_ref(Env::new_child(outer.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_frames_shadow_and_inherit() {
        let root = new_ref(Env::default());
        root.write().unwrap().set("x", Value::Int(1));
        let child = child_of(&root);
        assert_eq!(child.read().unwrap().get("x"), Some(Value::Int(1)));
        child.write().unwrap().set("x", Value::Int(2));
        assert_eq!(child.read().unwrap().get("x"), Some(Value::Int(2)));
        assert_eq!(root.read().unwrap().get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn recur_target_is_nearest_marked_frame() {
        let root = new_ref(Env::default());
        root.write().unwrap().mark_recur_target(7);
        let inner = child_of(&root);
        assert_eq!(inner.read().unwrap().recur_target(), Some(7));
        let call = new_ref(Env::new_call_frame(inner, "user", 9));
        assert_eq!(call.read().unwrap().recur_target(), Some(9));
        assert_eq!(call.read().unwrap().namespace().as_deref(), Some("user"));
    }
}
