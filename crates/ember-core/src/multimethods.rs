use std::collections::HashMap;
use std::sync::RwLock;

use crate::ast::Value;
use crate::error::EmberError;

pub const DEFAULT_DISPATCH: &str = "default";

/// `defmulti` value: a dispatch function plus a dispatch-value table.
#[derive(Debug)]
pub struct MultiMethod {
    /// Qualified name.
    pub name: String,
    pub dispatch: Value,
    methods: RwLock<HashMap<Value, Value>>,
}

impl MultiMethod {
    pub fn new(name: impl Into<String>, dispatch: Value) -> Result<Self, EmberError> {
        if !dispatch.is_callable() {
            return Err(EmberError::expected("dispatch function", &dispatch));
        }
        Ok(Self {
            name: name.into(),
            dispatch,
            methods: RwLock::new(HashMap::new()),
        })
    }

    /// Later registrations for the same dispatch value replace earlier ones.
    pub fn add_method(&self, dispatch_value: Value, func: Value) {
        let mut methods = self.methods.write().unwrap();
        if methods.insert(dispatch_value.clone(), func).is_some() {
            log::debug!("{}: replacing method for {}", self.name, dispatch_value);
        }
    }

    pub fn dispatch_values(&self) -> Vec<Value> {
        self.methods.read().unwrap().keys().cloned().collect()
    }

    /// Method for `dispatch_value`, else the `:default` method.
    pub fn find(&self, dispatch_value: &Value) -> Result<Value, EmberError> {
        let methods = self.methods.read().unwrap();
        if let Some(func) = methods.get(dispatch_value) {
            return Ok(func.clone());
        }
        if let Some(func) = methods.get(&Value::keyword(DEFAULT_DISPATCH)) {
            return Ok(func.clone());
        }
        Err(EmberError::runtime(format!(
            "{}: no method for dispatch value {}",
            self.name, dispatch_value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default() {
        let mm = MultiMethod::new("user/area", Value::keyword("shape")).unwrap();
        assert!(mm.find(&Value::keyword("circle")).is_err());
        mm.add_method(Value::keyword("default"), Value::Int(0));
        mm.add_method(Value::keyword("square"), Value::Int(4));
        assert_eq!(mm.find(&Value::keyword("circle")).unwrap(), Value::Int(0));
        assert_eq!(mm.find(&Value::keyword("square")).unwrap(), Value::Int(4));
    }

    #[test]
    fn re_registration_replaces() {
        let mm = MultiMethod::new("user/m", Value::keyword("k")).unwrap();
        mm.add_method(Value::Int(1), Value::Int(10));
        mm.add_method(Value::Int(1), Value::Int(20));
        assert_eq!(mm.find(&Value::Int(1)).unwrap(), Value::Int(20));
        assert_eq!(mm.dispatch_values().len(), 1);
    }

    #[test]
    fn dispatch_must_be_callable() {
        assert!(MultiMethod::new("user/m", Value::Int(1)).is_err());
    }
}
