use std::cell::RefCell;
use std::collections::HashMap;

use crate::ast::Value;

thread_local! {
    static DYNAMIC_STACK: RefCell<HashMap<String, Vec<Value>>> = RefCell::new(HashMap::new());
}

/// Thread-local value bound for the qualified var name, if any.
pub fn current_value(name: &str) -> Option<Value> {
    DYNAMIC_STACK.with(|cell| {
        cell.borrow()
            .get(name)
            .and_then(|stack| stack.last())
            .cloned()
    })
}

pub fn has_binding(name: &str) -> bool {
    DYNAMIC_STACK.with(|cell| {
        cell.borrow()
            .get(name)
            .map(|stack| !stack.is_empty())
            .unwrap_or(false)
    })
}

/// Replace the innermost binding by popping it and pushing `value`.
/// Returns false when the thread has no binding for `name`.
pub fn replace_top(name: &str, value: Value) -> bool {
    DYNAMIC_STACK.with(|cell| {
        let mut map = cell.borrow_mut();
        match map.get_mut(name) {
            Some(stack) if !stack.is_empty() => {
                stack.pop();
                stack.push(value);
                true
            }
            _ => false,
        }
    })
}

/// Push one binding per entry; the guard pops them in reverse order.
pub fn push_bindings(bindings: &[(String, Value)]) -> DynamicGuard {
    DYNAMIC_STACK.with(|cell| {
        let mut map = cell.borrow_mut();
        for (name, val) in bindings {
            map.entry(name.clone()).or_default().push(val.clone());
        }
    });
    DynamicGuard {
        names: bindings.iter().map(|(name, _)| name.clone()).collect(),
    }
}

pub struct DynamicGuard {
    names: Vec<String>,
}

impl Drop for DynamicGuard {
    fn drop(&mut self) {
        DYNAMIC_STACK.with(|cell| {
            let mut map = cell.borrow_mut();
            for name in self.names.iter().rev() {
                if let Some(stack) = map.get_mut(name) {
                    stack.pop();
                    if stack.is_empty() {
                        map.remove(name);
                    }
                }
            }
        });
    }
}
