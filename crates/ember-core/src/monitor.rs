use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

use crate::ast::Value;

struct Owner {
    thread: ThreadId,
    depth: usize,
}

/// Reentrant monitors backing `locking`, keyed by the value itself.
/// Reference values (atoms, vars, functions) compare by identity, plain data
/// by content.
#[derive(Default)]
pub struct MonitorTable {
    owners: Mutex<HashMap<Value, Owner>>,
    released: Condvar,
}

impl MonitorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until this thread owns the monitor for `value`.
    pub fn enter(&self, value: &Value) -> MonitorGuard<'_> {
        let me = thread::current().id();
        let mut owners = self.owners.lock().unwrap();
        loop {
            match owners.get_mut(value) {
                None => {
                    owners.insert(value.clone(), Owner { thread: me, depth: 1 });
                    break;
                }
                Some(owner) if owner.thread == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    owners = self.released.wait(owners).unwrap();
                }
            }
        }
        MonitorGuard {
            table: self,
            key: value.clone(),
        }
    }

    pub fn is_held(&self, value: &Value) -> bool {
        self.owners
            .lock()
            .unwrap()
            .contains_key(value)
    }

    fn exit(&self, key: &Value) {
        let mut owners = self.owners.lock().unwrap();
        let release = match owners.get_mut(key) {
            Some(owner) => {
                owner.depth -= 1;
                owner.depth == 0
            }
            None => false,
        };
        if release {
            owners.remove(key);
            self.released.notify_all();
        }
    }
}

pub struct MonitorGuard<'a> {
    table: &'a MonitorTable,
    key: Value,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.table.exit(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AtomHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn reentrant_on_same_thread() {
        let table = MonitorTable::new();
        let key = Value::keyword("k");
        let outer = table.enter(&key);
        let inner = table.enter(&key);
        drop(inner);
        assert!(table.is_held(&key));
        drop(outer);
        assert!(!table.is_held(&key));
    }

    #[test]
    fn excludes_other_threads() {
        let table = Arc::new(MonitorTable::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = table.enter(&Value::Int(1));
                        let seen = counter.load(Ordering::SeqCst);
                        counter.store(seen + 1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn distinct_atoms_with_equal_contents_lock_separately() {
        let table = MonitorTable::new();
        let a = Value::Atom(AtomHandle::new(Value::Int(0)));
        let b = Value::Atom(AtomHandle::new(Value::Int(0)));
        let _held = table.enter(&a);
        assert!(table.is_held(&a));
        assert!(!table.is_held(&b));
    }
}
