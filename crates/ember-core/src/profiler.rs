use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Instant;

use im::HashMap as ImHashMap;

use crate::ast::{Key, Value};

#[derive(Default, Clone, Copy)]
struct Stat {
    calls: u64,
    total_ns: u128,
}

#[derive(Default)]
struct ProfilerState {
    enabled: bool,
    stats: HashMap<String, Stat>,
}

thread_local! {
    static PROFILER: RefCell<ProfilerState> = RefCell::new(ProfilerState::default());
}

pub struct ProfileGuard {
    label: String,
    start: Instant,
}

pub fn set_enabled(enabled: bool) {
    PROFILER.with(|cell| {
        cell.borrow_mut().enabled = enabled;
    });
}

pub fn is_enabled() -> bool {
    PROFILER.with(|cell| cell.borrow().enabled)
}

/// Start timing a call; `None` when profiling is off.
pub fn enter(label: &str) -> Option<ProfileGuard> {
    if !is_enabled() {
        return None;
    }
    Some(ProfileGuard {
        label: label.to_string(),
        start: Instant::now(),
    })
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_nanos();
        let label = std::mem::take(&mut self.label);
        PROFILER.with(|cell| {
            let mut state = cell.borrow_mut();
            if !state.enabled {
                return;
            }
            let entry = state.stats.entry(label).or_default();
            entry.calls = entry.calls.saturating_add(1);
            entry.total_ns = entry.total_ns.saturating_add(elapsed);
        });
    }
}

pub fn reset() {
    PROFILER.with(|cell| {
        cell.borrow_mut().stats.clear();
    });
}

/// `{"name" {:calls n :total-ns n}}` for every profiled function.
pub fn data() -> Value {
    PROFILER.with(|cell| {
        let state = cell.borrow();
        let mut out = ImHashMap::new();
        for (name, stat) in &state.stats {
            let mut entry = ImHashMap::new();
            entry.insert(Key::keyword("calls"), Value::Int(stat.calls as i64));
            entry.insert(
                Key::keyword("total-ns"),
                Value::Int(i64::try_from(stat.total_ns).unwrap_or(i64::MAX)),
            );
            out.insert(Key::String(name.clone()), Value::Map(entry));
        }
        Value::Map(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_only_while_enabled() {
        reset();
        drop(enter("skipped"));
        set_enabled(true);
        drop(enter("f"));
        drop(enter("f"));
        set_enabled(false);
        let Value::Map(stats) = data() else {
            panic!("expected map");
        };
        assert!(stats.get(&Key::String("skipped".into())).is_none());
        let Some(Value::Map(f)) = stats.get(&Key::String("f".into())) else {
            panic!("missing entry");
        };
        assert_eq!(f.get(&Key::keyword("calls")), Some(&Value::Int(2)));
    }
}
