use std::sync::atomic::{AtomicU64, Ordering};

use crate::ast::Symbol;

pub const CORE_NS: &str = "core";
pub const USER_NS: &str = "user";

static GENSYM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh symbol, unique for the lifetime of the process.
pub fn gensym(prefix: &str) -> Symbol {
    let n = GENSYM_COUNTER.fetch_add(1, Ordering::Relaxed);
    Symbol::simple(format!("{}{}", prefix, n))
}

/// `ns/name` for a var living in `ns`.
pub fn qualify(ns: &str, name: &str) -> String {
    format!("{}/{}", ns, name)
}

pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.find('/') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (Some(&name[..idx]), &name[idx + 1..]),
        _ => (None, name),
    }
}

/// True when `a` and `b` differ by exactly one insertion, deletion or
/// substitution.
pub fn within_edit_distance_one(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a == b {
        return false;
    }
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    match long.len() - short.len() {
        0 => short.iter().zip(long.iter()).filter(|(x, y)| x != y).count() == 1,
        1 => {
            let mut i = 0;
            while i < short.len() && short[i] == long[i] {
                i += 1;
            }
            short[i..] == long[i + 1..]
        }
        _ => false,
    }
}

pub fn suggestions<'a>(name: &str, candidates: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut found: Vec<String> = candidates
        .filter(|candidate| within_edit_distance_one(name, candidate))
        .cloned()
        .collect();
    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_distance_one() {
        assert!(within_edit_distance_one("count", "cont"));
        assert!(within_edit_distance_one("conj", "cons"));
        assert!(within_edit_distance_one("map", "maps"));
        assert!(!within_edit_distance_one("map", "map"));
        assert!(!within_edit_distance_one("first", "rest"));
    }

    #[test]
    fn splits_namespace() {
        assert_eq!(split_qualified("core/map"), (Some("core"), "map"));
        assert_eq!(split_qualified("/"), (None, "/"));
        assert_eq!(split_qualified("map"), (None, "map"));
    }

    #[test]
    fn gensym_is_unique() {
        assert_ne!(gensym("G__"), gensym("G__"));
    }
}
