use std::env;

use crate::symbols::USER_NS;

fn env_flag(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    Some(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

pub fn seal_system_ns_from_env() -> bool {
    env_flag("EMBER_SEAL_SYSTEM_NS").unwrap_or(true)
}

pub fn suggest_symbols_from_env() -> bool {
    env_flag("EMBER_SUGGEST_SYMBOLS").unwrap_or(true)
}

pub fn profile_from_env() -> bool {
    env_flag("EMBER_PROFILE").unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct EvalOptions {
    /// Reject mutation of system namespaces (`core`) after startup.
    pub seal_system_ns: bool,
    /// List edit-distance-1 candidates in SymbolNotFound messages.
    pub suggest_symbols: bool,
    pub profile: bool,
    /// Upper bound on `macroexpand` rounds before giving up.
    pub macroexpand_limit: usize,
    pub default_namespace: String,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            seal_system_ns: seal_system_ns_from_env(),
            suggest_symbols: suggest_symbols_from_env(),
            profile: profile_from_env(),
            macroexpand_limit: 1000,
            default_namespace: USER_NS.to_string(),
        }
    }
}
