use std::collections::HashSet;

use crate::ast::Value;
use crate::error::EmberError;

/// Hook consulted before sensitive forms (`import`, `inspect`, `eval`,
/// module loads). Returning an error vetoes the operation.
pub trait SecurityPolicy: Send + Sync {
    fn validate(&self, operation: &str, args: &[Value]) -> Result<(), EmberError>;
}

#[derive(Default)]
pub struct AllowAll;

impl SecurityPolicy for AllowAll {
    fn validate(&self, _operation: &str, _args: &[Value]) -> Result<(), EmberError> {
        Ok(())
    }
}

/// Denies the listed operations with PermissionError.
#[derive(Default)]
pub struct DenyListPolicy {
    denied: HashSet<String>,
}

impl DenyListPolicy {
    pub fn new<I, S>(operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: operations.into_iter().map(Into::into).collect(),
        }
    }
}

impl SecurityPolicy for DenyListPolicy {
    fn validate(&self, operation: &str, _args: &[Value]) -> Result<(), EmberError> {
        if self.denied.contains(operation) {
            Err(EmberError::permission(format!(
                "{} is not permitted",
                operation
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_list_vetoes_only_listed_operations() {
        let policy = DenyListPolicy::new(["import"]);
        assert!(matches!(
            policy.validate("import", &[]),
            Err(EmberError::Permission(_))
        ));
        assert!(policy.validate("inspect", &[]).is_ok());
        assert!(AllowAll.validate("import", &[]).is_ok());
    }
}
