use std::fmt;
use std::sync::Arc;

use crate::ast::Value;

/// Kinds of thrown conditions. Every kind except `Throwable` has one parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    Throwable,
    Error,
    InterruptedError,
    Exception,
    RuntimeException,
    ValueException,
    SymbolNotFound,
    TypeMismatchError,
    DuplicateDefinitionError,
    ArityError,
    PreconditionViolation,
    PermissionError,
    NamespaceSealedError,
    RuntimeFailure,
}

impl ConditionKind {
    pub const ALL: &'static [ConditionKind] = &[
        ConditionKind::Throwable,
        ConditionKind::Error,
        ConditionKind::InterruptedError,
        ConditionKind::Exception,
        ConditionKind::RuntimeException,
        ConditionKind::ValueException,
        ConditionKind::SymbolNotFound,
        ConditionKind::TypeMismatchError,
        ConditionKind::DuplicateDefinitionError,
        ConditionKind::ArityError,
        ConditionKind::PreconditionViolation,
        ConditionKind::PermissionError,
        ConditionKind::NamespaceSealedError,
        ConditionKind::RuntimeFailure,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConditionKind::Throwable => "Throwable",
            ConditionKind::Error => "Error",
            ConditionKind::InterruptedError => "InterruptedError",
            ConditionKind::Exception => "Exception",
            ConditionKind::RuntimeException => "RuntimeException",
            ConditionKind::ValueException => "ValueException",
            ConditionKind::SymbolNotFound => "SymbolNotFound",
            ConditionKind::TypeMismatchError => "TypeMismatchError",
            ConditionKind::DuplicateDefinitionError => "DuplicateDefinitionError",
            ConditionKind::ArityError => "ArityError",
            ConditionKind::PreconditionViolation => "PreconditionViolation",
            ConditionKind::PermissionError => "PermissionError",
            ConditionKind::NamespaceSealedError => "NamespaceSealedError",
            ConditionKind::RuntimeFailure => "RuntimeFailure",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn parent(self) -> Option<Self> {
        use ConditionKind::*;
        match self {
            Throwable => None,
            Error | Exception => Some(Throwable),
            InterruptedError => Some(Error),
            RuntimeException => Some(Exception),
            NamespaceSealedError => Some(PermissionError),
            ValueException | SymbolNotFound | TypeMismatchError | DuplicateDefinitionError
            | ArityError | PreconditionViolation | PermissionError | RuntimeFailure => {
                Some(RuntimeException)
            }
        }
    }

    /// True when `self` is `ancestor` or one of its descendants.
    pub fn is_a(self, ancestor: ConditionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A thrown value: kind, message, optional payload and cause chain.
#[derive(Clone, Debug)]
pub struct Condition {
    pub kind: ConditionKind,
    pub message: String,
    pub value: Option<Value>,
    pub cause: Option<Arc<Condition>>,
}

impl Condition {
    pub fn new(kind: ConditionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            value: None,
            cause: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_cause(mut self, cause: Arc<Condition>) -> Self {
        self.cause = Some(cause);
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_namespace_is_a_permission_error() {
        assert!(ConditionKind::NamespaceSealedError.is_a(ConditionKind::PermissionError));
        assert!(ConditionKind::NamespaceSealedError.is_a(ConditionKind::Exception));
        assert!(!ConditionKind::InterruptedError.is_a(ConditionKind::Exception));
        assert!(ConditionKind::InterruptedError.is_a(ConditionKind::Throwable));
    }

    #[test]
    fn names_round_trip() {
        for kind in ConditionKind::ALL {
            assert_eq!(ConditionKind::from_name(kind.name()), Some(*kind));
        }
    }
}
