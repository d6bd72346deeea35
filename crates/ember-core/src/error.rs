use std::fmt;
use std::sync::Arc;

use crate::ast::Value;
use crate::condition::{Condition, ConditionKind};
use thiserror::Error;

pub const ERROR_TAG: &str = "\x1b[31m[ERROR]\x1b[0m";
pub const WARN_TAG: &str = "\x1b[33m[WARN]\x1b[0m";

#[derive(Clone, Debug, Default)]
pub struct StackFrame {
    pub function: String,
    pub namespace: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub stack: Vec<StackFrame>,
}

impl ErrorContext {
    fn push_frame(&mut self, frame: StackFrame) {
        self.stack.push(frame);
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeErrorData {
    pub message: String,
    pub context: ErrorContext,
}

impl RuntimeErrorData {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }
}

impl fmt::Display for RuntimeErrorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Error, Debug, Clone)]
pub enum EmberError {
    #[error("{0}")]
    SymbolNotFound(RuntimeErrorData),

    #[error("Namespace sealed: {0}")]
    NamespaceSealed(RuntimeErrorData),

    #[error("Type mismatch: {0}")]
    TypeMismatch(RuntimeErrorData),

    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(RuntimeErrorData),

    #[error("Arity mismatch: {0}")]
    Arity(RuntimeErrorData),

    #[error("Precondition failed: {0}")]
    Precondition(RuntimeErrorData),

    #[error("Permission denied: {0}")]
    Permission(RuntimeErrorData),

    #[error("Parse error: {0}")]
    Parse(RuntimeErrorData),

    #[error("execution interrupted")]
    Interrupted(ErrorContext),

    #[error("Thrown: {0}")]
    Thrown(Arc<Condition>, ErrorContext),

    #[error("Runtime error: {0}")]
    Other(RuntimeErrorData),

    #[error("internal recur signal")]
    RecurSignal { target: usize, values: Vec<Value> },
}

impl EmberError {
    pub fn symbol_not_found(message: impl Into<String>) -> Self {
        EmberError::SymbolNotFound(RuntimeErrorData::new(message))
    }

    pub fn sealed(ns: &str) -> Self {
        EmberError::NamespaceSealed(RuntimeErrorData::new(format!(
            "namespace '{}' is sealed",
            ns
        )))
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        EmberError::TypeMismatch(RuntimeErrorData::new(message))
    }

    pub fn expected(expected: &str, actual: &Value) -> Self {
        Self::type_mismatch(format!(
            "expected {}, got {}",
            expected,
            actual.type_name()
        ))
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        EmberError::DuplicateDefinition(RuntimeErrorData::new(message))
    }

    pub fn arity(message: impl Into<String>) -> Self {
        EmberError::Arity(RuntimeErrorData::new(message))
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        EmberError::Precondition(RuntimeErrorData::new(message))
    }

    pub fn permission(message: impl Into<String>) -> Self {
        EmberError::Permission(RuntimeErrorData::new(message))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        EmberError::Parse(RuntimeErrorData::new(message))
    }

    pub fn interrupted() -> Self {
        EmberError::Interrupted(ErrorContext::default())
    }

    pub fn thrown(condition: Condition) -> Self {
        EmberError::Thrown(Arc::new(condition), ErrorContext::default())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        EmberError::Other(RuntimeErrorData::new(message))
    }

    /// Record that the error passed through a function call.
    pub fn with_frame(mut self, function: impl Into<String>, namespace: Option<String>) -> Self {
        if let Some(ctx) = self.context_mut() {
            ctx.push_frame(StackFrame {
                function: function.into(),
                namespace,
            });
        }
        self
    }

    pub fn stack(&self) -> &[StackFrame] {
        self.context_ref()
            .map(|ctx| ctx.stack.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_recur_signal(&self) -> bool {
        matches!(self, EmberError::RecurSignal { .. })
    }

    /// Message without the variant prefix added by `Display`.
    pub fn message(&self) -> String {
        match self {
            EmberError::SymbolNotFound(data)
            | EmberError::NamespaceSealed(data)
            | EmberError::TypeMismatch(data)
            | EmberError::DuplicateDefinition(data)
            | EmberError::Arity(data)
            | EmberError::Precondition(data)
            | EmberError::Permission(data)
            | EmberError::Parse(data)
            | EmberError::Other(data) => data.message.clone(),
            EmberError::Thrown(cond, _) => cond.message.clone(),
            other => other.to_string(),
        }
    }

    pub fn kind(&self) -> ConditionKind {
        match self {
            EmberError::SymbolNotFound(_) => ConditionKind::SymbolNotFound,
            EmberError::NamespaceSealed(_) => ConditionKind::NamespaceSealedError,
            EmberError::TypeMismatch(_) => ConditionKind::TypeMismatchError,
            EmberError::DuplicateDefinition(_) => ConditionKind::DuplicateDefinitionError,
            EmberError::Arity(_) => ConditionKind::ArityError,
            EmberError::Precondition(_) => ConditionKind::PreconditionViolation,
            EmberError::Permission(_) => ConditionKind::PermissionError,
            EmberError::Interrupted(_) => ConditionKind::InterruptedError,
            EmberError::Thrown(cond, _) => cond.kind,
            EmberError::Parse(_) | EmberError::Other(_) | EmberError::RecurSignal { .. } => {
                ConditionKind::RuntimeFailure
            }
        }
    }

    /// The condition a `catch` clause sees for this error.
    pub fn to_condition(&self) -> Arc<Condition> {
        match self {
            EmberError::Thrown(cond, _) => cond.clone(),
            other => Arc::new(Condition::new(other.kind(), other.message())),
        }
    }

    fn context_ref(&self) -> Option<&ErrorContext> {
        match self {
            EmberError::SymbolNotFound(data)
            | EmberError::NamespaceSealed(data)
            | EmberError::TypeMismatch(data)
            | EmberError::DuplicateDefinition(data)
            | EmberError::Arity(data)
            | EmberError::Precondition(data)
            | EmberError::Permission(data)
            | EmberError::Parse(data)
            | EmberError::Other(data) => Some(&data.context),
            EmberError::Interrupted(context) | EmberError::Thrown(_, context) => Some(context),
            EmberError::RecurSignal { .. } => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            EmberError::SymbolNotFound(data)
            | EmberError::NamespaceSealed(data)
            | EmberError::TypeMismatch(data)
            | EmberError::DuplicateDefinition(data)
            | EmberError::Arity(data)
            | EmberError::Precondition(data)
            | EmberError::Permission(data)
            | EmberError::Parse(data)
            | EmberError::Other(data) => Some(&mut data.context),
            EmberError::Interrupted(context) | EmberError::Thrown(_, context) => Some(context),
            EmberError::RecurSignal { .. } => None,
        }
    }
}

impl From<String> for EmberError {
    fn from(message: String) -> Self {
        EmberError::runtime(message)
    }
}

impl From<&str> for EmberError {
    fn from(message: &str) -> Self {
        EmberError::runtime(message)
    }
}

/// Render an uncaught error for the embedding host, innermost frame first.
pub fn format_error(err: &EmberError) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("{} {}", ERROR_TAG, err));
    if let EmberError::Thrown(cond, _) = err {
        if let Some(value) = &cond.value {
            lines.push(format!("  value: {}", value));
        }
        let mut cause = cond.cause.clone();
        while let Some(c) = cause {
            lines.push(format!("  caused by {}: {}", c.kind.name(), c.message));
            cause = c.cause.clone();
        }
    }
    for frame in err.stack() {
        match &frame.namespace {
            Some(ns) => lines.push(format!("  at {}/{}", ns, frame.function)),
            None => lines.push(format!("  at {}", frame.function)),
        }
    }
    lines
}
