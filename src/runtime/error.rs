use thiserror::Error;

/// Violations of the reference/ownership bookkeeping. These are engine bugs,
/// never the fault of the script being run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFault {
    #[error("reference handle {index}#{generation} no longer points at live storage")]
    DanglingReference { index: u32, generation: u32 },
    #[error("escaping reference could not be repaired before its scope was destroyed")]
    UnrepairableEscape,
    #[error("scope {0} has already been destroyed")]
    DeadScope(u64),
    #[error("alias chain does not terminate at a root")]
    AliasCycle,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("name error: {0}")]
    NameError(String),
    #[error("already defined: {0}")]
    AlreadyDefined(String),
    #[error("index {index} is out of range for an array of length {length}")]
    IndexOutOfRange { index: f64, length: usize },
    #[error("{name} expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("cannot import {path}: {reason}")]
    ImportFailure { path: String, reason: String },
    #[error("break outside of a loop")]
    UnexpectedBreak,
    #[error("maximum call depth ({0}) exceeded")]
    RecursionLimit(usize),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("internal error: {0}")]
    Internal(#[from] EngineFault),
}

impl RuntimeError {
    /// Stable numeric code, shared with the diagnostics printed by the CLI.
    pub fn code(&self) -> u32 {
        match self {
            RuntimeError::TypeMismatch(_) => 1,
            RuntimeError::IndexOutOfRange { .. } => 3,
            RuntimeError::AlreadyDefined(_) => 10,
            RuntimeError::NameError(_) => 11,
            RuntimeError::UnsupportedOperator(_) => 41,
            RuntimeError::ArityMismatch { .. } => 65,
            RuntimeError::UnexpectedBreak => 66,
            RuntimeError::RecursionLimit(_) => 67,
            RuntimeError::ImportFailure { .. } => 80,
            RuntimeError::Io(_) => 90,
            RuntimeError::Internal(_) => 2,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, RuntimeError::Internal(_))
    }

    pub(crate) fn type_mismatch(msg: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch(msg.into())
    }

    pub(crate) fn name_error(msg: impl Into<String>) -> Self {
        RuntimeError::NameError(msg.into())
    }
}
