//! Error types for the procedure frontend.
//!
//! Uses `thiserror` for structured, matchable variants. Parse and
//! validation errors are raised at decoration time; name, type, and
//! runtime errors are raised while a program is being evaluated.

use thiserror::Error;
use xun_core::CoreError;

/// Errors produced by parsing, validating, or evaluating user scripts.
#[derive(Debug, Error)]
pub enum LangError {
    /// The script is not syntactically valid Python.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A procedure violates the constant-binding sub-language.
    #[error("invalid procedure '{function}': {reason}")]
    InvalidProcedure { function: String, reason: String },

    /// The constant-binding statements of a procedure form a cycle.
    #[error("constant statements of '{function}' do not form a DAG")]
    NotDag { function: String },

    /// A module declares zero or more than one context, or a malformed
    /// driver/store expression.
    #[error("context error: {reason}")]
    Context { reason: String },

    /// A name is not defined in any reachable scope.
    #[error("name '{name}' is not defined")]
    Name { name: String },

    /// An operation received a value of the wrong type.
    #[error("expected {expected}, got {got}")]
    Type { expected: String, got: String },

    /// A non-xun function was handed a symbolic value whose result is not
    /// known yet.
    #[error("a non xun function [{function}] was passed a symbolic value [{value}]")]
    PassedSymbolicValue { function: String, value: String },

    /// A construct outside the supported sub-language.
    #[error("unsupported construct: {construct}")]
    Unsupported { construct: String },

    /// Any other failure while evaluating user code.
    #[error("{message}")]
    Runtime { message: String },

    /// Errors bubbling up from the core data model (copy guard,
    /// subscripts, unpacking).
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LangError {
    pub fn runtime(message: impl Into<String>) -> LangError {
        LangError::Runtime {
            message: message.into(),
        }
    }

    pub fn unsupported(construct: impl Into<String>) -> LangError {
        LangError::Unsupported {
            construct: construct.into(),
        }
    }
}
