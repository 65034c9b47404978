//! Executor error types.

use thiserror::Error;
use xun_core::CoreError;
use xun_lang::LangError;
use xun_store::StoreError;

/// Errors produced while planning or executing a blueprint.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A user call raised; wraps the underlying cause.
    #[error("execution of {call} failed: {source}")]
    Execution {
        call: String,
        #[source]
        source: LangError,
    },

    /// The resource pool can never satisfy a call's declared tokens.
    #[error("resource pool cannot satisfy {resource}={needed} (capacity {capacity})")]
    ResourceExhausted {
        resource: String,
        needed: u64,
        capacity: u64,
    },

    /// The top-level run timeout expired.
    #[error("run timed out after {seconds:.1} seconds")]
    Timeout { seconds: f64 },

    /// The assignment coordinator misbehaved or is unreachable.
    #[error("coordination error: {message}")]
    Coordination { message: String },

    /// A call names a function absent from the blueprint.
    #[error("no function image for '{name}'")]
    UnknownFunction { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lang(#[from] LangError),

    #[error(transparent)]
    Core(#[from] CoreError),
}
