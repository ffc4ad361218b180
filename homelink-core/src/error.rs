//! Error handling for homelink core operations
//!
//! A single [`CoreError`] enum covers every failure the core can surface:
//! value grammar violations, configuration mistakes, registry conflicts and
//! socket errors. Background tasks (reader loops, the timer loop, delayed
//! transmissions) log and swallow their errors so one faulty port or task
//! never stalls the scheduler; configuration-phase errors abort the import
//! of the offending element and propagate to the caller.

use thiserror::Error;

/// Result type alias for homelink core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Unified error type for the homelink core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Value text does not match the object type's grammar.
    #[error("invalid {kind} value: '{value}'")]
    Parse { kind: &'static str, value: String },

    /// Configuration names an unknown object/timespec/ioport type.
    #[error("unsupported type: '{0}'")]
    UnsupportedType(String),

    /// An id is already registered.
    #[error("duplicate id: '{0}'")]
    DuplicateId(String),

    /// No entity registered under the given id.
    #[error("id not found: '{0}'")]
    NotFound(String),

    /// A referenced object exists but has the wrong type for its role.
    #[error("object '{id}' has wrong type for {role}")]
    WrongObjectType { id: String, role: &'static str },

    /// The resolver proved no future instant satisfies a time spec.
    #[error("no reachable schedule")]
    ScheduleUnreachable,

    /// Malformed configuration element.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Socket create/bind/send/recv failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Shorthand for a [`CoreError::Parse`] with an owned copy of the
    /// offending text.
    pub fn parse(kind: &'static str, value: impl Into<String>) -> Self {
        CoreError::Parse {
            kind,
            value: value.into(),
        }
    }

    /// Shorthand for a [`CoreError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }
}
