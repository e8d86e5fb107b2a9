//! Error types.

use std::io;

use crate::entity::EntityKind;

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Crate-wide error type.
///
/// All engine and transport failures surface as one of these kinds at the
/// outermost call the user made; intermediate failures are never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("call requires engine version {required}, connected engine reports {actual}")]
    VersionNotSupported { required: String, actual: String },

    #[error("engine does not support the requested operation: {0}")]
    UnsupportedOperation(String),

    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("operation on a released handle ({kind:?} {handle})")]
    HandleReleased { kind: EntityKind, handle: u64 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("transport timeout after {0} ms")]
    TransportTimeout(u64),

    #[error("license failure: {0}")]
    License(String),

    #[error("engine error in operator `{operator}`: {message}")]
    Engine {
        message: String,
        operator: String,
        backtrace: String,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub(crate) fn engine(operator: &str, message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            operator: operator.to_string(),
            backtrace: String::new(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Wire-safe projection of [`Error`], exchanged with remote engines.
///
/// The network binding cannot ship a `thiserror` enum with foreign payloads
/// across processes, so engine responses carry this flat record instead and
/// convert at the binding seam.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EngineFault {
    pub kind: FaultKind,
    pub message: String,
    pub operator: String,
    pub backtrace: String,
}

#[derive(Clone, Copy, Debug, PartialEq, serde_repr::Deserialize_repr, serde_repr::Serialize_repr)]
#[repr(u8)]
pub enum FaultKind {
    Unsupported,
    TypeMismatch,
    HandleReleased,
    License,
    Engine,
    Validation,
}

impl From<EngineFault> for Error {
    fn from(f: EngineFault) -> Self {
        match f.kind {
            FaultKind::Unsupported => Error::UnsupportedOperation(f.message),
            FaultKind::TypeMismatch => Error::TypeMismatch {
                expected: f.message,
                actual: f.operator,
            },
            FaultKind::HandleReleased => {
                match (EntityKind::from_str(&f.message), f.operator.parse::<u64>()) {
                    (Ok(kind), Ok(handle)) => Error::HandleReleased { kind, handle },
                    _ => Error::Validation(f.message),
                }
            }
            FaultKind::License => Error::License(f.message),
            FaultKind::Engine => Error::Engine {
                message: f.message,
                operator: f.operator,
                backtrace: f.backtrace,
            },
            FaultKind::Validation => Error::Validation(f.message),
        }
    }
}

impl From<&Error> for EngineFault {
    fn from(e: &Error) -> Self {
        let (kind, message, operator) = match e {
            Error::UnsupportedOperation(m) => (FaultKind::Unsupported, m.clone(), String::new()),
            Error::TypeMismatch { expected, actual } => {
                (FaultKind::TypeMismatch, expected.clone(), actual.clone())
            }
            Error::HandleReleased { kind, handle } => (
                FaultKind::HandleReleased,
                kind.to_str().to_string(),
                handle.to_string(),
            ),
            Error::License(m) => (FaultKind::License, m.clone(), String::new()),
            Error::Engine {
                message, operator, ..
            } => (FaultKind::Engine, message.clone(), operator.clone()),
            Error::Validation(m) => (FaultKind::Validation, m.clone(), String::new()),
            other => (FaultKind::Engine, other.to_string(), String::new()),
        };
        let backtrace = match e {
            Error::Engine { backtrace, .. } => backtrace.clone(),
            _ => String::new(),
        };
        EngineFault {
            kind,
            message,
            operator,
            backtrace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handles_survive_the_fault_seam() {
        let err = Error::HandleReleased {
            kind: EntityKind::Field,
            handle: 7,
        };
        let fault = EngineFault::from(&err);
        assert_eq!(fault.kind, FaultKind::HandleReleased);
        assert_eq!(Error::from(fault), err);
    }

    #[test]
    fn engine_faults_keep_operator_attribution() {
        let err = Error::Engine {
            message: "division by zero".to_string(),
            operator: "scale".to_string(),
            backtrace: String::new(),
        };
        let fault = EngineFault::from(&err);
        assert_eq!(fault.kind, FaultKind::Engine);
        assert_eq!(Error::from(fault), err);
    }
}
