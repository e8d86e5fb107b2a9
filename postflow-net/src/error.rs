//! Error types.

pub type Result<T> = core::result::Result<T, Error>;

/// Errors occurring at the wire level.
///
/// The binding seam converts these into the core taxonomy; user code above
/// `EngineBinding` only ever sees `postflow_core::Error`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("timed out after {0} ms")]
    TimedOut(u64),

    #[error("host unreachable: {0}")]
    HostUnreachable(String),

    #[error("malformed endpoint `{endpoint}`: {reason}")]
    MalformedEndpoint { endpoint: String, reason: String },

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("frame of {0} bytes exceeds the wire limit")]
    OversizedFrame(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[cfg(feature = "msgpack_encoding")]
    #[error("msgpack decode error: {0}")]
    RmpDecode(#[from] rmp_serde::decode::Error),
    #[cfg(feature = "msgpack_encoding")]
    #[error("msgpack encode error: {0}")]
    RmpEncode(#[from] rmp_serde::encode::Error),

    #[cfg(feature = "json_encoding")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] postflow_core::Error),
}

impl From<Error> for postflow_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(inner) => inner,
            Error::TimedOut(ms) => postflow_core::Error::TransportTimeout(ms),
            other => postflow_core::Error::Transport(other.to_string()),
        }
    }
}
