//! Runtime client configuration.
//!
//! Settings that tune transport behavior without touching evaluation
//! semantics. Loaded from a TOML file or assembled in code; bindings read
//! the values they care about at connect time.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Default size of one streamed array slice, in bytes.
pub const DEFAULT_STREAMING_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Slice size negotiated for length-delimited bulk array transfers.
    pub streaming_buffer_size: usize,
    /// Per-call timeout on network bindings, in milliseconds. `None` waits
    /// indefinitely.
    pub call_timeout_ms: Option<u64>,
    /// Heartbeat period of network bindings, in seconds. Zero disables the
    /// heartbeat.
    pub heartbeat_secs: u64,
    /// Compresses bulk array transfers when the binding supports it.
    pub compress_streams: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            streaming_buffer_size: DEFAULT_STREAMING_BUFFER_SIZE,
            call_timeout_ms: None,
            heartbeat_secs: 30,
            compress_streams: false,
        }
    }
}

impl RuntimeConfig {
    /// Reads a TOML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Validation(format!("cannot read config `{}`: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(text)
            .map_err(|e| Error::Serialization(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.streaming_buffer_size == 0 {
            return Err(Error::validation("streaming_buffer_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_keys() {
        let config = RuntimeConfig::from_toml("call_timeout_ms = 5000\n").unwrap();
        assert_eq!(config.call_timeout_ms, Some(5000));
        assert_eq!(config.streaming_buffer_size, DEFAULT_STREAMING_BUFFER_SIZE);
        assert_eq!(config.heartbeat_secs, 30);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        assert!(RuntimeConfig::from_toml("streaming_buffer_size = 0\n").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = RuntimeConfig {
            streaming_buffer_size: 4096,
            call_timeout_ms: Some(250),
            heartbeat_secs: 0,
            compress_streams: true,
        };
        let text = config.to_toml().unwrap();
        assert_eq!(RuntimeConfig::from_toml(&text).unwrap(), config);
    }
}
