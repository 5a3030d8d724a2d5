//! Error types for the mesh node.
//!
//! Only [`RadioError`] is meant to reach the operator during normal
//! operation. Frame and decode problems are recovered inside the
//! processing cycle and never surface as errors.

use thiserror::Error;

/// Wire frame could not be sliced into header fields
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Input shorter than the fixed header
    #[error("frame too short: {len} bytes, header needs {min}")]
    TooShort { len: usize, min: usize },
}

/// Pre-shared key could not be turned into a cipher key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// PSK is not valid base64
    #[error("invalid base64 key: {0}")]
    Base64(String),

    /// Only 1 (shorthand), 16 (AES-128) and 32 (AES-256) byte keys exist
    #[error("unsupported key length {0}, expected 1, 16 or 32 bytes")]
    Length(usize),

    /// Shorthand index 0 means "no crypto", which this node does not speak
    #[error("unencrypted channels are not supported")]
    Unencrypted,
}

/// Radio transport failure
#[derive(Error, Debug)]
pub enum RadioError {
    /// Transceiver reported a state it cannot recover from
    #[error("radio hardware fault: {0}")]
    Fault(String),

    /// Payload was read without a preceding successful reception
    #[error("no payload available: {0}")]
    NoPayload(String),

    /// Underlying bus or device I/O failed
    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node record persistence failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config encode error: {0}")]
    Encode(#[from] toml::ser::Error),

    /// A field parsed but holds an unusable value
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Umbrella error for node-level operations
#[derive(Error, Debug)]
pub enum MeshError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::TooShort { len: 3, min: 16 };
        assert!(err.to_string().contains("3 bytes"));
    }

    #[test]
    fn test_radio_error_converts_to_mesh_error() {
        let err: MeshError = RadioError::Fault("spi timeout".into()).into();
        assert!(matches!(err, MeshError::Radio(_)));
        assert!(err.to_string().contains("spi timeout"));
    }
}
