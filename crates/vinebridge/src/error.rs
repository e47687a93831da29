//! Error types for the plugin bridge.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the framing and serialization layer.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame of {length} bytes exceeds the {limit} byte channel limit")]
    FrameTooLarge { length: u64, limit: u64 },

    #[error("malformed frame: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("IO error while framing: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("could not set up socket group: {0}")]
    SocketSetup(String),

    #[error("host process failed to connect within {timeout_secs}s")]
    HandshakeTimeout { timeout_secs: u64 },

    #[error("host process exited before the handshake completed")]
    HostDied,

    #[error("failed to load plugin module {path}: {reason}")]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_too_large_display() {
        let err = CodecError::FrameTooLarge {
            length: 1024,
            limit: 512,
        };
        assert!(err.to_string().contains("1024"));
        assert!(err.to_string().contains("512"));
    }

    #[test]
    fn codec_error_converts_to_bridge_error() {
        let err: BridgeError = CodecError::FrameTooLarge {
            length: 2,
            limit: 1,
        }
        .into();
        assert!(matches!(err, BridgeError::Codec(_)));
    }
}
