//! IPC error types.

use fprint_core::{ErrorKind, error_domain};
use thiserror::Error;

/// IPC error type.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Channel closed")]
    ChannelClosed,
}

impl IpcError {
    /// The domain error kind of a remote error, when it belongs to the
    /// registered error domain.
    #[must_use]
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Remote { name, .. } => error_domain()?.kind_for(name),
            _ => None,
        }
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;
