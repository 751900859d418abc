use thiserror::Error;

use crate::amf0::errors::Amf0Error;
use crate::bytesio::errors::BytesReadError;
use crate::chunk::errors::{PackError, UnpackError};
use crate::handshake::errors::HandshakeError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("handshake deadline exceeded")]
    HandshakeTimeout,

    #[error("chunk decode failed: {0}")]
    Unpack(#[from] UnpackError),

    #[error("chunk encode failed: {0}")]
    Pack(#[from] PackError),

    #[error("command decode failed: {0}")]
    Amf0(#[from] Amf0Error),

    #[error(transparent)]
    BytesRead(#[from] BytesReadError),

    #[error("malformed {command} command: {reason}")]
    MalformedCommand {
        command: &'static str,
        reason: &'static str,
    },

    #[error("'{command}' is not legal in the {state} state")]
    IllegalState {
        command: &'static str,
        state: &'static str,
    },

    #[error("publish rejected: stream key '{0}' already live")]
    PublishRejected(String),

    #[error("peer closed the connection")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
