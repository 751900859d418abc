use thiserror::Error;

use crate::bytesio::errors::BytesReadError;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error(transparent)]
    BytesRead(#[from] BytesReadError),
}
