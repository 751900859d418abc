use thiserror::Error;

use crate::bytesio::errors::{BytesReadError, BytesWriteError};

#[derive(Debug, Error)]
pub enum Amf0Error {
    #[error("unknown AMF0 marker: 0x{0:02x}")]
    UnknownMarker(u8),

    #[error("malformed UTF-8 in string value")]
    MalformedString,

    #[error("expected object end marker, found 0x{0:02x}")]
    MissingObjectEnd(u8),

    #[error(transparent)]
    BytesRead(#[from] BytesReadError),

    #[error(transparent)]
    BytesWrite(#[from] BytesWriteError),
}
