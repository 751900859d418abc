use thiserror::Error;

use crate::bytesio::errors::BytesWriteError;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("message length {size} exceeds the {max} byte ceiling")]
    MessageTooLarge { size: usize, max: usize },

    #[error("declared chunk size {0} is not usable")]
    InvalidChunkSize(u32),

    #[error("first chunk on stream {csid} uses compressed format {format}")]
    MissingInitialHeader { csid: u32, format: u8 },
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("chunk stream id {0} is outside the encodable range")]
    CsidOutOfRange(u32),

    #[error(transparent)]
    BytesWrite(#[from] BytesWriteError),
}
