use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum BytesReadError {
    #[error("not enough bytes: need {need}, have {have}")]
    NotEnoughBytes { need: usize, have: usize },
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum BytesWriteError {
    #[error("value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: u64 },
}
