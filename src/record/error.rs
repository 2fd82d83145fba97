use crate::file::FileError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Table not open: {0}")]
    TableNotOpen(String),

    #[error("Slot {0} is already live")]
    DuplicateSlot(i32),

    #[error("Slot {0} not found")]
    SlotNotFound(i32),

    #[error("Record of {0} bytes does not fit in a page")]
    PayloadTooLarge(usize),

    #[error("Corrupt record page {0}")]
    CorruptPage(usize),

    #[error("Row encoding error: {0}")]
    Encoding(String),

    #[error("Row decoding error: {0}")]
    Decoding(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("NULL value for NOT NULL column: {0}")]
    NullViolation(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

pub type RecordResult<T> = Result<T, RecordError>;
