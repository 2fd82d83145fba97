use thiserror::Error;

use crate::file::FileError;
use std::io;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("Index not open: {0}")]
    IndexNotOpen(String),

    #[error("Invalid index file magic number")]
    InvalidMagic,

    #[error("Invalid key kind: {0}")]
    InvalidKeyKind(u32),

    #[error("Corrupted node: {0}")]
    CorruptedNode(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
