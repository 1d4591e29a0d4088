use thiserror::Error;

use super::types::PageId;

/// Storage engine error types. Conditions the callers are expected to
/// handle inline (page not resident, still pinned, duplicate key) are
/// reported as boolean results, not errors.
#[derive(Error, Debug)]
pub enum KeelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool exhausted: no free frame and no evictable frame")]
    PoolExhausted,

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type Result<T> = std::result::Result<T, KeelError>;
