use thiserror::Error;

use super::types::{FrameId, PageId};

/// Storage engine error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool out of memory: no free or evictable frame")]
    OutOfMemory,

    #[error("invalid frame id: {0}")]
    InvalidFrame(FrameId),

    #[error("invalid page id: {0}")]
    InvalidPage(PageId),

    #[error("frame {0} is not evictable")]
    NonEvictable(FrameId),

    #[error("replacer k must be greater than zero")]
    InvalidK,

    #[error("index header page is full")]
    HeaderFull,

    #[error("disk scheduler channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;
