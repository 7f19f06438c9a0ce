use thiserror::Error;

/// Every failure the volume can surface. All failure paths are explicit
/// return values; nothing unwinds.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not a valid filesystem image")]
    BadImage,
    #[error("i/o failure on block {0}")]
    BlockIo(u32),
    #[error("no free inode")]
    NoFreeInode,
    #[error("no free block")]
    NoFreeBlock,
    #[error("directory is full")]
    DirFull,
    #[error("name already exists")]
    NameExists,
    #[error("name too long")]
    NameTooLong,
    #[error("no such entry")]
    NotFound,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("file exceeds the index block limit")]
    FileTooLarge,
    #[error("free bitmap disagrees with recorded state")]
    InconsistentBitmap,
}

pub type Result<T> = core::result::Result<T, FsError>;
