use thiserror::Error;

#[derive(Error, Debug)]
pub enum TricmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("VFS error: {0}")]
    Vfs(String),

    #[error("Path error: {0}")]
    Path(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hash cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Comparison error: {0}")]
    Comparison(String),

    /// A side's content could not be read (missing path, permission denied, ...)
    #[error("Content unavailable on side {side}: {reason}")]
    ContentUnavailable { side: usize, reason: String },

    /// A copy request addressed bytes outside one of the buffers
    #[error("Range {start}..{end} out of bounds (source length {src_len}, destination length {dst_len})")]
    Range {
        start: usize,
        end: usize,
        src_len: usize,
        dst_len: usize,
    },

    /// Side count of an item or provider does not match the store's arity
    #[error("Inconsistent side count: expected {expected}, got {actual}")]
    InconsistentSideCount { expected: usize, actual: usize },

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Unknown item: {0}")]
    UnknownItem(u64),

    #[error("Item {0} has no in-memory buffers")]
    NoBuffers(u64),
}

pub type Result<T> = std::result::Result<T, TricmpError>;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<VfsError> for TricmpError {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::Io(e) => TricmpError::Io(e),
            other => TricmpError::Vfs(other.to_string()),
        }
    }
}
