use crate::{FileMetadata, VfsError};
use std::io::{self, Read, Write};
use std::path::Path;

/// Filesystem abstraction the content providers read sides through.
///
/// Paths are resolved relative to the backend's root.
pub trait Vfs: Send + Sync {
    /// Uniquely identifies the VFS instance (e.g., "local:/tmp")
    fn instance_id(&self) -> &str;

    /// Returns the metadata for a specific path
    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError>;

    /// Opens a file for reading
    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError>;

    /// Read up to `count` bytes starting at `offset`.
    ///
    /// The default skips forward through [`Vfs::open_file`]; seekable backends
    /// should override it.
    fn read_range(&self, path: &Path, offset: u64, count: usize) -> Result<Vec<u8>, VfsError> {
        let mut reader = self.open_file(path)?;
        let skipped = io::copy(&mut reader.by_ref().take(offset), &mut io::sink())?;
        if skipped < offset {
            return Ok(Vec::new());
        }
        let mut buffer = Vec::with_capacity(count);
        reader.take(count as u64).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Checks if a path exists
    fn exists(&self, path: &Path) -> bool {
        self.metadata(path).is_ok()
    }

    /// Check if this VFS supports write operations
    fn is_writable(&self) -> bool {
        false
    }

    /// Create (or truncate) a file and return a writer
    fn create_file(&self, _path: &Path) -> Result<Box<dyn Write + Send>, VfsError> {
        Err(VfsError::Unsupported("Write operations not supported".to_string()))
    }

    /// Write file content from bytes
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), VfsError> {
        let mut writer = self.create_file(path)?;
        writer.write_all(content).map_err(VfsError::Io)?;
        writer.flush().map_err(VfsError::Io)?;
        Ok(())
    }
}
