use tricmp_common::{FileMetadata, Vfs, VfsError};
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Local filesystem VFS implementation
pub struct LocalVfs {
    instance_id: String,
    root: PathBuf,
}

impl LocalVfs {
    pub fn new(root: PathBuf) -> Self {
        let instance_id = format!("local:{}", root.display());
        Self { instance_id, root }
    }

    /// VFS resolving paths as given (absolute, or relative to the working directory)
    pub fn unrooted() -> Self {
        Self::new(PathBuf::new())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Default for LocalVfs {
    fn default() -> Self {
        Self::unrooted()
    }
}

fn map_io(err: std::io::Error, path: &Path) -> VfsError {
    match err.kind() {
        ErrorKind::NotFound => VfsError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => VfsError::PermissionDenied(path.display().to_string()),
        _ => VfsError::Io(err),
    }
}

impl Vfs for LocalVfs {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata, VfsError> {
        let full_path = self.resolve(path);
        let meta = fs::metadata(&full_path).map_err(|e| map_io(e, &full_path))?;

        Ok(FileMetadata {
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: meta.is_dir(),
            is_symlink: meta.is_symlink(),
        })
    }

    fn open_file(&self, path: &Path) -> Result<Box<dyn Read + Send>, VfsError> {
        let full_path = self.resolve(path);

        if full_path.is_dir() {
            return Err(VfsError::NotAFile(full_path.display().to_string()));
        }

        let file = fs::File::open(&full_path).map_err(|e| map_io(e, &full_path))?;
        Ok(Box::new(file))
    }

    fn read_range(&self, path: &Path, offset: u64, count: usize) -> Result<Vec<u8>, VfsError> {
        let full_path = self.resolve(path);
        let mut file = fs::File::open(&full_path).map_err(|e| map_io(e, &full_path))?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = Vec::with_capacity(count);
        file.take(count as u64).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn create_file(&self, path: &Path) -> Result<Box<dyn Write + Send>, VfsError> {
        let full_path = self.resolve(path);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = fs::File::create(&full_path).map_err(|e| map_io(e, &full_path))?;
        Ok(Box::new(file))
    }
}
