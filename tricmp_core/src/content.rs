//! Content providers: the capability "give me the length and bytes of side i".
//!
//! [`BufferSet`] serves in-memory panes (hex/text merge documents) and is also
//! what merge operations mutate. [`FsContentProvider`] reads the sides of a
//! path-set through a [`Vfs`].

use crate::hash_cache::HashCache;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::SystemTime;
use tricmp_common::{Blake3Hash, CacheKey, PathSet, Side, TricmpError, Vfs, VfsError};

pub trait ContentProvider: Send + Sync {
    /// Number of sides this provider serves
    fn side_count(&self) -> usize;

    /// Whether the side is present at all. Absent sides make the item unique.
    fn exists(&self, side: Side) -> bool;

    /// Byte length of an existing side
    fn length(&self, side: Side) -> Result<u64, TricmpError>;

    /// Up to `count` bytes starting at `offset`; shorter at end of content
    fn read(&self, side: Side, offset: u64, count: usize) -> Result<Vec<u8>, TricmpError>;

    fn modified(&self, _side: Side) -> Result<Option<SystemTime>, TricmpError> {
        Ok(None)
    }

    /// Full-content digest, when the provider can produce one cheaply
    fn fingerprint(&self, _side: Side) -> Result<Option<Blake3Hash>, TricmpError> {
        Ok(None)
    }
}

fn unavailable(side: Side, reason: impl ToString) -> TricmpError {
    TricmpError::ContentUnavailable {
        side: side.index(),
        reason: reason.to_string(),
    }
}

/// Content of one in-memory pane
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    modified: SystemTime,
    unsaved: bool,
}

impl Buffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self::with_modified(data, SystemTime::now())
    }

    /// Buffer carrying the timestamp of the content it was loaded from
    pub fn with_modified(data: Vec<u8>, modified: SystemTime) -> Self {
        Self {
            data,
            modified,
            unsaved: false,
        }
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_unsaved(&self) -> bool {
        self.unsaved
    }

    /// Mutable access; flags the buffer as edited
    pub(crate) fn edit(&mut self) -> &mut Vec<u8> {
        self.unsaved = true;
        self.modified = SystemTime::now();
        &mut self.data
    }
}

/// One optional byte buffer per pane
#[derive(Debug, Clone)]
pub struct BufferSet {
    buffers: Vec<Option<Buffer>>,
}

impl BufferSet {
    /// Fresh panes; every side shares one timestamp
    pub fn new(contents: Vec<Option<Vec<u8>>>) -> Self {
        let now = SystemTime::now();
        Self {
            buffers: contents
                .into_iter()
                .map(|c| c.map(|data| Buffer::with_modified(data, now)))
                .collect(),
        }
    }

    pub fn from_buffers(buffers: Vec<Option<Buffer>>) -> Self {
        Self { buffers }
    }

    pub fn side_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn get(&self, side: Side) -> Option<&Buffer> {
        self.buffers.get(side.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, side: Side) -> Option<&mut Buffer> {
        self.buffers.get_mut(side.index()).and_then(Option::as_mut)
    }

    /// Bytes of a side, if present
    pub fn bytes(&self, side: Side) -> Option<&[u8]> {
        self.get(side).map(Buffer::data)
    }

    /// Replace a side's content wholesale (creating the side if absent)
    pub fn replace(&mut self, side: Side, data: Vec<u8>) -> Result<(), TricmpError> {
        let slot = self
            .buffers
            .get_mut(side.index())
            .ok_or_else(|| TricmpError::InvalidSide(format!("pane {} not in buffer set", side)))?;
        match slot {
            Some(buffer) => *buffer.edit() = data,
            None => {
                let mut buffer = Buffer::new(data);
                buffer.unsaved = true;
                *slot = Some(buffer);
            }
        }
        Ok(())
    }

    /// Sides edited since load or the last save point
    pub fn modified_sides(&self) -> Vec<Side> {
        self.buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.as_ref().map_or(false, Buffer::is_unsaved))
            .filter_map(|(i, _)| Side::from_index(i))
            .collect()
    }

    /// Forget pending edits on a side (after save or discard)
    pub fn set_save_point(&mut self, side: Side) {
        if let Some(buffer) = self.get_mut(side) {
            buffer.unsaved = false;
        }
    }
}

impl ContentProvider for BufferSet {
    fn side_count(&self) -> usize {
        self.buffers.len()
    }

    fn exists(&self, side: Side) -> bool {
        self.get(side).is_some()
    }

    fn length(&self, side: Side) -> Result<u64, TricmpError> {
        self.get(side)
            .map(|b| b.len() as u64)
            .ok_or_else(|| unavailable(side, "no buffer loaded"))
    }

    fn read(&self, side: Side, offset: u64, count: usize) -> Result<Vec<u8>, TricmpError> {
        let data = self
            .bytes(side)
            .ok_or_else(|| unavailable(side, "no buffer loaded"))?;
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(count).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn modified(&self, side: Side) -> Result<Option<SystemTime>, TricmpError> {
        Ok(self.get(side).map(Buffer::modified))
    }
}

/// Reads the sides of a path-set through a VFS
pub struct FsContentProvider<'a> {
    paths: &'a PathSet,
    vfs: &'a dyn Vfs,
    cache: Option<&'a HashCache>,
}

impl<'a> FsContentProvider<'a> {
    pub fn new(paths: &'a PathSet, vfs: &'a dyn Vfs) -> Self {
        Self {
            paths,
            vfs,
            cache: None,
        }
    }

    /// Serve full-content fingerprints through `cache`
    pub fn with_cache(mut self, cache: &'a HashCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn path(&self, side: Side) -> Result<&'a Path, TricmpError> {
        self.paths
            .get(side)
            .map(|p| p.as_path())
            .ok_or_else(|| unavailable(side, "no path for side"))
    }

    fn hash_file(&self, side: Side, path: &Path) -> Result<Blake3Hash, TricmpError> {
        let mut reader = self.vfs.open_file(path).map_err(|e| unavailable(side, e))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let n = reader.read(&mut buffer).map_err(|e| unavailable(side, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize().into())
    }
}

fn is_not_found(err: &VfsError) -> bool {
    match err {
        VfsError::NotFound(_) => true,
        VfsError::Io(e) => e.kind() == ErrorKind::NotFound,
        _ => false,
    }
}

impl ContentProvider for FsContentProvider<'_> {
    fn side_count(&self) -> usize {
        self.paths.len()
    }

    fn exists(&self, side: Side) -> bool {
        let Ok(path) = self.path(side) else {
            return false;
        };
        match self.vfs.metadata(path) {
            Ok(meta) => !meta.is_dir,
            Err(e) if is_not_found(&e) => false,
            // Present but unreadable: let length()/read() report the failure
            Err(_) => true,
        }
    }

    fn length(&self, side: Side) -> Result<u64, TricmpError> {
        let path = self.path(side)?;
        self.vfs
            .metadata(path)
            .map(|m| m.size)
            .map_err(|e| unavailable(side, e))
    }

    fn read(&self, side: Side, offset: u64, count: usize) -> Result<Vec<u8>, TricmpError> {
        let path = self.path(side)?;
        self.vfs
            .read_range(path, offset, count)
            .map_err(|e| unavailable(side, e))
    }

    fn modified(&self, side: Side) -> Result<Option<SystemTime>, TricmpError> {
        let path = self.path(side)?;
        self.vfs
            .metadata(path)
            .map(|m| Some(m.modified))
            .map_err(|e| unavailable(side, e))
    }

    fn fingerprint(&self, side: Side) -> Result<Option<Blake3Hash>, TricmpError> {
        let Some(cache) = self.cache else {
            return Ok(None);
        };
        let path = self.path(side)?;
        let meta = self.vfs.metadata(path).map_err(|e| unavailable(side, e))?;
        let key = CacheKey {
            path: path.to_path_buf(),
            modified: meta.modified,
            size: meta.size,
        };
        cache
            .get_or_compute(key, || self.hash_file(side, path))
            .map(Some)
    }
}
