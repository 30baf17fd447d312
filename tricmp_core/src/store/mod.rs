//! The mutable collection of compare items.
//!
//! Registry mutations (`register`/`remove`) take the registry lock; evaluation
//! and copies take only the item's own mutex, so disjoint items can be
//! evaluated in parallel while the registry stays available.

mod notify;

#[cfg(test)]
mod tests_store;

pub use notify::{DiffCodeChange, Notifier};

use crate::content::{Buffer, BufferSet, ContentProvider, FsContentProvider};
use crate::engine::{CompareEngine, EngineOptions};
use crate::hash_cache::HashCache;
use crate::item::{CompareItem, ItemSnapshot, ItemState};
use crate::merge_ops;
use crate::scanner::FolderScanner;
use crate::vfs::LocalVfs;
use crossbeam::channel::Receiver;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use tricmp_common::{
    AppConfig, Arity, DiffCode, DiffCounts, FileEntry, ItemHandle, PathSet, SessionId, Side,
    TricmpError, Vfs,
};

/// What an item is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Paths(PathSet),
    Session(SessionId),
}

struct Entry {
    identity: Identity,
    item: Arc<Mutex<CompareItem>>,
}

#[derive(Default)]
struct Registry {
    items: HashMap<ItemHandle, Entry>,
    by_identity: HashMap<Identity, ItemHandle>,
}

/// Outcome of a batch evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    /// Items evaluated (including those whose result is a failure)
    pub evaluated: usize,
    /// Evaluated items whose comparison failed
    pub failed: usize,
    /// Items left untouched because of cancellation or removal
    pub skipped: usize,
    pub cancelled: bool,
}

/// Outcome of a directory rescan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RescanSummary {
    pub added: usize,
    pub removed: usize,
    /// Surviving items with at least one side marked dirty
    pub changed: usize,
}

enum BatchOutcome {
    Done(DiffCode),
    Skipped,
}

fn lock(item: &Mutex<CompareItem>) -> Result<MutexGuard<'_, CompareItem>, TricmpError> {
    item.lock()
        .map_err(|e| TricmpError::Comparison(format!("Item lock poisoned: {}", e)))
}

/// Owns every compare item of one session; callers hold [`ItemHandle`]s
pub struct ComparisonStore {
    arity: Arity,
    engine: CompareEngine,
    vfs: Arc<dyn Vfs>,
    cache: Option<HashCache>,
    pool: Option<ThreadPool>,
    registry: RwLock<Registry>,
    next_handle: AtomicU64,
    notifier: Notifier,
}

impl ComparisonStore {
    pub fn new(arity: Arity, engine: CompareEngine) -> Self {
        Self {
            arity,
            engine,
            vfs: Arc::new(LocalVfs::unrooted()),
            cache: None,
            pool: None,
            registry: RwLock::new(Registry::default()),
            next_handle: AtomicU64::new(1),
            notifier: Notifier::default(),
        }
    }

    /// Store configured from the application config (engine options and
    /// worker pool; the fingerprint cache is attached separately)
    pub fn from_config(arity: Arity, config: &AppConfig) -> Result<Self, TricmpError> {
        let engine = CompareEngine::new(EngineOptions::from_config(config)?);
        Self::new(arity, engine).with_worker_threads(config.worker_threads)
    }

    pub fn with_vfs(mut self, vfs: Arc<dyn Vfs>) -> Self {
        self.vfs = vfs;
        self
    }

    pub fn with_cache(mut self, cache: HashCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bound batch evaluation to `threads` workers (0 = rayon's global pool)
    pub fn with_worker_threads(mut self, threads: usize) -> Result<Self, TricmpError> {
        self.pool = if threads == 0 {
            None
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("tricmp-eval-{}", i))
                .build()
                .map_err(|e| TricmpError::Config(format!("Failed to build worker pool: {}", e)))?;
            Some(pool)
        };
        Ok(self)
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn engine(&self) -> &CompareEngine {
        &self.engine
    }

    pub fn cache(&self) -> Option<&HashCache> {
        self.cache.as_ref()
    }

    fn registry(&self) -> Result<std::sync::RwLockReadGuard<'_, Registry>, TricmpError> {
        self.registry
            .read()
            .map_err(|e| TricmpError::Comparison(format!("Registry lock poisoned: {}", e)))
    }

    fn registry_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, Registry>, TricmpError> {
        self.registry
            .write()
            .map_err(|e| TricmpError::Comparison(format!("Registry lock poisoned: {}", e)))
    }

    fn item(&self, handle: ItemHandle) -> Result<Arc<Mutex<CompareItem>>, TricmpError> {
        self.registry()?
            .items
            .get(&handle)
            .map(|entry| Arc::clone(&entry.item))
            .ok_or(TricmpError::UnknownItem(handle.0))
    }

    fn register_with<F>(&self, identity: Identity, make: F) -> Result<ItemHandle, TricmpError>
    where
        F: FnOnce() -> Result<CompareItem, TricmpError>,
    {
        let mut registry = self.registry_mut()?;
        if let Some(handle) = registry.by_identity.get(&identity) {
            return Ok(*handle);
        }
        let item = make()?;
        let handle = ItemHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        registry.by_identity.insert(identity.clone(), handle);
        registry.items.insert(
            handle,
            Entry {
                identity,
                item: Arc::new(Mutex::new(item)),
            },
        );
        debug!("Registered item {}", handle);
        Ok(handle)
    }

    /// Track a path-set; returns the existing handle if already tracked
    pub fn register_paths(&self, paths: PathSet) -> Result<ItemHandle, TricmpError> {
        let arity = self.arity;
        let item_paths = paths.clone();
        self.register_with(Identity::Paths(paths), || {
            CompareItem::from_paths(arity, item_paths)
        })
    }

    /// Track `relative` under each of the directory `roots`
    pub fn register_relative(
        &self,
        roots: &[PathBuf],
        relative: &Path,
    ) -> Result<ItemHandle, TricmpError> {
        self.arity.check(roots.len())?;
        let paths = PathSet::new(roots.iter().map(|root| root.join(relative)));
        let arity = self.arity;
        let item_paths = paths.clone();
        let relative = relative.to_path_buf();
        self.register_with(Identity::Paths(paths), || {
            Ok(CompareItem::from_paths(arity, item_paths)?.with_relative_path(relative))
        })
    }

    /// Track a new in-memory buffer comparison
    pub fn register_buffers(
        &self,
        contents: Vec<Option<Vec<u8>>>,
    ) -> Result<(SessionId, ItemHandle), TricmpError> {
        let session = SessionId::new();
        let handle = self.register_session(session, contents)?;
        Ok((session, handle))
    }

    /// Track buffers under a caller-chosen session id (idempotent)
    pub fn register_session(
        &self,
        session: SessionId,
        contents: Vec<Option<Vec<u8>>>,
    ) -> Result<ItemHandle, TricmpError> {
        let arity = self.arity;
        self.register_with(Identity::Session(session), move || {
            CompareItem::from_buffers(arity, BufferSet::new(contents))
        })
    }

    pub fn find_by_paths(&self, paths: &PathSet) -> Option<ItemHandle> {
        let registry = self.registry().ok()?;
        registry
            .by_identity
            .get(&Identity::Paths(paths.clone()))
            .copied()
    }

    pub fn find_session(&self, session: SessionId) -> Option<ItemHandle> {
        let registry = self.registry().ok()?;
        registry.by_identity.get(&Identity::Session(session)).copied()
    }

    /// Destroy an item. Removing an unknown handle is a no-op.
    pub fn remove(&self, handle: ItemHandle) -> bool {
        let Ok(mut registry) = self.registry_mut() else {
            return false;
        };
        match registry.items.remove(&handle) {
            Some(entry) => {
                registry.by_identity.remove(&entry.identity);
                debug!("Removed item {}", handle);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: ItemHandle) -> bool {
        self.registry()
            .map(|r| r.items.contains_key(&handle))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.registry().map(|r| r.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every handle, in registration order
    pub fn handles(&self) -> Vec<ItemHandle> {
        let mut handles: Vec<ItemHandle> = self
            .registry()
            .map(|r| r.items.keys().copied().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    /// Directory-mode items whose relative path lies under `prefix`
    pub fn items_under(&self, prefix: &Path) -> Vec<ItemHandle> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.relative_path.as_deref().map_or(false, |p| p.starts_with(prefix)))
            .map(|s| s.handle)
            .collect()
    }

    /// Run the engine on one item and commit the result.
    ///
    /// Content failures are committed as a failed DiffCode and returned as
    /// `Ok`; only integration errors (unknown handle, side-count mismatch)
    /// are `Err`.
    pub fn evaluate(&self, handle: ItemHandle) -> Result<DiffCode, TricmpError> {
        let item = self.item(handle)?;
        let change = {
            let mut item = lock(&item)?;
            let evaluation = item.evaluate(&self.engine, self.vfs.as_ref(), self.cache.as_ref())?;
            for failure in &evaluation.failures {
                warn!("Item {}: {}", handle, failure);
            }
            let new = evaluation.code;
            let old = item.commit(evaluation);
            DiffCodeChange { handle, old, new }
        };
        self.notifier.notify(change);
        Ok(change.new)
    }

    fn run<R: Send>(&self, job: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(job),
            None => job(),
        }
    }

    /// Evaluate `handles` in parallel. Cancellation is checked before each
    /// item; items not reached keep their current state.
    pub fn evaluate_many(
        &self,
        handles: &[ItemHandle],
        cancel: Option<&AtomicBool>,
    ) -> EvaluationSummary {
        self.evaluate_many_with_progress(handles, cancel, |_| {})
    }

    /// [`ComparisonStore::evaluate_many`] reporting each finished item
    pub fn evaluate_many_with_progress<P>(
        &self,
        handles: &[ItemHandle],
        cancel: Option<&AtomicBool>,
        progress: P,
    ) -> EvaluationSummary
    where
        P: Fn(ItemHandle) + Send + Sync,
    {
        info!("Evaluating {} items", handles.len());
        let outcomes: Vec<BatchOutcome> = self.run(|| {
            handles
                .par_iter()
                .map(|handle| {
                    if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                        return BatchOutcome::Skipped;
                    }
                    let outcome = match self.evaluate(*handle) {
                        Ok(code) => BatchOutcome::Done(code),
                        Err(e) => {
                            warn!("Skipping item {}: {}", handle, e);
                            BatchOutcome::Skipped
                        }
                    };
                    progress(*handle);
                    outcome
                })
                .collect()
        });

        let mut summary = EvaluationSummary {
            cancelled: cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)),
            ..EvaluationSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                BatchOutcome::Done(code) => {
                    summary.evaluated += 1;
                    if code.is_failed() {
                        summary.failed += 1;
                    }
                }
                BatchOutcome::Skipped => summary.skipped += 1,
            }
        }
        info!(
            "Evaluated {} items ({} failed, {} skipped)",
            summary.evaluated, summary.failed, summary.skipped
        );
        summary
    }

    pub fn evaluate_all(&self, cancel: Option<&AtomicBool>) -> EvaluationSummary {
        self.evaluate_many(&self.handles(), cancel)
    }

    /// Evaluate only items that are unevaluated or stale
    pub fn evaluate_pending(&self, cancel: Option<&AtomicBool>) -> EvaluationSummary {
        let pending: Vec<ItemHandle> = self
            .snapshots()
            .into_iter()
            .filter(|s| s.state != ItemState::Evaluated)
            .map(|s| s.handle)
            .collect();
        self.evaluate_many(&pending, cancel)
    }

    /// Flag a side as changed; does not re-evaluate
    pub fn mark_dirty(&self, handle: ItemHandle, side: Side) -> Result<(), TricmpError> {
        let side = self.arity.side(side.index())?;
        let item = self.item(handle)?;
        let mut item = lock(&item)?;
        item.mark_dirty(side)
    }

    pub fn state(&self, handle: ItemHandle) -> Option<ItemState> {
        let item = self.item(handle).ok()?;
        let item = lock(&item).ok()?;
        Some(item.state())
    }

    pub fn diff_code(&self, handle: ItemHandle) -> Option<DiffCode> {
        let item = self.item(handle).ok()?;
        let item = lock(&item).ok()?;
        Some(item.code())
    }

    pub fn snapshot(&self, handle: ItemHandle) -> Option<ItemSnapshot> {
        let item = self.item(handle).ok()?;
        let item = lock(&item).ok()?;
        Some(item.snapshot(handle))
    }

    /// Snapshots of every item, ordered by relative path, then handle
    pub fn snapshots(&self) -> Vec<ItemSnapshot> {
        let mut snapshots: Vec<ItemSnapshot> = self
            .handles()
            .into_iter()
            .filter_map(|handle| self.snapshot(handle))
            .collect();
        snapshots.sort_by(|a, b| {
            a.relative_path
                .cmp(&b.relative_path)
                .then(a.handle.cmp(&b.handle))
        });
        snapshots
    }

    /// Counters for summary display
    pub fn aggregate_diff_count(&self) -> DiffCounts {
        let mut counts = DiffCounts::default();
        for snapshot in self.snapshots() {
            if snapshot.state != ItemState::Evaluated {
                counts.unevaluated += 1;
            } else if snapshot.code.is_failed() {
                counts.failed += 1;
            } else if snapshot.code.is_unique(self.arity) {
                counts.uniques += 1;
            } else if snapshot.code.is_different() {
                counts.differences += 1;
            } else {
                counts.identical += 1;
            }
        }
        counts
    }

    pub fn subscribe(&self) -> Receiver<DiffCodeChange> {
        self.notifier.subscribe()
    }

    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&DiffCodeChange) + Send + Sync + 'static,
    {
        self.notifier.on_change(callback);
    }

    fn with_buffers<F>(&self, handle: ItemHandle, dst: Side, op: F) -> Result<(), TricmpError>
    where
        F: FnOnce(&mut BufferSet) -> Result<(), TricmpError>,
    {
        let item = self.item(handle)?;
        let mut item = lock(&item)?;
        let buffers = item.buffers_mut().ok_or(TricmpError::NoBuffers(handle.0))?;
        op(buffers)?;
        item.mark_dirty(dst)
    }

    /// Copy a byte range between panes; marks `dst` dirty, never re-evaluates
    pub fn copy_selection(
        &self,
        handle: ItemHandle,
        src: Side,
        dst: Side,
        range: Range<usize>,
    ) -> Result<(), TricmpError> {
        let (src, dst) = (self.arity.side(src.index())?, self.arity.side(dst.index())?);
        self.with_buffers(handle, dst, |buffers| {
            merge_ops::copy_selection(buffers, src, dst, range)
        })
    }

    /// Copy a whole pane; marks `dst` dirty, never re-evaluates
    pub fn copy_all(&self, handle: ItemHandle, src: Side, dst: Side) -> Result<(), TricmpError> {
        let (src, dst) = (self.arity.side(src.index())?, self.arity.side(dst.index())?);
        self.with_buffers(handle, dst, |buffers| merge_ops::copy_all(buffers, src, dst))
    }

    /// Read every existing side of a path-backed item into memory so it can
    /// be edited; the item becomes stale
    pub fn load_buffers(&self, handle: ItemHandle) -> Result<(), TricmpError> {
        let item = self.item(handle)?;
        let mut item = lock(&item)?;
        let paths = item.paths().cloned().ok_or_else(|| {
            TricmpError::Comparison(format!("Item {} has no paths to load", handle))
        })?;

        let provider = FsContentProvider::new(&paths, self.vfs.as_ref());
        let loaded_at = SystemTime::now();
        let mut buffers = Vec::with_capacity(self.arity.count());
        for side in self.arity.sides() {
            if provider.exists(side) {
                let len = provider.length(side)?;
                let data = provider.read(side, 0, len as usize)?;
                let modified = provider.modified(side)?.unwrap_or(loaded_at);
                buffers.push(Some(Buffer::with_modified(data, modified)));
            } else {
                buffers.push(None);
            }
        }
        item.set_buffers(BufferSet::from_buffers(buffers))?;
        debug!("Loaded buffers for item {}", handle);
        Ok(())
    }

    /// Sides with edits not yet saved
    pub fn modified_sides(&self, handle: ItemHandle) -> Result<Vec<Side>, TricmpError> {
        let item = self.item(handle)?;
        let item = lock(&item)?;
        Ok(item
            .buffers()
            .map(BufferSet::modified_sides)
            .unwrap_or_default())
    }

    /// Write a side's buffer back to its path
    pub fn save_side(&self, handle: ItemHandle, side: Side) -> Result<(), TricmpError> {
        let side = self.arity.side(side.index())?;
        let item = self.item(handle)?;
        let mut item = lock(&item)?;
        let path = item
            .paths()
            .and_then(|paths| paths.get(side))
            .cloned()
            .ok_or_else(|| TricmpError::Path(format!("Item {} has no path for side {}", handle, side)))?;
        let buffers = item.buffers_mut().ok_or(TricmpError::NoBuffers(handle.0))?;
        let bytes = buffers.bytes(side).ok_or(TricmpError::ContentUnavailable {
            side: side.index(),
            reason: "no buffer to save".to_string(),
        })?;

        self.vfs
            .write_file(&path, bytes)
            .map_err(|e| TricmpError::ContentUnavailable {
                side: side.index(),
                reason: e.to_string(),
            })?;
        buffers.set_save_point(side);
        info!("Saved side {} of item {} to {}", side, handle, path.display());
        Ok(())
    }

    /// Scan `roots` (one per side), register every file path found on any
    /// side, drop items whose path vanished from all sides and mark sides
    /// whose size or timestamp changed as dirty
    pub fn rescan(
        &self,
        roots: &[PathBuf],
        scanner: &FolderScanner,
        cancel: Option<&AtomicBool>,
    ) -> Result<RescanSummary, TricmpError> {
        self.arity.check(roots.len())?;

        let mut found: BTreeMap<PathBuf, Vec<Option<FileEntry>>> = BTreeMap::new();
        for (index, root) in roots.iter().enumerate() {
            if !root.is_dir() {
                warn!("Root {} is not a directory; side {} is empty", root.display(), index);
                continue;
            }
            for entry in scanner.scan_with_cancel(root, cancel)? {
                if entry.is_dir {
                    continue;
                }
                let slots = found
                    .entry(entry.path.clone())
                    .or_insert_with(|| vec![None; roots.len()]);
                slots[index] = Some(entry);
            }
        }

        let mut summary = RescanSummary::default();
        let mut keep = Vec::with_capacity(found.len());
        for (relative, entries) in &found {
            let paths = PathSet::new(roots.iter().map(|root| root.join(relative)));
            let existed = self.find_by_paths(&paths).is_some();
            let handle = self.register_relative(roots, relative)?;
            keep.push(handle);
            if !existed {
                summary.added += 1;
                continue;
            }
            if self.mark_changed_sides(handle, entries)? {
                summary.changed += 1;
            }
        }

        let keep: std::collections::HashSet<ItemHandle> = keep.into_iter().collect();
        for snapshot in self.snapshots() {
            if snapshot.relative_path.is_some() && !keep.contains(&snapshot.handle) {
                self.remove(snapshot.handle);
                summary.removed += 1;
            }
        }

        info!(
            "Rescan: {} added, {} removed, {} changed",
            summary.added, summary.removed, summary.changed
        );
        Ok(summary)
    }

    fn mark_changed_sides(
        &self,
        handle: ItemHandle,
        entries: &[Option<FileEntry>],
    ) -> Result<bool, TricmpError> {
        let item = self.item(handle)?;
        let mut item = lock(&item)?;
        if item.state() == ItemState::Unevaluated {
            return Ok(false);
        }
        // Unsaved edits take precedence over whatever is on disk
        let edited = item
            .buffers()
            .map(BufferSet::modified_sides)
            .unwrap_or_default();
        let mut changed = false;
        for side in self.arity.sides() {
            if edited.contains(&side) {
                continue;
            }
            let known = &item.sides()[side.index()];
            let differs = match &entries[side.index()] {
                Some(entry) => {
                    !known.exists || known.size != entry.size || known.modified != Some(entry.modified)
                }
                None => known.exists,
            };
            if differs {
                item.mark_dirty(side)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}
