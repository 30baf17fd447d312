use crate::content::{BufferSet, ContentProvider, FsContentProvider};
use crate::engine::{CompareEngine, Evaluation};
use crate::hash_cache::HashCache;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tricmp_common::{
    Arity, DiffCode, ItemHandle, PathSet, Side, SideData, TricmpError, Vfs,
};

/// Lifecycle of an item between evaluations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ItemState {
    /// Never evaluated
    Unevaluated,
    /// DiffCode reflects current content
    Evaluated,
    /// At least one side changed since the last evaluation
    Stale,
}

/// One comparable unit: N sides, their metadata and the composite result
#[derive(Debug, Clone)]
pub struct CompareItem {
    arity: Arity,
    paths: Option<PathSet>,
    relative_path: Option<PathBuf>,
    buffers: Option<BufferSet>,
    sides: Vec<SideData>,
    code: DiffCode,
}

impl CompareItem {
    /// Item backed by one path per side
    pub fn from_paths(arity: Arity, paths: PathSet) -> Result<Self, TricmpError> {
        arity.check(paths.len())?;
        Ok(Self::empty(arity, Some(paths), None))
    }

    /// Item backed by in-memory buffers
    pub fn from_buffers(arity: Arity, buffers: BufferSet) -> Result<Self, TricmpError> {
        arity.check(buffers.side_count())?;
        Ok(Self::empty(arity, None, Some(buffers)))
    }

    fn empty(arity: Arity, paths: Option<PathSet>, buffers: Option<BufferSet>) -> Self {
        Self {
            arity,
            paths,
            relative_path: None,
            buffers,
            sides: vec![SideData::default(); arity.count()],
            code: DiffCode::new(),
        }
    }

    pub fn with_relative_path(mut self, relative: PathBuf) -> Self {
        self.relative_path = Some(relative);
        self
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn code(&self) -> DiffCode {
        self.code
    }

    pub fn sides(&self) -> &[SideData] {
        &self.sides
    }

    pub fn side(&self, side: Side) -> Option<&SideData> {
        self.sides.get(side.index())
    }

    pub fn paths(&self) -> Option<&PathSet> {
        self.paths.as_ref()
    }

    pub fn relative_path(&self) -> Option<&Path> {
        self.relative_path.as_deref()
    }

    pub fn buffers(&self) -> Option<&BufferSet> {
        self.buffers.as_ref()
    }

    pub(crate) fn buffers_mut(&mut self) -> Option<&mut BufferSet> {
        self.buffers.as_mut()
    }

    pub(crate) fn set_buffers(&mut self, buffers: BufferSet) -> Result<(), TricmpError> {
        self.arity.check(buffers.side_count())?;
        self.buffers = Some(buffers);
        self.mark_all_dirty();
        Ok(())
    }

    pub fn state(&self) -> ItemState {
        if !self.code.is_evaluated() {
            ItemState::Unevaluated
        } else if self.is_dirty() {
            ItemState::Stale
        } else {
            ItemState::Evaluated
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.sides.iter().any(|s| s.dirty)
    }

    pub fn mark_dirty(&mut self, side: Side) -> Result<(), TricmpError> {
        let index = self.arity.side(side.index())?.index();
        self.sides[index].dirty = true;
        Ok(())
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        for side in &mut self.sides {
            side.dirty = true;
        }
    }

    /// Run the engine over this item's content without committing anything
    pub fn evaluate(
        &self,
        engine: &CompareEngine,
        vfs: &dyn Vfs,
        cache: Option<&HashCache>,
    ) -> Result<Evaluation, TricmpError> {
        if let Some(buffers) = &self.buffers {
            return engine.evaluate(self.arity, self.code, buffers as &dyn ContentProvider);
        }
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| TricmpError::Comparison("item has neither paths nor buffers".into()))?;
        let mut provider = FsContentProvider::new(paths, vfs);
        if let Some(cache) = cache {
            provider = provider.with_cache(cache);
        }
        engine.evaluate(self.arity, self.code, &provider)
    }

    /// Install an evaluation result; returns the previous DiffCode.
    /// Clears every dirty flag.
    pub fn commit(&mut self, evaluation: Evaluation) -> DiffCode {
        let previous = self.code;
        self.code = evaluation.code;
        self.sides = evaluation.sides;
        for side in &mut self.sides {
            side.dirty = false;
        }
        previous
    }

    pub fn snapshot(&self, handle: ItemHandle) -> ItemSnapshot {
        ItemSnapshot {
            handle,
            state: self.state(),
            code: self.code,
            sides: self.sides.clone(),
            paths: self.paths.clone(),
            relative_path: self.relative_path.clone(),
            has_buffers: self.buffers.is_some(),
        }
    }
}

/// Read-only view of an item handed to rendering/reporting collaborators
#[derive(Debug, Clone, Serialize)]
pub struct ItemSnapshot {
    pub handle: ItemHandle,
    pub state: ItemState,
    pub code: DiffCode,
    pub sides: Vec<SideData>,
    pub paths: Option<PathSet>,
    pub relative_path: Option<PathBuf>,
    pub has_buffers: bool,
}
