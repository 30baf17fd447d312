use crate::{Result, TricmpError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

/// Represents a file or directory entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
}

/// Metadata for a file or directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub modified: SystemTime,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Number of panes taking part in a comparison. Fixed per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arity {
    Two,
    Three,
}

impl Arity {
    pub fn from_count(count: usize) -> Result<Self> {
        match count {
            2 => Ok(Arity::Two),
            3 => Ok(Arity::Three),
            other => Err(TricmpError::InconsistentSideCount {
                expected: 2,
                actual: other,
            }),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Arity::Two => 2,
            Arity::Three => 3,
        }
    }

    /// Validate a pane index against this arity
    pub fn side(&self, index: usize) -> Result<Side> {
        if index < self.count() {
            Ok(Side(index as u8))
        } else {
            Err(TricmpError::InvalidSide(format!(
                "pane {} out of range for {} panes",
                index,
                self.count()
            )))
        }
    }

    /// Rightmost pane
    pub fn last(&self) -> Side {
        Side(self.count() as u8 - 1)
    }

    pub fn sides(&self) -> impl Iterator<Item = Side> {
        (0..self.count() as u8).map(Side)
    }

    /// Fail with `InconsistentSideCount` unless `actual` matches this arity
    pub fn check(&self, actual: usize) -> Result<()> {
        if actual == self.count() {
            Ok(())
        } else {
            Err(TricmpError::InconsistentSideCount {
                expected: self.count(),
                actual,
            })
        }
    }
}

/// Pane index (0 = leftmost)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Side(u8);

impl Side {
    pub const FIRST: Side = Side(0);
    pub const SECOND: Side = Side(1);
    pub const THIRD: Side = Side(2);

    /// Largest pane count any comparison uses
    pub const MAX: usize = 3;

    /// Pane index without an arity at hand; only `0..Side::MAX` is valid
    pub fn from_index(index: usize) -> Option<Side> {
        (index < Self::MAX).then(|| Side(index as u8))
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub(crate) fn bit(&self) -> u8 {
        1 << self.0
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One path per side, in pane order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSet(pub Vec<PathBuf>);

impl PathSet {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self(paths.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, side: Side) -> Option<&PathBuf> {
        self.0.get(side.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.0.iter()
    }
}

/// Opaque handle to an item held by a comparison store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemHandle(pub u64);

impl fmt::Display for ItemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-side metadata of a comparable item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideData {
    pub exists: bool,
    /// Byte length of the side's content
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub binary: bool,
    /// Set after an external mutation, cleared by a successful evaluation
    pub dirty: bool,
    /// Digest of the leading sample; cleared at the start of each evaluation
    pub partial_hash: Option<Blake3Hash>,
}

/// Policy deciding what drives the SAME/DIFF decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMethod {
    /// Compare file content byte-by-byte (or line-by-line with text options)
    #[default]
    ByContent,
    BySize,
    ByDate,
    BySizeAndDate,
}

impl CompareMethod {
    pub fn reads_content(&self) -> bool {
        matches!(self, CompareMethod::ByContent)
    }
}

/// Whitespace handling options for line comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WhitespaceMode {
    /// Compare whitespace exactly
    #[default]
    Exact,
    /// Ignore all whitespace
    IgnoreAll,
    /// Ignore changes in amount of whitespace
    IgnoreChanges,
}

/// Normalization applied to text content before line comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCompareOptions {
    /// Treat CRLF, CR and LF line endings as equal
    #[serde(default)]
    pub ignore_eol: bool,

    #[serde(default)]
    pub ignore_case: bool,

    #[serde(default)]
    pub whitespace: WhitespaceMode,

    /// Regular expressions; matching lines are skipped on every side
    #[serde(default)]
    pub line_filters: Vec<String>,
}

/// Aggregate counters over a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffCounts {
    /// Evaluated items present on all sides with differing content
    pub differences: usize,
    /// Evaluated items present on fewer than all sides
    pub uniques: usize,
    /// Evaluated items present on all sides with identical content
    pub identical: usize,
    /// Items whose comparison failed
    pub failed: usize,
    /// Items never evaluated or stale
    pub unevaluated: usize,
}

impl DiffCounts {
    pub fn pair(&self) -> (usize, usize) {
        (self.differences, self.uniques)
    }

    pub fn total(&self) -> usize {
        self.differences + self.uniques + self.identical + self.failed + self.unevaluated
    }
}

/// Cache key for file hashing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

fn default_sample_size() -> usize {
    8 * 1024
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ignore patterns (e.g., "*.o", "node_modules/")
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Whether to follow symbolic links
    #[serde(default)]
    pub follow_symlinks: bool,

    /// What drives the SAME/DIFF decision
    #[serde(default)]
    pub compare_method: CompareMethod,

    /// Text normalization for line comparison
    #[serde(default)]
    pub text: TextCompareOptions,

    /// Bytes sampled from the head of each side for binary detection
    #[serde(default = "default_sample_size")]
    pub binary_sample_size: usize,

    /// Timestamps closer than this compare equal in date modes
    #[serde(default)]
    pub time_tolerance_secs: u64,

    /// Evaluation worker threads (0 = one per core)
    #[serde(default)]
    pub worker_threads: usize,

    /// Use the persistent BLAKE3 cache for full-content fingerprints
    #[serde(default)]
    pub use_hash_cache: bool,

    /// Cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: Vec::new(),
            follow_symlinks: false,
            compare_method: CompareMethod::default(),
            text: TextCompareOptions::default(),
            binary_sample_size: default_sample_size(),
            time_tolerance_secs: 0,
            worker_threads: 0,
            use_hash_cache: false,
            cache_dir: None,
            portable_mode: false,
        }
    }
}

/// Identifier for an in-memory buffer comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// BLAKE3 hash value (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Blake3Hash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}
