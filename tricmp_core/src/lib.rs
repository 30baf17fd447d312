pub mod content;
pub mod engine;
pub mod hash_cache;
pub mod item;
pub mod merge_ops;
pub mod scanner;
pub mod store;
pub mod vfs;

pub use content::{Buffer, BufferSet, ContentProvider, FsContentProvider};
pub use engine::{looks_binary, CompareEngine, EngineOptions, Evaluation, TextRules};
pub use hash_cache::HashCache;
pub use item::{CompareItem, ItemSnapshot, ItemState};
pub use merge_ops::PaneMove;
pub use scanner::FolderScanner;
pub use store::{ComparisonStore, DiffCodeChange, EvaluationSummary, Identity, RescanSummary};
pub use vfs::LocalVfs;
