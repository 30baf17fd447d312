pub mod config;
pub mod diffcode;
pub mod error;
pub mod types;
pub mod vfs;

pub use config::*;
pub use diffcode::*;
pub use error::*;
pub use types::*;
pub use vfs::*;
