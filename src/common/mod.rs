mod cache;
mod directory;
mod source_type;

use std::path::PathBuf;

pub use cache::{CacheStats, VersionedCache};
pub(crate) use directory::{is_block_file, list_files};
pub use source_type::SourceType;

pub(crate) fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().to_path_buf())
}
