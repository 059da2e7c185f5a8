use std::path::{Path, PathBuf};

pub mod analyze;
pub mod import;
pub mod invoice;
pub mod status;

pub fn resolve_db_path(cache_root: &Path, db_path: &Option<PathBuf>) -> PathBuf {
    db_path
        .clone()
        .unwrap_or_else(|| cache_root.join("royalty_ingest.sqlite"))
}
