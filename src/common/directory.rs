use std::path::{Path, PathBuf};

/// List files in `dir` accepted by `filter`, sorted by path.
///
/// A missing directory yields an empty list; an unreadable one is an error.
pub async fn list_files(dir: &Path, filter: impl Fn(&Path) -> bool) -> crate::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.exists() {
        return Ok(files);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| crate::Error::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| crate::Error::io(dir, e))?
    {
        let path = entry.path();
        if path.is_file() && filter(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

pub fn is_block_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}
