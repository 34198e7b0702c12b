//! Load and store [`FileSet`] snapshots on disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::files::FileSet;

/// Directory names never read into a snapshot.
pub const IGNORED_DIRS: &[&str] = &[".git", ".healer"];

/// Read every UTF-8 file under `root` into a FileSet.
///
/// `.git` and the healer state directory are skipped. Non-UTF-8 files are skipped
/// with a warning; generated programs are text.
pub fn load_dir(root: &Path) -> Result<FileSet> {
    let mut files = FileSet::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| IGNORED_DIRS.contains(&name))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .with_context(|| format!("relativize {}", path.display()))?;
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        match String::from_utf8(bytes) {
            Ok(content) => {
                files.insert(rel.to_string_lossy(), content)?;
            }
            Err(_) => warn!(path = %path.display(), "skipping non-utf8 file"),
        }
    }
    debug!(root = %root.display(), files = files.len(), "loaded file set");
    Ok(files)
}

/// Write every file of `files` under `root`, creating parent directories.
pub fn write_dir(root: &Path, files: &FileSet) -> Result<()> {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    }
    debug!(root = %root.display(), files = files.len(), "wrote file set");
    Ok(())
}
