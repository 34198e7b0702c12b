//! In-memory snapshot of a codebase keyed by relative path.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::path::{Component, Path};

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer, Serialize};

/// Ordered mapping of relative path to file content.
///
/// Paths are validated on insertion: they must be relative, non-empty and free of
/// `..` components. Iteration is lexicographic by path, which keeps uploads, logs
/// and serialized snapshots stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

/// Raised when a FileSet is executed without its entrypoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("file set has no entrypoint {entrypoint}")]
pub struct MissingEntrypointError {
    pub entrypoint: String,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a FileSet from `(path, content)` pairs, validating every path.
    pub fn from_pairs<I, P, C>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut files = Self::new();
        for (path, content) in pairs {
            files.insert(path, content)?;
        }
        Ok(files)
    }

    /// Insert or replace a file. Returns the previous content, if any.
    pub fn insert(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Option<String>> {
        let path = normalize_path(&path.into())?;
        Ok(self.files.insert(path, content.into()))
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.files.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Combine two snapshots; files in `other` replace files with the same path.
    pub fn merged(&self, other: &FileSet) -> FileSet {
        let mut files = self.files.clone();
        for (path, content) in &other.files {
            files.insert(path.clone(), content.clone());
        }
        FileSet { files }
    }

    /// Error unless `entrypoint` is present.
    pub fn require(&self, entrypoint: &str) -> Result<()> {
        if !self.contains(entrypoint) {
            return Err(MissingEntrypointError {
                entrypoint: entrypoint.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

impl<'de> Deserialize<'de> for FileSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        FileSet::from_pairs(raw).map_err(serde::de::Error::custom)
    }
}

/// Validate a relative path and normalize separators to `/`.
fn normalize_path(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_start_matches("./");
    if trimmed.is_empty() {
        bail!("file path must be non-empty");
    }
    let path = Path::new(trimmed);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => bail!("file path {raw} must not contain '..'"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("file path {raw} must be relative")
            }
        }
    }
    if parts.is_empty() {
        bail!("file path {raw} must name a file");
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_is_sorted_by_path() {
        let files = FileSet::from_pairs([("src/b.py", "b"), ("run.sh", "sh"), ("src/a.py", "a")])
            .expect("files");
        let paths: Vec<&str> = files.paths().collect();
        assert_eq!(paths, vec!["run.sh", "src/a.py", "src/b.py"]);
    }

    #[test]
    fn rejects_absolute_and_parent_paths() {
        let mut files = FileSet::new();
        assert!(files.insert("/etc/passwd", "x").is_err());
        assert!(files.insert("src/../../escape", "x").is_err());
        assert!(files.insert("", "x").is_err());
        assert!(files.is_empty());
    }

    #[test]
    fn normalizes_current_dir_and_backslashes() {
        let mut files = FileSet::new();
        files.insert("./src\\main.py", "print()").expect("insert");
        assert!(files.contains("src/main.py"));
    }

    #[test]
    fn merged_prefers_right_side() {
        let generated =
            FileSet::from_pairs([("main.py", "v1"), ("run.sh", "old")]).expect("generated");
        let entrypoint = FileSet::from_pairs([("run.sh", "python main.py")]).expect("entrypoint");
        let merged = generated.merged(&entrypoint);
        assert_eq!(merged.get("run.sh"), Some("python main.py"));
        assert_eq!(merged.get("main.py"), Some("v1"));
        assert_eq!(generated.get("run.sh"), Some("old"));
    }

    #[test]
    fn remove_returns_previous_content() {
        let mut files = FileSet::from_pairs([("healer.toml", "x"), ("run.sh", "y")]).expect("files");
        assert_eq!(files.remove("healer.toml").as_deref(), Some("x"));
        assert_eq!(files.remove("healer.toml"), None);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn require_reports_missing_entrypoint() {
        let files = FileSet::from_pairs([("main.py", "print()")]).expect("files");
        let err = files.require("run.sh").unwrap_err();
        let missing = err
            .downcast_ref::<MissingEntrypointError>()
            .expect("typed error");
        assert_eq!(missing.entrypoint, "run.sh");
        assert_eq!(err.to_string(), "file set has no entrypoint run.sh");
    }

    #[test]
    fn deserialize_validates_paths() {
        let ok: FileSet = serde_json::from_str(r#"{"run.sh":"echo hi"}"#).expect("parse");
        assert_eq!(ok.get("run.sh"), Some("echo hi"));
        let bad = serde_json::from_str::<FileSet>(r#"{"../x":"y"}"#);
        assert!(bad.is_err());
    }
}
