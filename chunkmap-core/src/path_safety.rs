use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Maps a chunk label to the file holding that chunk's bytes.
pub trait ChunkResolver: Sync {
    fn resolve(&self, label: &str) -> Result<PathBuf>;
}

impl<F> ChunkResolver for F
where
    F: Fn(&str) -> PathBuf + Sync,
{
    fn resolve(&self, label: &str) -> Result<PathBuf> {
        Ok(self(label))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Chunk files named `<label>` inside one directory.
#[derive(Clone, Debug)]
pub struct ChunkDir {
    root: PathBuf,
    policy: PathPolicy,
}

impl ChunkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), policy: PathPolicy::default() }
    }

    pub fn with_policy(mut self, policy: PathPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChunkResolver for ChunkDir {
    fn resolve(&self, label: &str) -> Result<PathBuf> {
        validate_label_path(&self.root, label, self.policy)
    }
}

/// Ensure `label` names a single plain file directly under `root`: no
/// absolute paths, no separators, no `..`, and no symlink unless the policy
/// follows them (in which case the target must still sit under `root`).
pub fn validate_label_path(root: &Path, label: &str, policy: PathPolicy) -> Result<PathBuf> {
    let rel = Path::new(label);
    let mut comps = rel.components();
    let single_normal =
        matches!(comps.next(), Some(Component::Normal(_))) && comps.next().is_none();
    let has_separator = label.contains(|c: char| c == '/' || c == '\\');
    if label.is_empty() || rel.is_absolute() || !single_normal || has_separator {
        return Err(Error::UnsafeLabel(label.to_string()));
    }
    let candidate = root.join(rel);
    let is_symlink = std::fs::symlink_metadata(&candidate)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if !is_symlink {
        return Ok(candidate);
    }
    if !policy.follow_symlinks {
        return Err(Error::UnsafeLabel(format!("{label} (symlink, not following)")));
    }
    let root_can = std::fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
    let cand_can = std::fs::canonicalize(&candidate).map_err(|e| Error::unreadable(&candidate, e))?;
    if !cand_can.starts_with(&root_can) {
        return Err(Error::UnsafeLabel(format!("{label} (escapes chunk directory)")));
    }
    Ok(cand_can)
}
