//! Tree boundary checks to keep writes inside the source tree being patched.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Confines every write to the canonicalized tree root.
///
/// Discovery can resolve through symlinks, so the located target is
/// canonicalized and re-checked before the engine writes anything. `.git`
/// and the `out` build directory are never patch targets.
#[derive(Debug, Clone)]
pub struct TreeGuard {
    tree_root: PathBuf,
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path is outside the source tree: {path} (tree: {tree})")]
    OutsideTree { path: PathBuf, tree: PathBuf },

    #[error("path is in a forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl TreeGuard {
    pub fn new(tree_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let tree_root = tree_root.as_ref().canonicalize()?;

        let mut forbidden_paths = Vec::new();
        for name in [".git", "out"] {
            if let Ok(dir) = tree_root.join(name).canonicalize() {
                forbidden_paths.push(dir);
            }
        }

        Ok(Self {
            tree_root,
            forbidden_paths,
        })
    }

    /// Check that a located target is safe to patch.
    ///
    /// Returns the canonicalized absolute path. Symlinks that resolve
    /// outside the tree are rejected here.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.tree_root.join(path)
        };
        let canonical = absolute.canonicalize()?;

        if !canonical.starts_with(&self.tree_root) {
            return Err(SafetyError::OutsideTree {
                path: canonical,
                tree: self.tree_root.clone(),
            });
        }
        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical,
                    forbidden: forbidden.clone(),
                });
            }
        }
        Ok(canonical)
    }

    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }
}
