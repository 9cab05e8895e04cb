//! Target location: resolving a patch unit to exactly one file in the tree.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// How a patch unit names its target file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TargetLocator {
    /// Exact path, relative to the tree root.
    Path { path: String },
    /// Walk the tree for a file with the exact `filename` whose directory
    /// path contains every substring in `path_contains`. Used for
    /// vendor-specific driver files whose directory layout varies by
    /// revision (e.g. `mali_bifrost` + `mali-r25p0`).
    Discover {
        path_contains: Vec<String>,
        filename: String,
    },
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("target file not found: {path}")]
    Missing { path: PathBuf },

    #[error("no file named {filename:?} under {root} with path containing {predicates:?}")]
    NoMatch {
        root: PathBuf,
        filename: String,
        predicates: Vec<String>,
    },

    #[error("ambiguous target: both {first} and {second} match {filename:?} under {root}")]
    Ambiguous {
        root: PathBuf,
        filename: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed to walk {root}: {source}")]
    Walk {
        root: PathBuf,
        source: walkdir::Error,
    },
}

/// Resolve a locator to exactly one file under `root`.
///
/// Discovery walks in sorted order so the outcome never depends on
/// file-system enumeration order, and an ambiguous tree (two qualifying
/// files) is an error rather than an arbitrary pick. The walk stops as soon
/// as a second candidate is seen.
pub fn locate(root: &Path, locator: &TargetLocator) -> Result<PathBuf, LocateError> {
    match locator {
        TargetLocator::Path { path } => {
            let full = root.join(path);
            if full.is_file() {
                Ok(full)
            } else {
                Err(LocateError::Missing { path: full })
            }
        }
        TargetLocator::Discover {
            path_contains,
            filename,
        } => {
            let mut found: Option<PathBuf> = None;
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(|source| LocateError::Walk {
                    root: root.to_path_buf(),
                    source,
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.file_name().to_str() != Some(filename.as_str()) {
                    continue;
                }
                let dir = entry.path().parent().unwrap_or(root).to_string_lossy();
                if !path_contains.iter().all(|needle| dir.contains(needle)) {
                    continue;
                }
                match found {
                    None => found = Some(entry.path().to_path_buf()),
                    Some(first) => {
                        return Err(LocateError::Ambiguous {
                            root: root.to_path_buf(),
                            filename: filename.clone(),
                            first,
                            second: entry.path().to_path_buf(),
                        })
                    }
                }
            }
            found.ok_or_else(|| LocateError::NoMatch {
                root: root.to_path_buf(),
                filename: filename.clone(),
                predicates: path_contains.clone(),
            })
        }
    }
}
