//! Post-apply verification: re-read the file and audit the patched region.
//!
//! A write that reports success but leaves no marker behind means the write
//! path itself is broken, which is why this failure is kept distinct from
//! (and treated as more severe than) a missing anchor.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How many lines of context to capture around the marker line.
///
/// Defaults mirror the audit printout the engine replaces: two lines above
/// the marker and twelve below, enough to show a whole injected block.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ContextWindow {
    pub before: usize,
    pub after: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            before: 2,
            after: 12,
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("failed to re-read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("marker {id:?} absent from {path}")]
    MarkerMissing { path: PathBuf, id: String },
}

/// Re-read `path` from disk and confirm the marker for `id` is present.
///
/// Returns a numbered context snippet around the first marker line, with a
/// `->` pointer on every line that carries the marker.
pub fn verify(path: &Path, id: &str, window: ContextWindow) -> Result<String, VerifyError> {
    let text = fs::read_to_string(path).map_err(|source| VerifyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    context_from_text(&text, id, window).ok_or_else(|| VerifyError::MarkerMissing {
        path: path.to_path_buf(),
        id: id.to_string(),
    })
}

/// Extract the audit window around the first line containing `id`, or
/// `None` when the marker is absent.
pub fn context_from_text(text: &str, id: &str, window: ContextWindow) -> Option<String> {
    if id.is_empty() {
        return None;
    }
    let lines: Vec<&str> = text.lines().collect();
    let marker_idx = lines.iter().position(|line| line.contains(id))?;

    let start = marker_idx.saturating_sub(window.before);
    let end = (marker_idx + window.after + 1).min(lines.len());

    let mut out = String::new();
    for (i, line) in lines[start..end].iter().enumerate() {
        let lineno = start + i + 1;
        let pointer = if line.contains(id) { "->" } else { "  " };
        out.push_str(&format!("{pointer} [{lineno:04}] {line}\n"));
    }
    Some(out)
}
