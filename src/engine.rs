//! The runner: drives an ordered list of patch units against a source tree.
//!
//! Per unit: locate → idempotency check → transforms over an in-memory copy
//! → atomic write → post-write verification. A unit either lands completely
//! in a single write or leaves the file byte-identical to before the run.
//!
//! Execution is single-threaded and blocking; the engine assumes it is the
//! only writer to the tree for the duration of a run.

use crate::config::PatchUnit;
use crate::locate;
use crate::marker;
use crate::safety::{SafetyError, TreeGuard};
use crate::transform;
use crate::verify::{self, ContextWindow};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Terminal outcome for one patch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitStatus {
    /// Transforms applied, written, and verified.
    Applied,
    /// Marker already present; nothing was touched.
    AlreadyApplied,
    /// An anchor failed to resolve in the located file. Usually means the
    /// upstream source drifted from what the unit expects.
    AnchorNotFound,
    /// The target file could not be located, read, or was ambiguous.
    TargetNotFound,
    /// Writing the mutated file failed.
    WriteError,
    /// The write reported success but the re-read shows no marker. The
    /// write path itself is suspect; more severe than a missing anchor.
    VerificationFailed,
}

impl UnitStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, UnitStatus::Applied | UnitStatus::AlreadyApplied)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Applied => "applied",
            UnitStatus::AlreadyApplied => "already applied",
            UnitStatus::AnchorNotFound => "anchor not found",
            UnitStatus::TargetNotFound => "target not found",
            UnitStatus::WriteError => "write error",
            UnitStatus::VerificationFailed => "verification failed",
        };
        f.write_str(s)
    }
}

/// Per-unit entry in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub id: String,
    pub status: UnitStatus,
    pub critical: bool,
    /// Resolved target path, when location succeeded.
    pub file: Option<PathBuf>,
    /// Human-readable cause for failures.
    pub detail: Option<String>,
    /// Audit window around the marker line, for applied units.
    pub context: Option<String>,
}

/// Aggregated outcome of a run. The sole user-visible surface of the engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub entries: Vec<UnitReport>,
    /// Id of the critical unit whose failure halted the run. Units after it
    /// were not executed and have no entries.
    pub halted_on: Option<String>,
}

impl RunReport {
    /// True when the run must surface as a process failure: it halted on a
    /// critical unit, or any critical unit ended in a failure status.
    pub fn fatal(&self) -> bool {
        self.halted_on.is_some()
            || self
                .entries
                .iter()
                .any(|e| e.critical && e.status.is_failure())
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Mutate the tree.
    Apply,
    /// Dry run: evaluate every unit fully in memory, write nothing.
    Check,
}

/// Applies patch units to one source tree.
pub struct Engine {
    guard: TreeGuard,
    window: ContextWindow,
}

impl Engine {
    pub fn new(tree_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        Ok(Self {
            guard: TreeGuard::new(tree_root)?,
            window: ContextWindow::default(),
        })
    }

    pub fn with_window(mut self, window: ContextWindow) -> Self {
        self.window = window;
        self
    }

    pub fn tree_root(&self) -> &Path {
        self.guard.tree_root()
    }

    /// Apply units in list order, mutating the tree.
    pub fn apply(&self, units: &[PatchUnit]) -> RunReport {
        self.run(units, Mode::Apply)
    }

    /// Evaluate units without writing. `Applied` means "would apply".
    pub fn check(&self, units: &[PatchUnit]) -> RunReport {
        self.run(units, Mode::Check)
    }

    fn run(&self, units: &[PatchUnit], mode: Mode) -> RunReport {
        let mut report = RunReport::default();
        for unit in units {
            let entry = self.process(unit, mode);
            let halt = unit.critical && entry.status.is_failure();
            report.entries.push(entry);
            if halt {
                report.halted_on = Some(unit.id.clone());
                break;
            }
        }
        report
    }

    fn process(&self, unit: &PatchUnit, mode: Mode) -> UnitReport {
        let fail = |status: UnitStatus, file: Option<PathBuf>, detail: String| UnitReport {
            id: unit.id.clone(),
            status,
            critical: unit.critical,
            file,
            detail: Some(detail),
            context: None,
        };

        let path = match locate::locate(self.guard.tree_root(), &unit.target) {
            Ok(path) => path,
            Err(e) => return fail(UnitStatus::TargetNotFound, None, e.to_string()),
        };
        let path = match self.guard.validate_path(&path) {
            Ok(path) => path,
            Err(e) => return fail(UnitStatus::TargetNotFound, Some(path), e.to_string()),
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                return fail(
                    UnitStatus::TargetNotFound,
                    Some(path),
                    format!("failed to read target: {e}"),
                )
            }
        };

        // Guard before any anchor work; already-applied units do no further I/O.
        if marker::is_applied(&content, &unit.id) {
            return UnitReport {
                id: unit.id.clone(),
                status: UnitStatus::AlreadyApplied,
                critical: unit.critical,
                file: Some(path),
                detail: None,
                context: None,
            };
        }

        // Fold transforms over an in-memory copy. Any failure aborts the
        // unit before anything touches the disk.
        let mut text = content;
        for (idx, t) in unit.transforms.iter().enumerate() {
            text = match transform::apply(&text, t, &unit.anchors) {
                Ok(next) => next,
                Err(e) => {
                    return fail(
                        UnitStatus::AnchorNotFound,
                        Some(path),
                        format!("transform #{idx}: {e}"),
                    )
                }
            };
        }

        if mode == Mode::Check {
            return UnitReport {
                id: unit.id.clone(),
                status: UnitStatus::Applied,
                critical: unit.critical,
                context: verify::context_from_text(&text, &unit.id, self.window),
                file: Some(path),
                detail: None,
            };
        }

        if let Err(e) = atomic_write(&path, text.as_bytes()) {
            return fail(UnitStatus::WriteError, Some(path), e.to_string());
        }

        match verify::verify(&path, &unit.id, self.window) {
            Ok(context) => UnitReport {
                id: unit.id.clone(),
                status: UnitStatus::Applied,
                critical: unit.critical,
                file: Some(path),
                detail: None,
                context: Some(context),
            },
            Err(e) => fail(UnitStatus::VerificationFailed, Some(path), e.to_string()),
        }
    }
}

/// Apply a patch set against a tree. Convenience wrapper around [`Engine`].
pub fn apply_units(tree_root: &Path, units: &[PatchUnit]) -> Result<RunReport, SafetyError> {
    Ok(Engine::new(tree_root)?.apply(units))
}

/// Dry-run a patch set against a tree.
pub fn check_units(tree_root: &Path, units: &[PatchUnit]) -> Result<RunReport, SafetyError> {
    Ok(Engine::new(tree_root)?.check(units))
}

/// Atomic file write: tempfile in the target directory + fsync + rename,
/// then an mtime bump so incremental builds rebuild the patched objects.
fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    filetime::set_file_mtime(path, filetime::FileTime::now())?;
    Ok(())
}
