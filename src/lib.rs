//! Srcpatch: declarative patching for source trees.
//!
//! A reusable engine for the recurring "open file, find anchor, splice text,
//! guard with a marker" pattern. An ordered list of [`PatchUnit`]s —
//! target locator, anchors, transforms, idempotency marker — is interpreted
//! by one execution path instead of a pile of one-off scripts.
//!
//! # Architecture
//!
//! Transforms are pure functions over text; intelligence lives in anchor
//! resolution ([`anchor`]), not in the splice logic. The runner ([`engine`])
//! reads each target once, folds the unit's transforms over an in-memory
//! copy, writes once, and re-reads to verify the marker landed.
//!
//! # Safety
//!
//! - Idempotency markers short-circuit repeated runs before any mutation
//! - All-or-nothing per unit: a failed anchor means no write at all
//! - Atomic file writes (tempfile + fsync + rename)
//! - Tree boundary enforcement, including symlink escapes
//!
//! # Example
//!
//! ```no_run
//! use srcpatch::{apply_units, load_from_path};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let set = load_from_path("patches/dvfs.toml")?;
//! let report = apply_units(Path::new("/src/kernel"), &set.units)?;
//! for entry in &report.entries {
//!     println!("{}: {}", entry.id, entry.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod anchor;
pub mod config;
pub mod engine;
pub mod locate;
pub mod marker;
pub mod safety;
pub mod transform;
pub mod verify;

// Re-exports
pub use anchor::{AnchorError, AnchorSpec, MatchSpan, Occurrence, Resolution};
pub use config::{load_from_path, load_from_str, ConfigError, PatchSet, PatchUnit};
pub use engine::{apply_units, check_units, Engine, RunReport, UnitReport, UnitStatus};
pub use locate::{LocateError, TargetLocator};
pub use safety::{SafetyError, TreeGuard};
pub use transform::{Transform, TransformError};
pub use verify::{ContextWindow, VerifyError};
