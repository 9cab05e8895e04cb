//! Idempotency guard: marker-presence detection.
//!
//! Each patch unit embeds its id as a grep-able string in the text it
//! injects. Before any anchor resolution or mutation, the runner asks this
//! module whether the marker is already present; if so, the unit
//! short-circuits as already applied.
//!
//! The check is intentionally coarse: it cannot distinguish a partial prior
//! application from a complete one. Config validation therefore requires the
//! marker to be carried by the *first* transform of a unit, so an
//! interrupted run is still detected on retry.

use crate::transform::Transform;

/// Has the unit identified by `id` already been applied to `text`?
pub fn is_applied(text: &str, id: &str) -> bool {
    !id.is_empty() && text.contains(id)
}

/// Does the first transform of a unit embed the marker `id`?
///
/// Used by config validation to enforce the marker-first discipline.
pub fn first_transform_carries_marker(transforms: &[Transform], id: &str) -> bool {
    match transforms.first() {
        Some(t) => t.payload().contains(id),
        None => false,
    }
}
