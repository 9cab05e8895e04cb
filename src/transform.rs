//! Pure text transforms: the patch applier.
//!
//! Every transform is a function from text to text. No I/O happens here;
//! the runner reads the file once, folds the unit's transforms over an
//! in-memory copy, and writes the merged result once. If any transform
//! fails, nothing is written.

use crate::anchor::{self, AnchorError, AnchorSpec, MatchSpan, Occurrence};
use serde::Deserialize;
use thiserror::Error;

/// One edit step of a patch unit.
///
/// Transforms reference the unit's anchors by index. `scope` names a
/// bounded-region anchor that confines the edit: matches outside the region
/// are never touched.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Transform {
    /// Splice `payload` in at the start of the line holding the anchor, so
    /// injected blocks land on their own lines and never corrupt a line.
    InsertBefore { anchor: usize, payload: String },
    /// Splice `payload` in after the line holding the end of the anchor.
    InsertAfter { anchor: usize, payload: String },
    /// Replace the anchor's matched span with `payload`. With `scope`, only
    /// the first match inside the region is replaced.
    ReplaceSpan {
        anchor: usize,
        payload: String,
        #[serde(default)]
        scope: Option<usize>,
    },
    /// Regex substitution using the anchor's pattern and a replacement
    /// template with `$n` back-references to captured groups.
    RegexSubstitute {
        anchor: usize,
        template: String,
        #[serde(default)]
        scope: Option<usize>,
    },
    /// Concatenate `payload` at end of file. Needs no anchor.
    AppendToFile { payload: String },
}

impl Transform {
    /// The text this transform injects (replacement template for regex
    /// substitution). The idempotency marker must live in here for the
    /// first transform of a unit.
    pub fn payload(&self) -> &str {
        match self {
            Transform::InsertBefore { payload, .. }
            | Transform::InsertAfter { payload, .. }
            | Transform::ReplaceSpan { payload, .. }
            | Transform::AppendToFile { payload } => payload,
            Transform::RegexSubstitute { template, .. } => template,
        }
    }

    /// The anchor index this transform resolves, if any.
    pub fn anchor_index(&self) -> Option<usize> {
        match self {
            Transform::InsertBefore { anchor, .. }
            | Transform::InsertAfter { anchor, .. }
            | Transform::ReplaceSpan { anchor, .. }
            | Transform::RegexSubstitute { anchor, .. } => Some(*anchor),
            Transform::AppendToFile { .. } => None,
        }
    }

    /// The scope index this transform is confined to, if any.
    pub fn scope_index(&self) -> Option<usize> {
        match self {
            Transform::ReplaceSpan { scope, .. } | Transform::RegexSubstitute { scope, .. } => {
                *scope
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("transform references anchor #{index} but the unit declares {count} anchor(s)")]
    AnchorIndexOutOfRange { index: usize, count: usize },

    #[error("scope anchor #{index} is not a bounded-region anchor")]
    ScopeNotRegion { index: usize },

    #[error("regex-substitute anchor #{index} is not a regex anchor")]
    AnchorNotRegex { index: usize },

    #[error(transparent)]
    Anchor(#[from] AnchorError),
}

/// Apply one transform to `text`, resolving its anchor(s) against the
/// current state of the text.
pub fn apply(
    text: &str,
    transform: &Transform,
    anchors: &[AnchorSpec],
) -> Result<String, TransformError> {
    match transform {
        Transform::InsertBefore { anchor, payload } => {
            let spans = resolve_spans(text, anchors, *anchor)?;
            let block = line_block(payload);
            let mut out = text.to_string();
            for span in spans.iter().rev() {
                let at = line_start(text, span.start);
                out.replace_range(at..at, &block);
            }
            Ok(out)
        }
        Transform::InsertAfter { anchor, payload } => {
            let spans = resolve_spans(text, anchors, *anchor)?;
            let block = line_block(payload);
            let mut out = text.to_string();
            for span in spans.iter().rev() {
                match line_end(text, span.end) {
                    Some(at) => out.replace_range(at..at, &block),
                    None => {
                        // Anchor line is the last line and lacks a newline.
                        out.push('\n');
                        out.push_str(&block);
                    }
                }
            }
            Ok(out)
        }
        Transform::ReplaceSpan {
            anchor,
            payload,
            scope,
        } => match scope {
            None => {
                let spans = resolve_spans(text, anchors, *anchor)?;
                let mut out = text.to_string();
                for span in spans.iter().rev() {
                    out.replace_range(span.start..span.end, payload);
                }
                Ok(out)
            }
            Some(scope_idx) => {
                let region = resolve_region(text, anchors, *scope_idx)?;
                let inner = &text[region.start..region.end];
                // Only the first match inside the region is replaced;
                // identical text elsewhere in the file stays untouched.
                let span = anchor::resolve(inner, anchor_at(anchors, *anchor)?)?
                    .first()
                    .offset(region.start);
                let mut out = text.to_string();
                out.replace_range(span.start..span.end, payload);
                Ok(out)
            }
        },
        Transform::RegexSubstitute {
            anchor,
            template,
            scope,
        } => {
            let spec = anchor_at(anchors, *anchor)?;
            let (pattern, occurrence) = match spec {
                AnchorSpec::Regex {
                    pattern,
                    occurrence,
                } => (pattern, *occurrence),
                _ => return Err(TransformError::AnchorNotRegex { index: *anchor }),
            };
            let region = match scope {
                Some(scope_idx) => resolve_region(text, anchors, *scope_idx)?,
                None => MatchSpan::new(0, text.len()),
            };
            let inner = &text[region.start..region.end];
            let replaced = substitute(inner, pattern, template, occurrence)?;
            let mut out = String::with_capacity(text.len() + replaced.len() - inner.len());
            out.push_str(&text[..region.start]);
            out.push_str(&replaced);
            out.push_str(&text[region.end..]);
            Ok(out)
        }
        Transform::AppendToFile { payload } => {
            let mut out = text.to_string();
            out.push_str(payload);
            Ok(out)
        }
    }
}

/// Regex substitution over `text`, honoring the anchor's occurrence policy.
fn substitute(
    text: &str,
    pattern: &str,
    template: &str,
    occurrence: Occurrence,
) -> Result<String, TransformError> {
    let re = anchor::compile(pattern)?;
    if !re.is_match(text) {
        return Err(TransformError::Anchor(AnchorError::NotFound {
            pattern: pattern.to_string(),
        }));
    }
    match occurrence {
        Occurrence::First => Ok(re.replacen(text, 1, template).into_owned()),
        Occurrence::All => Ok(re.replace_all(text, template).into_owned()),
        Occurrence::Nth(n) => {
            let caps = re
                .captures_iter(text)
                .nth(n.saturating_sub(1))
                .ok_or_else(|| {
                    let found = re.find_iter(text).count();
                    AnchorError::OccurrenceOutOfRange {
                        pattern: pattern.to_string(),
                        wanted: n,
                        found,
                    }
                })?;
            let whole = caps.get(0).expect("capture 0 always exists");
            let mut expanded = String::new();
            caps.expand(template, &mut expanded);
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..whole.start()]);
            out.push_str(&expanded);
            out.push_str(&text[whole.end()..]);
            Ok(out)
        }
    }
}

fn anchor_at(anchors: &[AnchorSpec], index: usize) -> Result<&AnchorSpec, TransformError> {
    anchors
        .get(index)
        .ok_or(TransformError::AnchorIndexOutOfRange {
            index,
            count: anchors.len(),
        })
}

fn resolve_spans(
    text: &str,
    anchors: &[AnchorSpec],
    index: usize,
) -> Result<Vec<MatchSpan>, TransformError> {
    Ok(anchor::resolve(text, anchor_at(anchors, index)?)?.spans())
}

fn resolve_region(
    text: &str,
    anchors: &[AnchorSpec],
    index: usize,
) -> Result<MatchSpan, TransformError> {
    let spec = anchor_at(anchors, index)?;
    if !matches!(spec, AnchorSpec::BoundedRegion { .. }) {
        return Err(TransformError::ScopeNotRegion { index });
    }
    Ok(anchor::resolve(text, spec)?.first())
}

/// Byte offset of the start of the line containing `pos`.
fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Byte offset just past the newline of the line containing `pos`, or
/// `None` when the line is unterminated.
fn line_end(text: &str, pos: usize) -> Option<usize> {
    text[pos..].find('\n').map(|i| pos + i + 1)
}

/// Ensure a payload splices in as whole lines.
fn line_block(payload: &str) -> String {
    if payload.ends_with('\n') {
        payload.to_string()
    } else {
        format!("{payload}\n")
    }
}
