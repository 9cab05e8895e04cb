//! Anchor resolution: turning a declarative pattern into concrete byte spans.
//!
//! All transforms compile down to splices over spans produced here.
//! Intelligence lives in span acquisition, not in the splice logic.

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// A resolved byte span in source text: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

impl MatchSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shift the span by a fixed offset (used when a match was found inside
    /// a region slice and must be mapped back to whole-file coordinates).
    pub fn offset(self, by: usize) -> Self {
        Self {
            start: self.start + by,
            end: self.end + by,
        }
    }
}

/// Which occurrence(s) of a pattern an anchor selects.
///
/// `Nth` is 1-based: `Nth(1)` is equivalent to `First`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Occurrence {
    #[default]
    First,
    Nth(usize),
    All,
}

/// Declarative description of where in a file an edit should land.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AnchorSpec {
    /// Exact substring search.
    Literal {
        pattern: String,
        #[serde(default)]
        occurrence: Occurrence,
    },
    /// Regular expression search. Patterns may span lines and capture
    /// groups that substitution templates reference later.
    Regex {
        pattern: String,
        #[serde(default)]
        occurrence: Occurrence,
    },
    /// The smallest span from the first `start_pattern` occurrence to the
    /// next `end_pattern` occurrence strictly after it.
    BoundedRegion {
        start_pattern: String,
        end_pattern: String,
    },
}

/// Outcome of resolving an anchor: a single span, or every matching span in
/// document order when `occurrence = "all"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    One(MatchSpan),
    Many(Vec<MatchSpan>),
}

impl Resolution {
    /// The first span regardless of variant. `Many` is never empty.
    pub fn first(&self) -> MatchSpan {
        match self {
            Resolution::One(span) => *span,
            Resolution::Many(spans) => spans[0],
        }
    }

    /// All spans in document order.
    pub fn spans(&self) -> Vec<MatchSpan> {
        match self {
            Resolution::One(span) => vec![*span],
            Resolution::Many(spans) => spans.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("pattern not found: {pattern:?}")]
    NotFound { pattern: String },

    #[error("occurrence {wanted} requested but only {found} match(es) exist for {pattern:?}")]
    OccurrenceOutOfRange {
        pattern: String,
        wanted: usize,
        found: usize,
    },

    #[error("region end {end_pattern:?} not found after start {start_pattern:?}")]
    UnterminatedRegion {
        start_pattern: String,
        end_pattern: String,
    },

    #[error("invalid regex {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Resolve an anchor against source text.
///
/// Resolution is deterministic: identical text and anchor always yield the
/// identical spans. Nothing here consults the file system, environment, or
/// clock.
pub fn resolve(text: &str, spec: &AnchorSpec) -> Result<Resolution, AnchorError> {
    match spec {
        AnchorSpec::Literal {
            pattern,
            occurrence,
        } => {
            let spans: Vec<MatchSpan> = text
                .match_indices(pattern.as_str())
                .map(|(start, m)| MatchSpan::new(start, start + m.len()))
                .collect();
            select(spans, pattern, *occurrence)
        }
        AnchorSpec::Regex {
            pattern,
            occurrence,
        } => {
            let re = compile(pattern)?;
            let spans: Vec<MatchSpan> = re
                .find_iter(text)
                .map(|m| MatchSpan::new(m.start(), m.end()))
                .collect();
            select(spans, pattern, *occurrence)
        }
        AnchorSpec::BoundedRegion {
            start_pattern,
            end_pattern,
        } => {
            let start = text
                .find(start_pattern.as_str())
                .ok_or_else(|| AnchorError::NotFound {
                    pattern: start_pattern.clone(),
                })?;
            let search_from = start + start_pattern.len();
            let end_rel = text[search_from..].find(end_pattern.as_str()).ok_or_else(|| {
                AnchorError::UnterminatedRegion {
                    start_pattern: start_pattern.clone(),
                    end_pattern: end_pattern.clone(),
                }
            })?;
            let end = search_from + end_rel + end_pattern.len();
            Ok(Resolution::One(MatchSpan::new(start, end)))
        }
    }
}

/// Compile a regex pattern, mapping errors to the anchor taxonomy.
pub fn compile(pattern: &str) -> Result<Regex, AnchorError> {
    Regex::new(pattern).map_err(|source| AnchorError::BadPattern {
        pattern: pattern.to_string(),
        source,
    })
}

fn select(
    spans: Vec<MatchSpan>,
    pattern: &str,
    occurrence: Occurrence,
) -> Result<Resolution, AnchorError> {
    if spans.is_empty() {
        return Err(AnchorError::NotFound {
            pattern: pattern.to_string(),
        });
    }
    match occurrence {
        Occurrence::First => Ok(Resolution::One(spans[0])),
        Occurrence::Nth(n) => {
            // 1-based; Nth(0) is rejected at config validation time.
            spans
                .get(n.saturating_sub(1))
                .copied()
                .map(Resolution::One)
                .ok_or_else(|| AnchorError::OccurrenceOutOfRange {
                    pattern: pattern.to_string(),
                    wanted: n,
                    found: spans.len(),
                })
        }
        Occurrence::All => Ok(Resolution::Many(spans)),
    }
}
