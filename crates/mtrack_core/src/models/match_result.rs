//! Region matching results.

use serde::{Deserialize, Serialize};

use super::geometry::{Point, Rect};

/// Which matching strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategyKind {
    Template,
    Feature,
}

impl MatchStrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            MatchStrategyKind::Template => "template",
            MatchStrategyKind::Feature => "feature",
        }
    }
}

/// Outcome of locating one object in a target frame.
///
/// A rejected match has no geometry and no `method_used`, but still carries
/// the best score seen so callers can report it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub object_name: String,
    pub matched_point: Option<Point>,
    pub matched_rectangle: Option<Rect>,
    pub confidence: f64,
    pub method_used: Option<MatchStrategyKind>,
}

impl MatchResult {
    pub fn rejected(object_name: impl Into<String>, best_score: f64) -> Self {
        Self {
            object_name: object_name.into(),
            matched_point: None,
            matched_rectangle: None,
            confidence: best_score,
            method_used: None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.method_used.is_some()
            && (self.matched_point.is_some() || self.matched_rectangle.is_some())
    }
}
