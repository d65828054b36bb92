//! Textual and spatial predicate evaluation.
//!
//! Every other component funnels its matching decisions through here so that
//! range checks, KNN ranking and join thresholds agree on boundaries.

use crate::types::{Point, Rectangle, TokenSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Combinator applied between object text and query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TextPredicate {
    /// Every query token must appear in the object text.
    And,
    /// At least one query token must appear in the object text.
    Or,
    /// Always matches.
    #[default]
    None,
}

impl TextPredicate {
    /// Evaluates the predicate with `object_text` on the object side and
    /// `query_text` on the query side.
    pub fn evaluate(self, object_text: &TokenSet, query_text: &TokenSet) -> bool {
        match self {
            TextPredicate::None => true,
            TextPredicate::And => contains_all(object_text, query_text),
            TextPredicate::Or => shares_any(object_text, query_text),
        }
    }
}

/// Linear merge: is every token of `required` present in `available`?
fn contains_all(available: &TokenSet, required: &TokenSet) -> bool {
    let mut available = available.tokens().iter().peekable();
    'required: for token in required.tokens() {
        while let Some(candidate) = available.peek() {
            match candidate.as_str().cmp(token.as_str()) {
                Ordering::Less => {
                    available.next();
                }
                Ordering::Equal => {
                    available.next();
                    continue 'required;
                }
                Ordering::Greater => return false,
            }
        }
        return false;
    }
    true
}

/// Linear merge: do the two sets share at least one token?
fn shares_any(left: &TokenSet, right: &TokenSet) -> bool {
    let (left, right) = (left.tokens(), right.tokens());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].as_str().cmp(right[j].as_str()) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => return true,
        }
    }
    false
}

impl Rectangle {
    /// Boundary-inclusive point containment.
    pub fn contains_point(&self, point: &Point) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Boundary-inclusive rectangle overlap; touching edges intersect.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// Shortest distance from `point` to any point of the rectangle; zero
    /// inside or on the boundary.
    pub fn min_distance(&self, point: &Point) -> f64 {
        let dx = (self.min.x - point.x).max(point.x - self.max.x).max(0.0);
        let dy = (self.min.y - point.y).max(point.y - self.max.y).max(0.0);
        dx.hypot(dy)
    }
}

/// Inclusive distance threshold shared by KNN and join evaluation.
pub fn within_distance(a: &Point, b: &Point, threshold: f64) -> bool {
    a.distance(b) <= threshold
}
