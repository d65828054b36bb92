//! # Core Type Definitions
//!
//! Geometry, identifiers and the data objects that flow through every
//! partition.
//!
//! ## Key Types
//!
//! - [`Point`] / [`Rectangle`] - closed, axis-aligned 2D geometry
//! - [`ObjectId`] / [`QueryId`] / [`SourceId`] - string identifiers wrapped
//!   for type safety
//! - [`TokenSet`] - sorted, de-duplicated text tokens
//! - [`DataObject`] - one geotagged, text-tagged stream object

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an evaluator partition (one worker task).
pub type PartitionId = u32;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub CompactString);

        impl $name {
            pub fn new(value: impl AsRef<str>) -> Self {
                Self(CompactString::new(value.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(CompactString::from(value))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_id!(
    /// Identifier of a data object, unique within its source.
    ObjectId
);
string_id!(
    /// Identifier of a query, unique within its query source.
    QueryId
);
string_id!(
    /// Name of a data or query source stream.
    SourceId
);

/// A real-valued 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned rectangle, closed on both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rectangle {
    pub min: Point,
    pub max: Point,
}

impl Rectangle {
    pub const fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Zero-area rectangle covering a single point.
    pub const fn from_point(point: Point) -> Self {
        Self { min: point, max: point }
    }

    /// Square of half-side `radius` centred on `center`.
    pub fn around(center: Point, radius: f64) -> Self {
        Self {
            min: Point::new(center.x - radius, center.y - radius),
            max: Point::new(center.x + radius, center.y + radius),
        }
    }

    /// Overlapping part of two rectangles, if they intersect.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rectangle {
            min: Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        })
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} - {}]", self.min, self.max)
    }
}

/// Lifecycle command carried by a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Add,
    Update,
    Drop,
    UpdateDrop,
}

impl Command {
    /// Drop and UpdateDrop both retract an object.
    pub fn is_removal(self) -> bool {
        matches!(self, Command::Drop | Command::UpdateDrop)
    }

    /// Add and Update both (re)insert an object.
    pub fn is_insertion(self) -> bool {
        matches!(self, Command::Add | Command::Update)
    }
}

/// Ordered, de-duplicated set of text tokens.
///
/// Tokens are kept sorted so that predicate evaluation is a single linear
/// merge over both sides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<CompactString>", into = "Vec<CompactString>")]
pub struct TokenSet(Vec<CompactString>);

impl TokenSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Splits free text on whitespace and commas.
    pub fn from_text(text: &str) -> Self {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(CompactString::from)
            .collect()
    }

    pub fn tokens(&self) -> &[CompactString] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0
            .binary_search_by(|probe| probe.as_str().cmp(token))
            .is_ok()
    }
}

impl<T: AsRef<str>> FromIterator<T> for TokenSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut tokens: Vec<CompactString> = iter
            .into_iter()
            .map(|token| CompactString::new(token.as_ref().trim().to_lowercase()))
            .filter(|token| !token.is_empty())
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        Self(tokens)
    }
}

impl From<Vec<CompactString>> for TokenSet {
    fn from(tokens: Vec<CompactString>) -> Self {
        tokens.into_iter().collect()
    }
}

impl From<TokenSet> for Vec<CompactString> {
    fn from(set: TokenSet) -> Self {
        set.0
    }
}

/// A geotagged, text-tagged object from a data source.
///
/// Partitions never share an instance; every hop works on its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataObject {
    pub object_id: ObjectId,
    pub location: Point,
    pub text: TokenSet,
    pub timestamp: u64,
    pub command: Command,
    pub source_id: SourceId,
}

impl DataObject {
    pub fn new(
        object_id: impl Into<ObjectId>,
        location: Point,
        text: TokenSet,
        timestamp: u64,
        command: Command,
        source_id: impl Into<SourceId>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            location,
            text,
            timestamp,
            command,
            source_id: source_id.into(),
        }
    }

    /// Same identity and same location.
    pub fn same_location(&self, other: &DataObject) -> bool {
        self.object_id == other.object_id && self.location == other.location
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_is_sorted_and_deduplicated() {
        let set = TokenSet::from_text("pizza, Coffee  pizza bar");
        let tokens: Vec<&str> = set.tokens().iter().map(|t| t.as_str()).collect();
        assert_eq!(tokens, vec!["bar", "coffee", "pizza"]);
        assert!(set.contains("coffee"));
        assert!(!set.contains("tea"));
    }

    #[test]
    fn rectangle_intersection_clips_to_overlap() {
        let a = Rectangle::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let b = Rectangle::around(Point::new(9.0, 9.0), 2.0);
        let clipped = a.intersection(&b).expect("rectangles overlap");
        assert_eq!(clipped.min, Point::new(7.0, 7.0));
        assert_eq!(clipped.max, Point::new(10.0, 10.0));

        let far = Rectangle::around(Point::new(50.0, 50.0), 1.0);
        assert!(a.intersection(&far).is_none());
    }

    #[test]
    fn command_classification() {
        assert!(Command::Drop.is_removal());
        assert!(Command::UpdateDrop.is_removal());
        assert!(Command::Update.is_insertion());
        assert!(!Command::Add.is_removal());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ObjectId::new("obj-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"obj-7\"");
        assert_eq!(id.to_string(), "obj-7");
    }
}
