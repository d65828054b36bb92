//! Query definitions.
//!
//! A [`Query`] carries the parts every query type shares (identity, data
//! source, primary text predicate) and a [`QueryShape`] with the parts that
//! differ between range, KNN and spatial-join queries.

use crate::predicate::TextPredicate;
use crate::types::{Point, QueryId, Rectangle, SourceId, TokenSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique query identity: the query source plus its query id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryKey {
    pub source_id: SourceId,
    pub query_id: QueryId,
}

impl QueryKey {
    pub fn new(source_id: impl Into<SourceId>, query_id: impl Into<QueryId>) -> Self {
        Self {
            source_id: source_id.into(),
            query_id: query_id.into(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.query_id)
    }
}

/// Discriminant of a query's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    Range,
    Knn,
    SpatialJoin,
}

/// Lifecycle command carried by a query message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryCommand {
    #[default]
    Add,
    Update,
    Drop,
}

/// Second side of a spatial-textual join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSide {
    pub data_src: SourceId,
    pub predicate: TextPredicate,
    pub text: TokenSet,
}

/// Type-specific query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryShape {
    Range {
        range: Rectangle,
    },
    Knn {
        focal: Point,
        k: usize,
    },
    SpatialJoin {
        range: Rectangle,
        other: JoinSide,
        join_predicate: TextPredicate,
        distance: f64,
    },
}

/// A registered spatio-textual query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub key: QueryKey,
    pub timestamp: u64,
    pub command: QueryCommand,
    pub data_src: SourceId,
    pub predicate: TextPredicate,
    pub text: TokenSet,
    pub shape: QueryShape,
    pub continuous: bool,
}

impl Query {
    pub fn query_type(&self) -> QueryType {
        match self.shape {
            QueryShape::Range { .. } => QueryType::Range,
            QueryShape::Knn { .. } => QueryType::Knn,
            QueryShape::SpatialJoin { .. } => QueryType::SpatialJoin,
        }
    }

    /// Spatial extent the query constrains, if any. KNN queries have none.
    pub fn spatial_range(&self) -> Option<&Rectangle> {
        match &self.shape {
            QueryShape::Range { range } | QueryShape::SpatialJoin { range, .. } => Some(range),
            QueryShape::Knn { .. } => None,
        }
    }

    /// Evaluates the primary text predicate against an object's text.
    pub fn matches_text(&self, object_text: &TokenSet) -> bool {
        self.predicate.evaluate(object_text, &self.text)
    }

    /// Second data source of a join query.
    pub fn data_src2(&self) -> Option<&SourceId> {
        match &self.shape {
            QueryShape::SpatialJoin { other, .. } => Some(&other.data_src),
            _ => None,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Query[{} {:?}", self.key, self.query_type())?;
        match &self.shape {
            QueryShape::Range { range } => write!(f, " range={range}")?,
            QueryShape::Knn { focal, k } => write!(f, " focal={focal} k={k}")?,
            QueryShape::SpatialJoin { range, other, distance, .. } => {
                write!(f, " range={range} with={} distance={distance}", other.data_src)?
            }
        }
        write!(f, "]")
    }
}
