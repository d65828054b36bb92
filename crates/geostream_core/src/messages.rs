//! Wire messages and the in-cluster partition message.
//!
//! Inbound traffic is JSON with camelCase field names. [`DataObjectMessage`]
//! and [`QueryMessage`] mirror the wire shape with every optional field left
//! optional; conversion into domain types validates what each query type
//! requires.

use crate::error::MessageError;
use crate::partition::CellReassignment;
use crate::predicate::TextPredicate;
use crate::query::{JoinSide, Query, QueryCommand, QueryKey, QueryShape, QueryType};
use crate::types::{Command, DataObject, PartitionId, Point, Rectangle, TokenSet};
use serde::{Deserialize, Serialize};

/// Text as it appears on the wire: a token list or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextField {
    Tokens(Vec<String>),
    Text(String),
}

impl Default for TextField {
    fn default() -> Self {
        TextField::Tokens(Vec::new())
    }
}

impl From<TextField> for TokenSet {
    fn from(field: TextField) -> Self {
        match field {
            TextField::Tokens(tokens) => tokens.into_iter().collect(),
            TextField::Text(text) => TokenSet::from_text(&text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataObjectMessage {
    pub object_id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub text: TextField,
    #[serde(default)]
    pub timestamp: u64,
    pub command: Command,
    pub source_id: String,
}

impl TryFrom<DataObjectMessage> for DataObject {
    type Error = MessageError;

    fn try_from(message: DataObjectMessage) -> Result<Self, Self::Error> {
        if message.object_id.is_empty() {
            return Err(MessageError::missing("objectId", "data object"));
        }
        if !message.x.is_finite() || !message.y.is_finite() {
            return Err(MessageError::Invalid(format!(
                "object {} has non-finite location ({}, {})",
                message.object_id, message.x, message.y
            )));
        }
        Ok(DataObject::new(
            message.object_id,
            Point::new(message.x, message.y),
            message.text.into(),
            message.timestamp,
            message.command,
            message.source_id,
        ))
    }
}

impl From<&DataObject> for DataObjectMessage {
    fn from(object: &DataObject) -> Self {
        Self {
            object_id: object.object_id.to_string(),
            x: object.location.x,
            y: object.location.y,
            text: TextField::Tokens(object.text.tokens().iter().map(|t| t.to_string()).collect()),
            timestamp: object.timestamp,
            command: object.command,
            source_id: object.source_id.to_string(),
        }
    }
}

fn default_continuous() -> bool {
    true
}

/// Flat wire form of a query. Type-specific fields are optional here and
/// checked during conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMessage {
    pub query_id: String,
    pub source_id: String,
    pub query_type: Option<QueryType>,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub command: QueryCommand,
    pub data_src: Option<String>,
    pub data_src2: Option<String>,
    pub text_predicate: Option<TextPredicate>,
    pub text_predicate2: Option<TextPredicate>,
    pub join_textual_predicate: Option<TextPredicate>,
    pub query_text: Option<TextField>,
    pub query_text2: Option<TextField>,
    pub k: Option<usize>,
    pub focal_x: Option<f64>,
    pub focal_y: Option<f64>,
    pub x_min: Option<f64>,
    pub y_min: Option<f64>,
    pub x_max: Option<f64>,
    pub y_max: Option<f64>,
    pub join_distance: Option<f64>,
    #[serde(default = "default_continuous")]
    pub continuous: bool,
}

/// Empty query text turns any predicate into match-all.
fn predicate_and_text(
    predicate: Option<TextPredicate>,
    text: Option<TextField>,
) -> (TextPredicate, TokenSet) {
    let text: TokenSet = text.map(TokenSet::from).unwrap_or_default();
    if text.is_empty() {
        return (TextPredicate::None, text);
    }
    (predicate.unwrap_or_default(), text)
}

impl QueryMessage {
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.source_id.as_str(), self.query_id.as_str())
    }

    fn rectangle(&self, context: &'static str) -> Result<Rectangle, MessageError> {
        let x_min = self.x_min.ok_or(MessageError::missing("xMin", context))?;
        let y_min = self.y_min.ok_or(MessageError::missing("yMin", context))?;
        let x_max = self.x_max.ok_or(MessageError::missing("xMax", context))?;
        let y_max = self.y_max.ok_or(MessageError::missing("yMax", context))?;
        if !(x_min <= x_max && y_min <= y_max) {
            return Err(MessageError::Invalid(format!(
                "query {} has an empty rectangle [{x_min}, {y_min}] - [{x_max}, {y_max}]",
                self.query_id
            )));
        }
        Ok(Rectangle::new(Point::new(x_min, y_min), Point::new(x_max, y_max)))
    }

    fn shape(&mut self, query_type: QueryType) -> Result<QueryShape, MessageError> {
        match query_type {
            QueryType::Range => Ok(QueryShape::Range {
                range: self.rectangle("range query")?,
            }),
            QueryType::Knn => {
                let k = self.k.ok_or(MessageError::missing("k", "knn query"))?;
                if k == 0 {
                    return Err(MessageError::Invalid(format!("query {} has k = 0", self.query_id)));
                }
                let x = self.focal_x.ok_or(MessageError::missing("focalX", "knn query"))?;
                let y = self.focal_y.ok_or(MessageError::missing("focalY", "knn query"))?;
                Ok(QueryShape::Knn {
                    focal: Point::new(x, y),
                    k,
                })
            }
            QueryType::SpatialJoin => {
                let range = self.rectangle("join query")?;
                let data_src = self
                    .data_src2
                    .take()
                    .ok_or(MessageError::missing("dataSrc2", "join query"))?;
                let distance = self
                    .join_distance
                    .ok_or(MessageError::missing("joinDistance", "join query"))?;
                if !(distance.is_finite() && distance >= 0.0) {
                    return Err(MessageError::Invalid(format!(
                        "query {} has join distance {distance}",
                        self.query_id
                    )));
                }
                let (predicate, text) =
                    predicate_and_text(self.text_predicate2, self.query_text2.take());
                Ok(QueryShape::SpatialJoin {
                    range,
                    other: JoinSide {
                        data_src: data_src.into(),
                        predicate,
                        text,
                    },
                    join_predicate: self.join_textual_predicate.unwrap_or_default(),
                    distance,
                })
            }
        }
    }
}

impl TryFrom<QueryMessage> for Query {
    type Error = MessageError;

    fn try_from(mut message: QueryMessage) -> Result<Self, Self::Error> {
        if message.query_id.is_empty() {
            return Err(MessageError::missing("queryId", "query"));
        }
        let query_type = message
            .query_type
            .ok_or(MessageError::missing("queryType", "query"))?;
        let data_src = message
            .data_src
            .take()
            .ok_or(MessageError::missing("dataSrc", "query"))?;
        let shape = message.shape(query_type)?;
        let (predicate, text) =
            predicate_and_text(message.text_predicate, message.query_text.take());

        Ok(Query {
            key: message.key(),
            timestamp: message.timestamp,
            command: message.command,
            data_src: data_src.into(),
            predicate,
            text,
            shape,
            continuous: message.continuous,
        })
    }
}

/// Where a data object entered the partition from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataOrigin {
    /// Straight from a data source, routed by location
    Source,
    /// Propagated by a peer partition for the reciprocal join comparison
    Neighbour(PartitionId),
}

/// Unit of work delivered to a partition.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionMessage {
    Data { object: DataObject, origin: DataOrigin },
    Query(Query),
    DropQuery(QueryKey),
    Control(CellReassignment),
}

impl PartitionMessage {
    pub fn from_source(object: DataObject) -> Self {
        PartitionMessage::Data {
            object,
            origin: DataOrigin::Source,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PartitionMessage::Data { origin: DataOrigin::Source, .. } => "data",
            PartitionMessage::Data { .. } => "neighbour-data",
            PartitionMessage::Query(_) => "query",
            PartitionMessage::DropQuery(_) => "drop-query",
            PartitionMessage::Control(_) => "control",
        }
    }
}

impl TryFrom<QueryMessage> for PartitionMessage {
    type Error = MessageError;

    /// Drops only need the query identity; everything else is validated.
    fn try_from(message: QueryMessage) -> Result<Self, Self::Error> {
        if message.command == QueryCommand::Drop {
            if message.query_id.is_empty() {
                return Err(MessageError::missing("queryId", "query drop"));
            }
            return Ok(PartitionMessage::DropQuery(message.key()));
        }
        Ok(PartitionMessage::Query(Query::try_from(message)?))
    }
}

/// One line of the input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundEnvelope {
    Data(DataObjectMessage),
    Query(QueryMessage),
    Control(CellReassignment),
}

impl InboundEnvelope {
    pub fn parse(line: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(line)?)
    }
}
