//! Output events emitted by a partition.

use crate::knn::ResultSetChange;
use crate::query::{Query, QueryKey};
use crate::types::{Command, DataObject, QueryId, SourceId};
use serde::{Deserialize, Serialize};

/// Identity and sources of the query an output belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySummary {
    pub query_id: QueryId,
    pub source_id: SourceId,
    pub data_src: SourceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_src2: Option<SourceId>,
}

impl QuerySummary {
    pub fn key(&self) -> QueryKey {
        QueryKey {
            source_id: self.source_id.clone(),
            query_id: self.query_id.clone(),
        }
    }
}

impl From<&Query> for QuerySummary {
    fn from(query: &Query) -> Self {
        Self {
            query_id: query.key.query_id.clone(),
            source_id: query.key.source_id.clone(),
            data_src: query.data_src.clone(),
            data_src2: query.data_src2().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutputEvent {
    /// Range query hit
    Match {
        query: QuerySummary,
        object: DataObject,
        command: Command,
    },
    /// Join pair; `left` comes from `dataSrc`, `right` from `dataSrc2`
    JoinMatch {
        query: QuerySummary,
        left: DataObject,
        right: DataObject,
        #[serde(rename = "leftCommand")]
        left_command: Command,
        #[serde(rename = "rightCommand")]
        right_command: Command,
    },
    /// KNN result-set delta
    Change(ResultSetChange),
}

impl OutputEvent {
    pub fn range_match(query: &Query, object: DataObject) -> Self {
        let command = object.command;
        OutputEvent::Match {
            query: query.into(),
            object,
            command,
        }
    }

    pub fn join_match(query: &Query, left: DataObject, right: DataObject) -> Self {
        let (left_command, right_command) = (left.command, right.command);
        OutputEvent::JoinMatch {
            query: query.into(),
            left,
            right,
            left_command,
            right_command,
        }
    }

    pub fn query_key(&self) -> QueryKey {
        match self {
            OutputEvent::Match { query, .. } | OutputEvent::JoinMatch { query, .. } => query.key(),
            OutputEvent::Change(change) => change.query.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knn::ChangeKind;
    use crate::types::{Point, TokenSet};

    #[test]
    fn events_serialize_with_event_tag() {
        let object = DataObject::new(
            "o",
            Point::new(1.0, 2.0),
            TokenSet::from_text("a"),
            3,
            Command::Add,
            "s",
        );
        let event = OutputEvent::Change(ResultSetChange {
            kind: ChangeKind::Remove,
            object,
            query: QueryKey::new("u", "q"),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "change");
        assert_eq!(json["kind"], "remove");
        assert_eq!(json["object"]["objectId"], "o");
        assert_eq!(json["query"]["queryId"], "q");
        assert_eq!(event.query_key(), QueryKey::new("u", "q"));
    }
}
