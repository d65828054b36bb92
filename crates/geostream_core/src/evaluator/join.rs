//! Symmetric spatial-textual join.
//!
//! An object that falls inside the query rectangle and passes its own side's
//! predicate is probed against the stored objects of the other side. The
//! same object is propagated to the partitions around it so the reciprocal
//! probe runs where the other side's objects are stored.

use super::output::OutputEvent;
use super::store::ObjectStore;
use crate::predicate::{within_distance, TextPredicate};
use crate::query::{JoinSide, Query, QueryShape};
use crate::types::{DataObject, Point, Rectangle, SourceId};

/// Which of the two joined sources an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// `dataSrc`
    Left,
    /// `dataSrc2`
    Right,
}

impl Side {
    fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Borrowed view of a spatial-join query.
#[derive(Debug, Clone, Copy)]
pub struct JoinSpec<'q> {
    query: &'q Query,
    range: &'q Rectangle,
    other: &'q JoinSide,
    join_predicate: TextPredicate,
    distance: f64,
}

impl<'q> JoinSpec<'q> {
    pub fn of(query: &'q Query) -> Option<Self> {
        match &query.shape {
            QueryShape::SpatialJoin {
                range,
                other,
                join_predicate,
                distance,
            } => Some(Self {
                query,
                range,
                other,
                join_predicate: *join_predicate,
                distance: *distance,
            }),
            _ => None,
        }
    }

    fn source(&self, side: Side) -> &SourceId {
        match side {
            Side::Left => &self.query.data_src,
            Side::Right => &self.other.data_src,
        }
    }

    fn side_of(&self, object: &DataObject) -> Option<Side> {
        if object.source_id == self.query.data_src {
            Some(Side::Left)
        } else if object.source_id == self.other.data_src {
            Some(Side::Right)
        } else {
            None
        }
    }

    fn passes_side(&self, side: Side, object: &DataObject) -> bool {
        match side {
            Side::Left => self.query.matches_text(&object.text),
            Side::Right => self.other.predicate.evaluate(&object.text, &self.other.text),
        }
    }

    /// Side of `object` if it lies in the rectangle and passes that side's
    /// predicate. Such an object is eligible for propagation.
    pub fn eligible_side(&self, object: &DataObject) -> Option<Side> {
        if !self.range.contains_point(&object.location) {
            return None;
        }
        let side = self.side_of(object)?;
        self.passes_side(side, object).then_some(side)
    }

    /// Area in which a partner of `object` may lie.
    pub fn neighbourhood(&self, object: &DataObject) -> Option<Rectangle> {
        Rectangle::around(object.location, self.distance).intersection(self.range)
    }

    /// Area around `anchor`, the last stored location of a removed object,
    /// whose owners may hold a propagated copy of it. Text is not checked
    /// since removals usually carry none.
    pub fn retraction_area(&self, object: &DataObject, anchor: Point) -> Option<Rectangle> {
        self.side_of(object)?;
        if !self.range.contains_point(&anchor) {
            return None;
        }
        Rectangle::around(anchor, self.distance).intersection(self.range)
    }

    /// Does `candidate` on the opposite side complete a pair with `object`?
    fn pairs_with(&self, object: &DataObject, side: Side, candidate: &DataObject) -> bool {
        let candidate_side = side.opposite();
        if candidate.source_id != *self.source(candidate_side) {
            return false;
        }
        if candidate.source_id == object.source_id && candidate.object_id == object.object_id {
            return false;
        }
        let (left, right) = match side {
            Side::Left => (object, candidate),
            Side::Right => (candidate, object),
        };
        self.join_predicate.evaluate(&left.text, &right.text)
            && self.passes_side(candidate_side, candidate)
            && within_distance(&object.location, &candidate.location, self.distance)
            && self.range.contains_point(&candidate.location)
    }

    fn output(&self, object: &DataObject, side: Side, candidate: &DataObject) -> OutputEvent {
        match side {
            Side::Left => OutputEvent::join_match(self.query, object.clone(), candidate.clone()),
            Side::Right => OutputEvent::join_match(self.query, candidate.clone(), object.clone()),
        }
    }

    /// One output per stored partner of `object`.
    pub fn probe(&self, object: &DataObject, side: Side, store: &ObjectStore) -> Vec<OutputEvent> {
        store
            .within_distance(object.location, self.distance)
            .filter(|candidate| self.pairs_with(object, side, candidate))
            .map(|candidate| self.output(object, side, candidate))
            .collect()
    }

    /// Every pair whose left object is held in `owned`, with partners from
    /// `owned` or `peers`.
    pub fn snapshot(&self, owned: &ObjectStore, peers: &ObjectStore) -> Vec<OutputEvent> {
        let mut outputs = Vec::new();
        for object in owned.in_rectangle(*self.range) {
            if self.side_of(object) != Some(Side::Left) || !self.passes_side(Side::Left, object) {
                continue;
            }
            outputs.extend(self.probe(object, Side::Left, owned));
            outputs.extend(self.probe(object, Side::Left, peers));
        }
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryKey;
    use crate::types::{Command, Point, TokenSet};

    fn join_query(join_predicate: TextPredicate) -> Query {
        Query {
            key: QueryKey::new("u", "join"),
            timestamp: 0,
            command: Default::default(),
            data_src: "x".into(),
            predicate: TextPredicate::Or,
            text: TokenSet::from_text("pizza"),
            shape: QueryShape::SpatialJoin {
                range: Rectangle::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0)),
                other: JoinSide {
                    data_src: "y".into(),
                    predicate: TextPredicate::None,
                    text: TokenSet::new(),
                },
                join_predicate,
                distance: 5.0,
            },
            continuous: true,
        }
    }

    fn object(id: &str, source: &str, x: f64, y: f64, text: &str) -> DataObject {
        DataObject::new(id, Point::new(x, y), TokenSet::from_text(text), 1, Command::Add, source)
    }

    #[test]
    fn eligibility_requires_range_and_side_predicate() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        assert_eq!(join.eligible_side(&object("1", "x", 1.0, 1.0, "pizza")), Some(Side::Left));
        assert_eq!(join.eligible_side(&object("1", "x", 1.0, 1.0, "sushi")), None);
        assert_eq!(join.eligible_side(&object("1", "x", 11.0, 1.0, "pizza")), None);
        assert_eq!(join.eligible_side(&object("2", "y", 1.0, 1.0, "")), Some(Side::Right));
        assert_eq!(join.eligible_side(&object("3", "z", 1.0, 1.0, "pizza")), None);
    }

    #[test]
    fn probe_pairs_objects_with_partners_from_the_other_side() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        let mut store = ObjectStore::new(10);
        store.upsert(object("y1", "y", 3.0, 3.0, "bar"));
        store.upsert(object("y2", "y", 9.0, 9.0, "bar"));
        store.upsert(object("x2", "x", 1.5, 1.5, "pizza"));

        let x1 = object("x1", "x", 1.0, 1.0, "pizza");
        let outputs = join.probe(&x1, Side::Left, &store);
        assert_eq!(outputs.len(), 1);
        let OutputEvent::JoinMatch { left, right, .. } = &outputs[0] else {
            panic!("expected join match");
        };
        assert_eq!(left.object_id.as_str(), "x1");
        assert_eq!(right.object_id.as_str(), "y1");
    }

    #[test]
    fn right_side_arrival_keeps_left_right_orientation() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        let mut store = ObjectStore::new(10);
        store.upsert(object("x1", "x", 1.0, 1.0, "pizza"));
        store.upsert(object("x2", "x", 1.0, 2.0, "sushi"));

        let outputs = join.probe(&object("y1", "y", 3.0, 3.0, ""), Side::Right, &store);
        assert_eq!(outputs.len(), 1);
        let OutputEvent::JoinMatch { left, right, .. } = &outputs[0] else {
            panic!("expected join match");
        };
        assert_eq!(left.object_id.as_str(), "x1");
        assert_eq!(right.object_id.as_str(), "y1");
    }

    #[test]
    fn join_predicate_relates_left_and_right_text() {
        let query = join_query(TextPredicate::And);
        let join = JoinSpec::of(&query).unwrap();
        let mut store = ObjectStore::new(10);
        store.upsert(object("y1", "y", 2.0, 2.0, "pizza"));
        store.upsert(object("y2", "y", 2.0, 1.0, "pizza beer"));

        let x1 = object("x1", "x", 1.0, 1.0, "pizza cheap");
        let outputs = join.probe(&x1, Side::Left, &store);
        assert_eq!(outputs.len(), 1);
        assert!(matches!(
            &outputs[0],
            OutputEvent::JoinMatch { right, .. } if right.object_id.as_str() == "y1"
        ));
    }

    #[test]
    fn neighbourhood_is_clipped_to_the_rectangle() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        let area = join.neighbourhood(&object("x", "x", 8.0, 1.0, "pizza")).unwrap();
        assert_eq!(area.min, Point::new(3.0, 0.0));
        assert_eq!(area.max, Point::new(10.0, 6.0));
    }

    #[test]
    fn retraction_area_follows_the_stored_location() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        let mut removal = object("x", "x", 0.0, 0.0, "");
        removal.command = Command::Drop;

        let area = join.retraction_area(&removal, Point::new(8.0, 1.0)).unwrap();
        assert_eq!(area, join.neighbourhood(&object("x", "x", 8.0, 1.0, "pizza")).unwrap());
        assert!(join.retraction_area(&removal, Point::new(12.0, 1.0)).is_none());
        let unjoined = object("z", "z", 1.0, 1.0, "");
        assert!(join.retraction_area(&unjoined, Point::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn snapshot_reports_pairs_owned_on_the_left() {
        let query = join_query(TextPredicate::None);
        let join = JoinSpec::of(&query).unwrap();
        let mut owned = ObjectStore::new(10);
        owned.upsert(object("x1", "x", 1.0, 1.0, "pizza"));
        owned.upsert(object("y1", "y", 2.0, 2.0, ""));
        let mut peers = ObjectStore::new(10);
        peers.upsert(object("y2", "y", 4.0, 1.0, ""));
        peers.upsert(object("x9", "x", 1.0, 2.0, "pizza"));

        let outputs = join.snapshot(&owned, &peers);
        let mut partners: Vec<_> = outputs
            .iter()
            .filter_map(|event| match event {
                OutputEvent::JoinMatch { left, right, .. } => {
                    Some((left.object_id.to_string(), right.object_id.to_string()))
                }
                _ => None,
            })
            .collect();
        partners.sort();
        assert_eq!(
            partners,
            vec![("x1".to_string(), "y1".to_string()), ("x1".to_string(), "y2".to_string())]
        );
    }
}
