//! # Continuous KNN State
//!
//! Incremental top-k maintenance for one query. Members sit in a bounded
//! max-heap keyed on distance to the focal point, so the current farthest
//! member is always at the top and can be evicted in `O(log k)`.
//!
//! After every structural change the heap is drained in distance order,
//! ranks `1..=n` are reassigned and the new `{rank, snapshot}` maps are
//! diffed against the previous ones to produce [`ResultSetChange`] events:
//! removals first (in their old rank order), then additions and moves in
//! their new rank order. A member whose identity and location are unchanged
//! produces no event even when its rank shifts.

use crate::predicate::TextPredicate;
use crate::query::{Query, QueryKey, QueryShape};
use crate::types::{Command, DataObject, ObjectId, Point, TokenSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tracing::trace;

/// Kind of delta in a continuous query's result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// One delta of a KNN result set. Produced and emitted, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSetChange {
    pub kind: ChangeKind,
    pub object: DataObject,
    pub query: QueryKey,
}

/// Lifecycle phase of a KNN query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnnPhase {
    Empty,
    Filling,
    Saturated,
}

#[derive(Debug, Clone)]
struct HeapEntry {
    distance: f64,
    /// Insertion order; among equal distances the newest member is evicted first
    seq: u64,
    object: DataObject,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Mutable top-k state of one continuous KNN query.
#[derive(Debug, Clone)]
pub struct KnnState {
    key: QueryKey,
    focal: Point,
    k: usize,
    predicate: TextPredicate,
    text: TokenSet,
    /// Reported while fewer than `k` members are held
    sentinel: f64,
    heap: BinaryHeap<HeapEntry>,
    ranks: HashMap<ObjectId, usize>,
    snapshots: HashMap<ObjectId, DataObject>,
    farthest: f64,
    next_seq: u64,
}

impl KnnState {
    pub fn new(
        key: QueryKey,
        focal: Point,
        k: usize,
        predicate: TextPredicate,
        text: TokenSet,
        sentinel: f64,
    ) -> Self {
        Self {
            key,
            focal,
            k,
            predicate,
            text,
            sentinel,
            heap: BinaryHeap::with_capacity(k),
            ranks: HashMap::new(),
            snapshots: HashMap::new(),
            farthest: sentinel,
            next_seq: 0,
        }
    }

    /// Fresh state for a KNN query, `None` for other query types.
    pub fn for_query(query: &Query, sentinel: f64) -> Option<Self> {
        match query.shape {
            QueryShape::Knn { focal, k } => Some(Self::new(
                query.key.clone(),
                focal,
                k,
                query.predicate,
                query.text.clone(),
                sentinel,
            )),
            _ => None,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn farthest_distance(&self) -> f64 {
        self.farthest
    }

    pub fn phase(&self) -> KnnPhase {
        match self.heap.len() {
            0 => KnnPhase::Empty,
            n if n < self.k => KnnPhase::Filling,
            _ => KnnPhase::Saturated,
        }
    }

    pub fn rank_of(&self, object_id: &ObjectId) -> Option<usize> {
        self.ranks.get(object_id).copied()
    }

    pub fn snapshot_of(&self, object_id: &ObjectId) -> Option<&DataObject> {
        self.snapshots.get(object_id)
    }

    /// Current members, nearest first.
    pub fn members(&self) -> Vec<&DataObject> {
        let mut members: Vec<_> = self.snapshots.values().collect();
        members.sort_by_key(|object| {
            self.ranks
                .get(&object.object_id)
                .copied()
                .unwrap_or(usize::MAX)
        });
        members
    }

    /// Feeds one object and returns the resulting result-set deltas.
    pub fn process(&mut self, object: &DataObject) -> Vec<ResultSetChange> {
        if self.k == 0 {
            return Vec::new();
        }

        let text_match = self.predicate.evaluate(&object.text, &self.text);
        let tracked = self
            .snapshots
            .get(&object.object_id)
            .map(|stored| (stored.location, stored.timestamp));
        let changed = match tracked {
            Some((location, timestamp)) => {
                self.process_tracked(object, location, timestamp, text_match)
            }
            None if text_match && object.command.is_insertion() => self.process_untracked(object),
            None => false,
        };

        if !changed {
            return Vec::new();
        }
        self.recompute()
    }

    /// Fills an empty result set from `candidates`, which must arrive
    /// nearest-first. At most `k` matching objects are taken and a single
    /// diff is produced for all of them.
    pub fn seed<'a, I>(&mut self, candidates: I) -> Vec<ResultSetChange>
    where
        I: IntoIterator<Item = &'a DataObject>,
    {
        let mut inserted = false;
        for object in candidates {
            if self.heap.len() == self.k {
                break;
            }
            let fresh = !self.heap.iter().any(|entry| entry.object.object_id == object.object_id);
            let matches = self.predicate.evaluate(&object.text, &self.text);
            if fresh && matches && object.command.is_insertion() {
                self.insert_member(object.clone());
                inserted = true;
            }
        }

        if !inserted {
            return Vec::new();
        }
        self.recompute()
    }

    fn process_tracked(
        &mut self,
        object: &DataObject,
        stored_location: Point,
        stored_timestamp: u64,
        text_match: bool,
    ) -> bool {
        match object.command {
            Command::Drop | Command::UpdateDrop => {
                let exact =
                    stored_location == object.location && stored_timestamp == object.timestamp;
                if exact || object.timestamp >= stored_timestamp {
                    self.remove_member(&object.object_id);
                    return true;
                }
                false
            }
            Command::Update if text_match && object.timestamp >= stored_timestamp => {
                self.remove_member(&object.object_id);
                self.insert_member(object.clone());
                true
            }
            _ => {
                trace!(
                    "Query {} ignores {:?} of tracked object {} at t={}",
                    self.key, object.command, object.object_id, object.timestamp
                );
                false
            }
        }
    }

    fn process_untracked(&mut self, object: &DataObject) -> bool {
        if self.heap.len() < self.k {
            self.insert_member(object.clone());
            return true;
        }
        if object.location.distance(&self.focal) < self.farthest {
            self.heap.pop();
            self.insert_member(object.clone());
            return true;
        }
        false
    }

    fn insert_member(&mut self, object: DataObject) {
        let distance = object.location.distance(&self.focal);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry { distance, seq, object });
    }

    fn remove_member(&mut self, object_id: &ObjectId) {
        self.heap.retain(|entry| entry.object.object_id != *object_id);
    }

    /// Re-ranks every member and diffs against the previous ranking.
    fn recompute(&mut self) -> Vec<ResultSetChange> {
        let ranked = std::mem::take(&mut self.heap).into_sorted_vec();

        let mut ranks = HashMap::with_capacity(ranked.len());
        let mut snapshots = HashMap::with_capacity(ranked.len());
        for (index, entry) in ranked.iter().enumerate() {
            ranks.insert(entry.object.object_id.clone(), index + 1);
            snapshots.insert(entry.object.object_id.clone(), entry.object.clone());
        }

        let mut removed: Vec<(usize, &DataObject)> = self
            .snapshots
            .iter()
            .filter(|(id, _)| !ranks.contains_key(*id))
            .map(|(id, object)| (self.ranks.get(id).copied().unwrap_or(usize::MAX), object))
            .collect();
        removed.sort_by_key(|(rank, _)| *rank);

        let mut changes: Vec<ResultSetChange> = removed
            .into_iter()
            .map(|(_, object)| self.change(ChangeKind::Remove, object.clone()))
            .collect();

        for entry in &ranked {
            let kind = match self.snapshots.get(&entry.object.object_id) {
                None => ChangeKind::Add,
                Some(previous) if previous.location != entry.object.location => ChangeKind::Update,
                Some(_) => continue,
            };
            changes.push(self.change(kind, entry.object.clone()));
        }

        self.farthest = match ranked.last() {
            Some(last) if ranked.len() == self.k => last.distance,
            _ => self.sentinel,
        };
        self.heap = BinaryHeap::from(ranked);
        self.ranks = ranks;
        self.snapshots = snapshots;
        changes
    }

    fn change(&self, kind: ChangeKind, object: DataObject) -> ResultSetChange {
        ResultSetChange {
            kind,
            object,
            query: self.key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: f64 = 14.142135623730951;

    fn state(k: usize) -> KnnState {
        KnnState::new(
            QueryKey::new("q", "knn-1"),
            Point::new(0.0, 0.0),
            k,
            TextPredicate::None,
            TokenSet::new(),
            SENTINEL,
        )
    }

    fn object(id: &str, x: f64, y: f64, timestamp: u64, command: Command) -> DataObject {
        DataObject::new(id, Point::new(x, y), TokenSet::from_text("cafe"), timestamp, command, "s")
    }

    fn kinds(changes: &[ResultSetChange]) -> Vec<(ChangeKind, &str)> {
        changes
            .iter()
            .map(|c| (c.kind, c.object.object_id.as_str()))
            .collect()
    }

    #[test]
    fn starts_empty_with_sentinel() {
        let knn = state(3);
        assert_eq!(knn.phase(), KnnPhase::Empty);
        assert_eq!(knn.farthest_distance(), SENTINEL);
    }

    #[test]
    fn filling_keeps_sentinel_until_saturated() {
        let mut knn = state(2);
        let changes = knn.process(&object("1", 1.0, 0.0, 1, Command::Add));
        assert_eq!(kinds(&changes), vec![(ChangeKind::Add, "1")]);
        assert_eq!(knn.phase(), KnnPhase::Filling);
        assert_eq!(knn.farthest_distance(), SENTINEL);

        knn.process(&object("2", 2.0, 0.0, 1, Command::Add));
        assert_eq!(knn.phase(), KnnPhase::Saturated);
        assert_eq!(knn.farthest_distance(), 2.0);
    }

    #[test]
    fn closer_object_evicts_farthest_member() {
        let mut knn = state(2);
        knn.process(&object("1", 1.0, 0.0, 1, Command::Add));
        knn.process(&object("2", 2.0, 0.0, 1, Command::Add));
        let changes = knn.process(&object("3", 0.5, 0.0, 2, Command::Add));

        assert_eq!(kinds(&changes), vec![(ChangeKind::Remove, "2"), (ChangeKind::Add, "3")]);
        assert_eq!(knn.len(), 2);
        assert_eq!(knn.farthest_distance(), 1.0);
        assert_eq!(knn.rank_of(&ObjectId::new("3")), Some(1));
        assert_eq!(knn.rank_of(&ObjectId::new("1")), Some(2));
        assert_eq!(knn.rank_of(&ObjectId::new("2")), None);
    }

    #[test]
    fn farther_object_is_ignored_when_saturated() {
        let mut knn = state(1);
        knn.process(&object("1", 1.0, 0.0, 1, Command::Add));
        assert!(knn.process(&object("2", 1.0, 0.0, 1, Command::Add)).is_empty());
        assert!(knn.process(&object("3", 5.0, 5.0, 1, Command::Add)).is_empty());
        assert_eq!(knn.members()[0].object_id.as_str(), "1");
    }

    #[test]
    fn stale_drop_does_not_resurrect_or_remove() {
        let mut knn = state(2);
        knn.process(&object("1", 1.0, 0.0, 3, Command::Add));
        assert!(knn.process(&object("1", 1.0, 0.0, 2, Command::Drop)).is_empty());
        assert!(knn.process(&object("9", 1.0, 0.0, 0, Command::Drop)).is_empty());
        assert_eq!(knn.len(), 1);
    }

    #[test]
    fn later_drop_removes_even_without_location_match() {
        let mut knn = state(2);
        knn.process(&object("1", 1.0, 0.0, 3, Command::Add));
        let changes = knn.process(&object("1", 4.0, 4.0, 5, Command::UpdateDrop));
        assert_eq!(kinds(&changes), vec![(ChangeKind::Remove, "1")]);
        assert_eq!(knn.phase(), KnnPhase::Empty);
        assert_eq!(knn.farthest_distance(), SENTINEL);
    }

    #[test]
    fn update_moves_member_and_reports_update() {
        let mut knn = state(2);
        knn.process(&object("1", 1.0, 0.0, 1, Command::Add));
        knn.process(&object("2", 2.0, 0.0, 1, Command::Add));

        let changes = knn.process(&object("2", 0.1, 0.0, 2, Command::Update));
        assert_eq!(kinds(&changes), vec![(ChangeKind::Update, "2")]);
        assert_eq!(knn.rank_of(&ObjectId::new("2")), Some(1));
        assert_eq!(knn.farthest_distance(), 1.0);
    }

    #[test]
    fn stale_update_is_ignored() {
        let mut knn = state(2);
        knn.process(&object("1", 1.0, 0.0, 5, Command::Add));
        assert!(knn.process(&object("1", 0.2, 0.0, 4, Command::Update)).is_empty());
        assert_eq!(knn.snapshot_of(&ObjectId::new("1")).unwrap().location, Point::new(1.0, 0.0));
    }

    #[test]
    fn seeding_takes_nearest_matches_in_one_diff() {
        let mut knn = KnnState::new(
            QueryKey::new("q", "knn-2"),
            Point::new(0.0, 0.0),
            2,
            TextPredicate::And,
            TokenSet::from_text("cafe"),
            SENTINEL,
        );
        let mut tea = object("tea", 0.5, 0.0, 1, Command::Add);
        tea.text = TokenSet::from_text("tea");
        let candidates = vec![
            tea,
            object("1", 1.0, 0.0, 1, Command::Add),
            object("2", 2.0, 0.0, 1, Command::Add),
            object("3", 3.0, 0.0, 1, Command::Add),
        ];

        let changes = knn.seed(&candidates);
        assert_eq!(kinds(&changes), vec![(ChangeKind::Add, "1"), (ChangeKind::Add, "2")]);
        assert_eq!(knn.phase(), KnnPhase::Saturated);
        assert_eq!(knn.farthest_distance(), 2.0);
        assert!(knn.seed(&candidates).is_empty());
    }

    #[test]
    fn replayed_update_is_idempotent() {
        let mut knn = state(2);
        let update = object("1", 1.0, 0.0, 2, Command::Update);
        assert_eq!(kinds(&knn.process(&update)), vec![(ChangeKind::Add, "1")]);
        assert!(knn.process(&update).is_empty());
        assert_eq!(knn.len(), 1);
        assert_eq!(knn.snapshot_of(&ObjectId::new("1")).unwrap().timestamp, 2);
    }

    #[test]
    fn text_predicate_filters_candidates() {
        let mut knn = KnnState::new(
            QueryKey::new("q", "knn-2"),
            Point::new(0.0, 0.0),
            2,
            TextPredicate::And,
            TokenSet::from_text("pizza"),
            SENTINEL,
        );
        assert!(knn.process(&object("1", 1.0, 0.0, 1, Command::Add)).is_empty());

        let pizza = DataObject::new(
            "2",
            Point::new(1.0, 1.0),
            TokenSet::from_text("pizza bar"),
            1,
            Command::Add,
            "s",
        );
        assert_eq!(kinds(&knn.process(&pizza)), vec![(ChangeKind::Add, "2")]);
    }

    #[test]
    fn heap_never_exceeds_k() {
        let mut knn = state(3);
        for i in 0..20 {
            let d = 20.0 - i as f64 * 0.5;
            knn.process(&object(&i.to_string(), d, 0.0, 1, Command::Add));
            assert!(knn.len() <= 3);
        }
        let distances: Vec<f64> = knn.members().iter().map(|o| o.location.x).collect();
        assert_eq!(distances, vec![10.5, 11.0, 11.5]);
        assert_eq!(knn.farthest_distance(), 11.5);
    }

    #[test]
    fn zero_k_never_holds_members() {
        let mut knn = state(0);
        assert!(knn.process(&object("1", 1.0, 0.0, 1, Command::Add)).is_empty());
        assert!(knn.is_empty());
    }
}
