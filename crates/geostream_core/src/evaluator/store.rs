//! R*-tree backed object store.
//!
//! Objects are keyed by `(source, object id)`. Objects from keyed sources are
//! upserted and live until removed; objects inserted through
//! [`ObjectStore::insert_bounded`] additionally sit in a FIFO window and are
//! evicted oldest-first once the window is full.

use crate::predicate::within_distance;
use crate::types::{DataObject, ObjectId, Point, Rectangle, SourceId};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::{HashMap, VecDeque};

type StoreKey = (SourceId, ObjectId);

/// Entry stored inside the R-tree.
#[derive(Debug, Clone)]
struct StoredObject {
    object: DataObject,
    point: [f64; 2],
}

impl StoredObject {
    fn new(object: DataObject) -> Self {
        let point = [object.location.x, object.location.y];
        Self { object, point }
    }

    fn key(&self) -> StoreKey {
        (self.object.source_id.clone(), self.object.object_id.clone())
    }
}

impl PartialEq for StoredObject {
    fn eq(&self, other: &Self) -> bool {
        self.object.source_id == other.object.source_id
            && self.object.object_id == other.object.object_id
    }
}

impl Eq for StoredObject {}

impl RTreeObject for StoredObject {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for StoredObject {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Relative slack on tree searches; exact inclusion is decided afterwards.
const SEARCH_SLACK: f64 = 1e-9;

#[derive(Debug)]
pub struct ObjectStore {
    tree: RTree<StoredObject>,
    entries: HashMap<StoreKey, StoredObject>,
    window: VecDeque<StoreKey>,
    window_capacity: usize,
}

impl ObjectStore {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            tree: RTree::new(),
            entries: HashMap::new(),
            window: VecDeque::new(),
            window_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, source: &SourceId, object_id: &ObjectId) -> Option<&DataObject> {
        self.entries
            .get(&(source.clone(), object_id.clone()))
            .map(|entry| &entry.object)
    }

    /// Inserts or replaces an object. A stored copy with a strictly newer
    /// timestamp wins and the call returns `false`.
    pub fn upsert(&mut self, object: DataObject) -> bool {
        let entry = StoredObject::new(object);
        let key = entry.key();

        if let Some(existing) = self.entries.get(&key) {
            if existing.object.timestamp > entry.object.timestamp {
                return false;
            }
        }
        if let Some(existing) = self.entries.remove(&key) {
            self.tree.remove(&existing);
        }

        self.tree.insert(entry.clone());
        self.entries.insert(key, entry);
        true
    }

    /// Upserts into the FIFO window, evicting the oldest objects past capacity.
    /// Returns the number of evicted objects.
    pub fn insert_bounded(&mut self, object: DataObject) -> usize {
        let key = (object.source_id.clone(), object.object_id.clone());
        let fresh = !self.entries.contains_key(&key);
        if !self.upsert(object) {
            return 0;
        }
        if fresh {
            self.window.push_back(key);
        }

        let mut evicted = 0;
        while self.window.len() > self.window_capacity {
            if let Some(oldest) = self.window.pop_front() {
                if self.remove_key(&oldest).is_some() {
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Removes the stored copy unless it is strictly newer than `object`.
    pub fn remove(&mut self, object: &DataObject) -> Option<DataObject> {
        let key = (object.source_id.clone(), object.object_id.clone());
        let stored = self.entries.get(&key)?;
        if stored.object.timestamp > object.timestamp {
            return None;
        }
        self.window.retain(|queued| queued != &key);
        self.remove_key(&key)
    }

    fn remove_key(&mut self, key: &StoreKey) -> Option<DataObject> {
        let entry = self.entries.remove(key)?;
        self.tree.remove(&entry);
        Some(entry.object)
    }

    /// Objects at most `radius` away from `center`, boundary included.
    pub fn within_distance(
        &self,
        center: Point,
        radius: f64,
    ) -> impl Iterator<Item = &DataObject> + '_ {
        let search = radius * radius * (1.0 + SEARCH_SLACK);
        self.tree
            .locate_within_distance([center.x, center.y], search)
            .map(|entry| &entry.object)
            .filter(move |object| within_distance(&object.location, &center, radius))
    }

    /// Objects inside a rectangle, boundary included.
    pub fn in_rectangle(&self, rect: Rectangle) -> impl Iterator<Item = &DataObject> + '_ {
        let envelope = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| &entry.object)
            .filter(move |object| rect.contains_point(&object.location))
    }

    /// Objects ordered nearest-first from `focal`, produced lazily.
    pub fn nearest_to(&self, focal: Point) -> impl Iterator<Item = &DataObject> + '_ {
        self.tree
            .nearest_neighbor_iter(&[focal.x, focal.y])
            .map(|entry| &entry.object)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataObject> {
        self.entries.values().map(|entry| &entry.object)
    }
}
