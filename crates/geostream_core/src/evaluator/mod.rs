//! # Partition Evaluator
//!
//! The per-partition evaluation core. An [`Evaluator`] owns the queries
//! delivered to its partition, the objects stored for its cells and a cache
//! of objects propagated by peers. It processes one [`PartitionMessage`] at a
//! time and returns the resulting [`Outbound`] work: output events for the
//! client and object copies to forward to peers.
//!
//! ## Data Paths
//!
//! - **Source data** is checked against range queries, fed to KNN states,
//!   probed against join partners and finally retained according to its
//!   [`SourceKind`](crate::config::SourceKind).
//! - **Neighbour data** skips range checks and is only probed for joins,
//!   then kept in the bounded peer cache for snapshot joins. A propagated
//!   removal evicts the cached copy.
//! - **Queries** are registered (continuous) or evaluated once (snapshot).

pub mod join;
pub mod output;
pub mod stats;
pub mod store;

pub use join::{JoinSpec, Side};
pub use output::{OutputEvent, QuerySummary};
pub use stats::EvaluatorStats;
pub use store::ObjectStore;

use crate::config::{EngineConfig, Retention};
use crate::error::StaticLoadError;
use crate::knn::KnnState;
use crate::messages::{DataOrigin, PartitionMessage};
use crate::partition::{CellReassignment, PartitionIndex, ReassignOutcome};
use crate::query::{Query, QueryKey, QueryShape};
use crate::types::{DataObject, PartitionId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Work produced by handling one message.
#[derive(Debug, Default)]
pub struct Outbound {
    pub outputs: Vec<OutputEvent>,
    /// Object copies for the reciprocal join probe on peer partitions
    pub propagations: Vec<(PartitionId, DataObject)>,
}

impl Outbound {
    fn with_outputs(outputs: Vec<OutputEvent>) -> Self {
        Self {
            outputs,
            propagations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.propagations.is_empty()
    }
}

#[derive(Debug)]
struct RegisteredQuery {
    query: Query,
    knn: Option<KnnState>,
}

pub struct Evaluator {
    partition: PartitionId,
    config: Arc<EngineConfig>,
    index: PartitionIndex,
    /// Registration order
    queries: Vec<RegisteredQuery>,
    store: ObjectStore,
    peers: ObjectStore,
    stats: EvaluatorStats,
}

impl Evaluator {
    pub fn new(partition: PartitionId, config: Arc<EngineConfig>, index: PartitionIndex) -> Self {
        let store = ObjectStore::new(config.volatile_cache_capacity);
        let peers = ObjectStore::new(config.peer_cache_capacity);
        Self {
            partition,
            config,
            index,
            queries: Vec::new(),
            store,
            peers,
            stats: EvaluatorStats::default(),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn stats(&self) -> &EvaluatorStats {
        &self.stats
    }

    pub fn index(&self) -> &PartitionIndex {
        &self.index
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn stored_objects(&self) -> usize {
        self.store.len()
    }

    pub fn peer_objects(&self) -> usize {
        self.peers.len()
    }

    pub fn knn_state(&self, key: &QueryKey) -> Option<&KnnState> {
        self.queries
            .iter()
            .find(|registered| registered.query.key == *key)
            .and_then(|registered| registered.knn.as_ref())
    }

    /// Bulk loads static objects before any message is processed, keeping
    /// those located in this partition's cells. The first failing record
    /// aborts the load.
    pub fn load_static<I>(&mut self, records: I) -> Result<usize, StaticLoadError>
    where
        I: IntoIterator<Item = Result<DataObject, StaticLoadError>>,
    {
        let mut loaded = 0;
        for record in records {
            let object = record?;
            match self.index.owner_for_point(&object.location) {
                Ok(owner) if owner == self.partition => {
                    if self.store.upsert(object) {
                        loaded += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Partition {} skipped static object {} at ({}, {}): {}",
                        self.partition, object.object_id, object.location.x, object.location.y, e
                    );
                    self.stats.dropped_events += 1;
                }
            }
        }
        info!("📦 Partition {} loaded {} static objects", self.partition, loaded);
        Ok(loaded)
    }

    pub fn handle(&mut self, message: PartitionMessage) -> Outbound {
        trace!("Partition {} handling {}", self.partition, message.kind());
        let outbound = match message {
            PartitionMessage::Data {
                object,
                origin: DataOrigin::Source,
            } => self.handle_source(object),
            PartitionMessage::Data {
                object,
                origin: DataOrigin::Neighbour(from),
            } => self.handle_neighbour(object, from),
            PartitionMessage::Query(query) => self.handle_query(query),
            PartitionMessage::DropQuery(key) => {
                self.drop_query(&key);
                Outbound::default()
            }
            PartitionMessage::Control(reassignment) => {
                self.apply_control(reassignment);
                Outbound::default()
            }
        };

        self.stats.outputs_emitted += outbound.outputs.len() as u64;
        self.stats.objects_propagated += outbound.propagations.len() as u64;
        outbound
    }

    fn handle_source(&mut self, object: DataObject) -> Outbound {
        self.stats.data_objects += 1;

        let mut outputs = Vec::new();
        let mut targets = BTreeSet::new();
        let mut join_eligible = false;
        // Removals are propagated around the last stored location
        let anchor = if object.command.is_removal() {
            self.store
                .get(&object.source_id, &object.object_id)
                .map_or(object.location, |stored| stored.location)
        } else {
            object.location
        };

        for RegisteredQuery { query, knn } in self.queries.iter_mut() {
            if object.source_id != query.data_src && query.data_src2() != Some(&object.source_id) {
                continue;
            }

            if let Some(knn) = knn.as_mut() {
                if object.source_id == query.data_src {
                    outputs.extend(knn.process(&object).into_iter().map(OutputEvent::Change));
                }
                continue;
            }

            match &query.shape {
                QueryShape::Range { range } => {
                    if object.source_id == query.data_src
                        && range.contains_point(&object.location)
                        && query.matches_text(&object.text)
                    {
                        outputs.push(OutputEvent::range_match(query, object.clone()));
                    }
                }
                QueryShape::SpatialJoin { .. } => {
                    let Some(join) = JoinSpec::of(query) else {
                        continue;
                    };
                    let area = if object.command.is_removal() {
                        join.retraction_area(&object, anchor)
                    } else {
                        let Some(side) = join.eligible_side(&object) else {
                            continue;
                        };
                        join_eligible = true;
                        outputs.extend(join.probe(&object, side, &self.store));
                        join.neighbourhood(&object)
                    };

                    let Some(area) = area else {
                        continue;
                    };
                    match self.index.owners_overlapping_rectangle(&area) {
                        Ok(owners) => targets.extend(
                            owners.into_iter().filter(|owner| *owner != self.partition),
                        ),
                        Err(e) => {
                            warn!(
                                "Partition {} cannot propagate object {} for query {}: {}",
                                self.partition, object.object_id, query.key, e
                            );
                            self.stats.dropped_events += 1;
                        }
                    }
                }
                QueryShape::Knn { .. } => {}
            }
        }

        let mut copy = object.clone();
        copy.location = anchor;
        let propagations = targets
            .into_iter()
            .map(|target| (target, copy.clone()))
            .collect();
        self.retain(object, join_eligible);

        Outbound { outputs, propagations }
    }

    fn retain(&mut self, object: DataObject, join_eligible: bool) {
        if object.command.is_removal() {
            self.store.remove(&object);
            return;
        }
        match self.config.sources.kind_of(&object.source_id).retention() {
            Retention::ById => {
                if !self.store.upsert(object) {
                    trace!("Partition {} kept a newer stored copy", self.partition);
                }
            }
            Retention::Bounded if join_eligible => {
                self.stats.objects_evicted += self.store.insert_bounded(object) as u64;
            }
            Retention::Bounded | Retention::Transient => {}
        }
    }

    fn handle_neighbour(&mut self, object: DataObject, from: PartitionId) -> Outbound {
        if from == self.partition {
            return Outbound::default();
        }
        self.stats.neighbour_objects += 1;

        if object.command.is_removal() {
            self.peers.remove(&object);
            return Outbound::default();
        }

        let mut outputs = Vec::new();
        for registered in &self.queries {
            let Some(join) = JoinSpec::of(&registered.query) else {
                continue;
            };
            if let Some(side) = join.eligible_side(&object) {
                outputs.extend(join.probe(&object, side, &self.store));
            }
        }

        self.stats.objects_evicted += self.peers.insert_bounded(object) as u64;
        Outbound::with_outputs(outputs)
    }

    fn handle_query(&mut self, query: Query) -> Outbound {
        if !query.continuous {
            self.stats.snapshot_queries += 1;
            let mut knn = KnnState::for_query(&query, self.index.max_distance());
            let outputs = initial_results(&query, knn.as_mut(), &self.store, Some(&self.peers));
            debug!(
                "Partition {} evaluated snapshot {} with {} results",
                self.partition,
                query,
                outputs.len()
            );
            return Outbound::with_outputs(outputs);
        }

        let mut knn = KnnState::for_query(&query, self.index.max_distance());
        let outputs = initial_results(&query, knn.as_mut(), &self.store, None);
        let registered = RegisteredQuery { query, knn };

        match self
            .queries
            .iter()
            .position(|existing| existing.query.key == registered.query.key)
        {
            Some(position) => {
                debug!("Partition {} replacing query {}", self.partition, registered.query.key);
                self.queries[position] = registered;
            }
            None => {
                debug!("Partition {} registered {}", self.partition, registered.query);
                self.queries.push(registered);
            }
        }
        self.stats.queries_registered += 1;
        Outbound::with_outputs(outputs)
    }

    fn drop_query(&mut self, key: &QueryKey) {
        let before = self.queries.len();
        self.queries.retain(|registered| registered.query.key != *key);
        if self.queries.len() < before {
            self.stats.queries_dropped += 1;
            debug!("Partition {} dropped query {}", self.partition, key);
        } else {
            trace!("Partition {} has no query {} to drop", self.partition, key);
        }
    }

    fn apply_control(&mut self, reassignment: CellReassignment) {
        match self.index.apply(reassignment) {
            Ok(ReassignOutcome::Applied { .. }) => self.stats.reassignments_applied += 1,
            Ok(ReassignOutcome::Stale { .. }) => {}
            Err(e) => {
                warn!("Partition {} rejected {:?}: {}", self.partition, reassignment, e);
                self.stats.dropped_events += 1;
            }
        }
    }
}

/// Results a query sees over already stored objects. `peers` is only
/// consulted by snapshot joins.
fn initial_results(
    query: &Query,
    knn: Option<&mut KnnState>,
    store: &ObjectStore,
    peers: Option<&ObjectStore>,
) -> Vec<OutputEvent> {
    match (&query.shape, knn) {
        (QueryShape::Knn { focal, .. }, Some(knn)) => knn
            .seed(store.nearest_to(*focal).filter(|object| object.source_id == query.data_src))
            .into_iter()
            .map(OutputEvent::Change)
            .collect(),
        (QueryShape::Range { range }, _) => store
            .in_rectangle(*range)
            .filter(|object| object.source_id == query.data_src && query.matches_text(&object.text))
            .map(|object| OutputEvent::range_match(query, object.clone()))
            .collect(),
        (QueryShape::SpatialJoin { .. }, _) => match (JoinSpec::of(query), peers) {
            (Some(join), Some(peers)) => join.snapshot(store, peers),
            _ => Vec::new(),
        },
        (QueryShape::Knn { .. }, None) => Vec::new(),
    }
}
