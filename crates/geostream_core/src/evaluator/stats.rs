use serde::{Deserialize, Serialize};

/// Per-partition processing counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorStats {
    /// Data objects received straight from a data source
    pub data_objects: u64,
    /// Data objects propagated by peer partitions
    pub neighbour_objects: u64,
    /// Continuous queries added or updated
    pub queries_registered: u64,
    /// Continuous queries removed by an explicit drop
    pub queries_dropped: u64,
    /// One-shot queries evaluated
    pub snapshot_queries: u64,
    /// Output events emitted
    pub outputs_emitted: u64,
    /// Copies of objects sent to peers for join evaluation
    pub objects_propagated: u64,
    /// Objects evicted from bounded caches
    pub objects_evicted: u64,
    /// Events skipped because of a per-tuple error
    pub dropped_events: u64,
    /// Cell reassignments applied
    pub reassignments_applied: u64,
}

impl EvaluatorStats {
    /// Adds another partition's counters to these.
    pub fn merge(&mut self, other: &EvaluatorStats) {
        self.data_objects += other.data_objects;
        self.neighbour_objects += other.neighbour_objects;
        self.queries_registered += other.queries_registered;
        self.queries_dropped += other.queries_dropped;
        self.snapshot_queries += other.snapshot_queries;
        self.outputs_emitted += other.outputs_emitted;
        self.objects_propagated += other.objects_propagated;
        self.objects_evicted += other.objects_evicted;
        self.dropped_events += other.dropped_events;
        self.reassignments_applied += other.reassignments_applied;
    }
}
