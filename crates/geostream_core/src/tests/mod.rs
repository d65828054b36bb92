//! Multi-partition scenarios run through real workers and the channel fabric.


use crate::config::EngineConfig;
use crate::dispatch::{ChannelFabric, DispatchFabric, FabricEndpoints, Route};
use crate::evaluator::{Evaluator, EvaluatorStats, OutputEvent};
use crate::messages::PartitionMessage;
use crate::partition::PartitionIndex;
use crate::predicate::TextPredicate;
use crate::query::{JoinSide, Query, QueryCommand, QueryKey, QueryShape};
use crate::shutdown::ShutdownState;
use crate::types::{Command, DataObject, PartitionId, Point, Rectangle, TokenSet};
use crate::worker::PartitionWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Workers for every partition of a configuration, driven by hand.
pub(crate) struct TestCluster {
    fabric: ChannelFabric,
    index: PartitionIndex,
    outputs: mpsc::Receiver<OutputEvent>,
    shutdown: ShutdownState,
    workers: Vec<JoinHandle<EvaluatorStats>>,
}

impl TestCluster {
    pub(crate) fn start(config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let index = PartitionIndex::from_config(config.index_variant, &config.grid).unwrap();
        let FabricEndpoints {
            fabric,
            inboxes,
            outputs,
        } = ChannelFabric::build(&config.grid.partitions(), config.inbox_capacity, 4096).unwrap();
        let shutdown = ShutdownState::new();

        let workers = inboxes
            .into_iter()
            .map(|(partition, inbox)| {
                let evaluator = Evaluator::new(partition, Arc::clone(&config), index.clone());
                let worker =
                    PartitionWorker::new(evaluator, fabric.clone(), inbox, shutdown.clone());
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            fabric,
            index,
            outputs,
            shutdown,
            workers,
        }
    }

    pub(crate) fn owner_of(&self, object: &DataObject) -> PartitionId {
        self.index.owner_for_point(&object.location).unwrap()
    }

    pub(crate) async fn data(&self, object: DataObject) {
        let owner = self.owner_of(&object);
        self.fabric
            .send(Route::Direct(owner), PartitionMessage::from_source(object))
            .await
            .unwrap();
    }

    pub(crate) async fn broadcast(&self, message: PartitionMessage) {
        self.fabric.send(Route::Broadcast, message).await.unwrap();
    }

    /// Waits for every partition to go idle and returns the outputs so far.
    pub(crate) async fn settle(&mut self) -> Vec<OutputEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.fabric.idle())
            .await
            .expect("cluster went idle");
        let mut events = Vec::new();
        while let Ok(event) = self.outputs.try_recv() {
            events.push(event);
        }
        events
    }

    pub(crate) async fn stop(self) -> EvaluatorStats {
        self.shutdown.initiate_shutdown();
        let mut total = EvaluatorStats::default();
        for worker in self.workers {
            total.merge(&worker.await.unwrap());
        }
        total
    }
}

pub(crate) fn object(
    id: &str,
    source: &str,
    x: f64,
    y: f64,
    text: &str,
    timestamp: u64,
    command: Command,
) -> DataObject {
    DataObject::new(id, Point::new(x, y), TokenSet::from_text(text), timestamp, command, source)
}

pub(crate) fn knn_query(id: &str, data_src: &str, focal: Point, k: usize) -> Query {
    Query {
        key: QueryKey::new("users", id),
        timestamp: 0,
        command: QueryCommand::Add,
        data_src: data_src.into(),
        predicate: TextPredicate::None,
        text: TokenSet::new(),
        shape: QueryShape::Knn { focal, k },
        continuous: true,
    }
}

pub(crate) fn range_query(id: &str, data_src: &str, range: Rectangle, text: &str) -> Query {
    Query {
        key: QueryKey::new("users", id),
        timestamp: 0,
        command: QueryCommand::Add,
        data_src: data_src.into(),
        predicate: if text.is_empty() { TextPredicate::None } else { TextPredicate::Or },
        text: TokenSet::from_text(text),
        shape: QueryShape::Range { range },
        continuous: true,
    }
}

pub(crate) fn join_query(
    id: &str,
    left: &str,
    right: &str,
    range: Rectangle,
    distance: f64,
) -> Query {
    Query {
        key: QueryKey::new("users", id),
        timestamp: 0,
        command: QueryCommand::Add,
        data_src: left.into(),
        predicate: TextPredicate::None,
        text: TokenSet::new(),
        shape: QueryShape::SpatialJoin {
            range,
            other: JoinSide {
                data_src: right.into(),
                predicate: TextPredicate::None,
                text: TokenSet::new(),
            },
            join_predicate: TextPredicate::None,
            distance,
        },
        continuous: true,
    }
}
