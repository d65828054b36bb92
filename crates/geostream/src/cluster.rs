//! Cluster assembly and routing.
//!
//! A [`Cluster`] spawns one worker task per partition, routes inbound data
//! and queries through the channel fabric and streams output events to a
//! writer task as JSON lines.
//!
//! ## Routing
//!
//! - Data objects go to the owner of their location. The driver remembers
//!   where every object was last sent; when an object moves into another
//!   partition an `updateDrop` copy at its previous location is sent to the
//!   previous owner first. An object older than the last one sent for the
//!   same id goes to that last owner only and changes nothing.
//! - Queries follow the configured [`QueryDelivery`]. With `Overlapping`,
//!   range and join queries go to the owners of their rectangle and KNN
//!   queries to the owners of the cells nearest the focal point.
//! - Cell reassignments update the driver's routing table and are broadcast.

use dashmap::DashMap;
use geostream_core::{
    CellReassignment, ChannelFabric, Command, DataObject, DispatchFabric, EngineConfig, EngineError,
    Evaluator, EvaluatorStats, FabricEndpoints, InboundEnvelope, ObjectId, OutputEvent, PartitionId,
    PartitionIndex, PartitionMessage, PartitionWorker, Point, QueryCommand, QueryDelivery,
    QueryShape, Route, ShutdownState, SourceId, StaticDataSource,
};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ObjectKey = (SourceId, ObjectId);

/// Where the driver last sent an object.
#[derive(Debug, Clone, Copy)]
struct LastSeen {
    owner: PartitionId,
    location: Point,
    timestamp: u64,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default)]
pub struct ClusterReport {
    pub partitions: usize,
    pub stats: EvaluatorStats,
    pub outputs_written: u64,
}

pub struct Cluster {
    config: Arc<EngineConfig>,
    routing: RwLock<PartitionIndex>,
    fabric: ChannelFabric,
    shutdown: ShutdownState,
    workers: Vec<JoinHandle<EvaluatorStats>>,
    last_seen: DashMap<ObjectKey, LastSeen>,
    writer: JoinHandle<io::Result<u64>>,
}

impl Cluster {
    /// Builds every partition, runs the static data load for each of them
    /// and only then starts the workers. A failing load aborts startup.
    pub fn start<W>(
        config: EngineConfig,
        output_capacity: usize,
        static_data: Option<&dyn StaticDataSource>,
        sink: W,
    ) -> Result<Self, EngineError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let config = Arc::new(config);
        let routing = PartitionIndex::from_config(config.index_variant, &config.grid)?;
        let FabricEndpoints {
            fabric,
            inboxes,
            outputs,
        } = ChannelFabric::build(
            &config.grid.partitions(),
            config.inbox_capacity,
            output_capacity,
        )?;
        let shutdown = ShutdownState::new();

        let mut workers = Vec::with_capacity(inboxes.len());
        for (partition, inbox) in inboxes {
            let evaluator = Evaluator::new(partition, Arc::clone(&config), routing.clone());
            let mut worker =
                PartitionWorker::new(evaluator, fabric.clone(), inbox, shutdown.clone());
            if let Some(source) = static_data {
                worker.load_static(source)?;
            }
            workers.push(worker);
        }

        info!("🧩 Starting {} partitions", workers.len());
        let workers = workers.into_iter().map(|worker| tokio::spawn(worker.run())).collect();
        let writer = tokio::spawn(write_outputs(outputs, sink));

        Ok(Self {
            config,
            routing: RwLock::new(routing),
            fabric,
            shutdown,
            workers,
            last_seen: DashMap::new(),
            writer,
        })
    }

    pub fn partitions(&self) -> &[PartitionId] {
        self.fabric.partitions()
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }

    /// Routes one decoded input line. Returns the number of partitions
    /// that received a message.
    pub async fn route(&self, envelope: InboundEnvelope) -> Result<usize, EngineError> {
        match envelope {
            InboundEnvelope::Data(message) => self.route_data(DataObject::try_from(message)?).await,
            InboundEnvelope::Query(message) => {
                self.route_query(PartitionMessage::try_from(message)?).await
            }
            InboundEnvelope::Control(reassignment) => self.route_control(reassignment).await,
        }
    }

    pub async fn route_data(&self, object: DataObject) -> Result<usize, EngineError> {
        let owner = self.routing.read().await.owner_for_point(&object.location)?;
        let key = (object.source_id.clone(), object.object_id.clone());

        // An out-of-order object can only be judged where the newer copy lives
        let recorded = self.last_seen.get(&key).map(|seen| *seen);
        if let Some(seen) = recorded.filter(|seen| object.timestamp < seen.timestamp) {
            debug!(
                "Object {} at t={} is older than t={}, sending it to partition {}",
                object.object_id, object.timestamp, seen.timestamp, seen.owner
            );
            return self.send_data(seen.owner, object).await;
        }

        if object.command.is_removal() {
            let target = self
                .last_seen
                .remove(&key)
                .map(|(_, seen)| seen.owner)
                .unwrap_or(owner);
            return self.send_data(target, object).await;
        }

        let seen = LastSeen {
            owner,
            location: object.location,
            timestamp: object.timestamp,
        };
        let mut delivered = 0;
        if let Some(previous) = self.last_seen.insert(key, seen) {
            if previous.owner != owner {
                debug!(
                    "Object {} moved from partition {} to {}",
                    object.object_id, previous.owner, owner
                );
                let mut retraction = object.clone();
                retraction.location = previous.location;
                retraction.command = Command::UpdateDrop;
                delivered += self.send_data(previous.owner, retraction).await?;
            }
        }
        delivered += self.send_data(owner, object).await?;
        Ok(delivered)
    }

    async fn send_data(
        &self,
        target: PartitionId,
        object: DataObject,
    ) -> Result<usize, EngineError> {
        Ok(self
            .fabric
            .send(Route::Direct(target), PartitionMessage::from_source(object))
            .await?)
    }

    /// Delivers a query registration or drop according to the configured
    /// delivery policy.
    pub async fn route_query(&self, message: PartitionMessage) -> Result<usize, EngineError> {
        let mut delivered = 0;
        for (route, message) in self.query_routes(message).await? {
            delivered += self.fabric.send(route, message).await?;
        }
        Ok(delivered)
    }

    async fn query_routes(
        &self,
        message: PartitionMessage,
    ) -> Result<Vec<(Route, PartitionMessage)>, EngineError> {
        let routes = match (self.config.query_delivery, &message) {
            (QueryDelivery::Hashed, PartitionMessage::Query(query)) => {
                vec![(Route::Keyed(query.key.to_string()), message)]
            }
            (QueryDelivery::Hashed, PartitionMessage::DropQuery(key)) => {
                vec![(Route::Keyed(key.to_string()), message)]
            }
            (QueryDelivery::Overlapping, PartitionMessage::Query(query)) => {
                let owners: Vec<PartitionId> = match (&query.shape, query.spatial_range()) {
                    (QueryShape::Knn { focal, k }, _) => {
                        self.knn_owners(&query.data_src, *focal, *k).await?
                    }
                    (_, Some(range)) => {
                        self.routing.read().await.owners_overlapping_rectangle(range)?.to_vec()
                    }
                    (_, None) => return Ok(vec![(Route::Broadcast, message.clone())]),
                };
                let mut routes = Vec::with_capacity(owners.len() + 1);
                // The old definition may live on other partitions
                if query.command == QueryCommand::Update {
                    routes.push((Route::Broadcast, PartitionMessage::DropQuery(query.key.clone())));
                }
                routes.extend(
                    owners
                        .into_iter()
                        .map(|owner| (Route::Direct(owner), message.clone())),
                );
                routes
            }
            _ => vec![(Route::Broadcast, message)],
        };
        Ok(routes)
    }

    /// Owners asked for the `k` nearest objects of `data_src`. Cells are
    /// visited nearest first until `k` objects known to the driver lie no
    /// farther than the next cell. Static objects are not tracked by the
    /// driver, so they only ever widen the walk.
    async fn knn_owners(
        &self,
        data_src: &SourceId,
        focal: Point,
        k: usize,
    ) -> Result<Vec<PartitionId>, EngineError> {
        let mut known: Vec<f64> = self
            .last_seen
            .iter()
            .filter(|entry| entry.key().0 == *data_src)
            .map(|entry| entry.value().location.distance(&focal))
            .collect();
        known.sort_by(f64::total_cmp);
        let kth = k.checked_sub(1).and_then(|index| known.get(index).copied());

        let routing = self.routing.read().await;
        let cells = routing.cells_by_distance(&focal);
        let mut owners = Vec::new();
        for (position, cell) in cells.iter().enumerate() {
            let owner = routing.owner_for_cell_index(cell.cell)?;
            if !owners.contains(&owner) {
                owners.push(owner);
            }
            let Some(next) = cells.get(position + 1) else {
                break;
            };
            if k == 0 || kth.is_some_and(|distance| distance <= next.distance) {
                break;
            }
        }
        debug!("KNN around {} with k={} routed to {:?}", focal, k, owners);
        Ok(owners)
    }

    pub async fn route_control(
        &self,
        reassignment: CellReassignment,
    ) -> Result<usize, EngineError> {
        match self.routing.write().await.apply(reassignment) {
            Ok(outcome) => debug!("Driver routing table: {:?}", outcome),
            Err(e) => warn!("Driver kept its routing table for {:?}: {}", reassignment, e),
        }
        Ok(self
            .fabric
            .send(Route::Broadcast, PartitionMessage::Control(reassignment))
            .await?)
    }

    /// Stops every worker and waits for the output writer.
    ///
    /// With `drain` set, all delivered messages and their propagations are
    /// handled first; otherwise workers stop after the message in hand.
    pub async fn finish(self, drain: bool) -> io::Result<ClusterReport> {
        let Cluster {
            fabric,
            shutdown,
            workers,
            writer,
            ..
        } = self;

        if drain {
            info!("⏳ Waiting for {} in-flight messages", fabric.in_flight());
            fabric.idle().await;
        }
        shutdown.initiate_shutdown();

        let partitions = workers.len();
        let mut stats = EvaluatorStats::default();
        for worker in workers {
            match worker.await {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(e) => error!("❌ Partition task failed: {}", e),
            }
        }
        shutdown.complete_shutdown();

        drop(fabric);
        let outputs_written = writer.await.map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        Ok(ClusterReport {
            partitions,
            stats,
            outputs_written,
        })
    }
}

async fn write_outputs<W>(mut outputs: mpsc::Receiver<OutputEvent>, sink: W) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(sink);
    let mut written = 0;
    while let Some(event) = outputs.recv().await {
        let line = serde_json::to_string(&event)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        written += 1;
        if outputs.is_empty() {
            writer.flush().await?;
        }
    }
    writer.flush().await?;
    Ok(written)
}
