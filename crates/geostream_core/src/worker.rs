//! # Partition Worker
//!
//! Drives one [`Evaluator`] from its inbox. A worker first runs the blocking
//! static data load, then handles one message at a time until its inbox
//! closes or shutdown is initiated.
//!
//! Propagations are forwarded to peers before the handled message is
//! reported done, so the fabric never looks idle while a reciprocal join
//! probe is still pending.

use crate::dispatch::{DispatchFabric, Route};
use crate::error::StaticLoadError;
use crate::evaluator::{Evaluator, EvaluatorStats, Outbound};
use crate::messages::{DataOrigin, PartitionMessage};
use crate::shutdown::ShutdownState;
use crate::static_data::StaticDataSource;
use crate::types::PartitionId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct PartitionWorker<F: DispatchFabric> {
    evaluator: Evaluator,
    fabric: F,
    inbox: mpsc::Receiver<PartitionMessage>,
    shutdown: ShutdownState,
}

impl<F: DispatchFabric> PartitionWorker<F> {
    pub fn new(
        evaluator: Evaluator,
        fabric: F,
        inbox: mpsc::Receiver<PartitionMessage>,
        shutdown: ShutdownState,
    ) -> Self {
        Self {
            evaluator,
            fabric,
            inbox,
            shutdown,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.evaluator.partition()
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Loads the records of `source` that fall in this partition's cells.
    /// Must run before [`PartitionWorker::run`]; an error is fatal.
    pub fn load_static(&mut self, source: &dyn StaticDataSource) -> Result<usize, StaticLoadError> {
        let records = source.records()?;
        self.evaluator.load_static(records)
    }

    /// Processes messages until the inbox closes or shutdown is initiated.
    pub async fn run(mut self) -> EvaluatorStats {
        let partition = self.partition();
        info!("🚀 Partition {} started", partition);

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.initiated() => {
                    debug!("Partition {} observed shutdown", partition);
                    break;
                }
                message = self.inbox.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!("Partition {} inbox closed", partition);
                        break;
                    }
                },
            };

            let outbound = self.evaluator.handle(message);
            self.dispatch(outbound).await;
            self.fabric.message_done();
        }

        let stats = self.evaluator.stats().clone();
        info!(
            "🛑 Partition {} stopped: {} objects, {} outputs, {} queries active",
            partition,
            stats.data_objects + stats.neighbour_objects,
            stats.outputs_emitted,
            self.evaluator.query_count()
        );
        stats
    }

    async fn dispatch(&mut self, outbound: Outbound) {
        let partition = self.partition();

        for (target, object) in outbound.propagations {
            let object_id = object.object_id.clone();
            let message = PartitionMessage::Data {
                object,
                origin: DataOrigin::Neighbour(partition),
            };
            if let Err(e) = self.fabric.forward(Route::Direct(target), message).await {
                warn!(
                    "Partition {} could not propagate object {} to {}: {}",
                    partition, object_id, target, e
                );
            }
        }

        for event in outbound.outputs {
            if let Err(e) = self.fabric.emit(event).await {
                warn!("Partition {} dropped outputs: {}", partition, e);
                break;
            }
        }
    }
}
