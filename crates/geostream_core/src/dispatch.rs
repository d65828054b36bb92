//! # Dispatch Fabric
//!
//! Delivery contract between the driver and partitions, plus an in-process
//! implementation on bounded Tokio channels.
//!
//! ## Key Types
//!
//! - [`Route`] - which partition(s) a message goes to
//! - [`DispatchFabric`] - the delivery trait partitions and drivers talk to
//! - [`ChannelFabric`] - one bounded inbox per partition and a shared output
//!   channel
//!
//! Keyed routing hashes the key onto the partition list, so every message
//! carrying the same key reaches the same partition in send order.
//! [`ChannelFabric`] counts delivered messages until the receiving partition
//! reports them handled, letting a driver wait for the cluster to go idle.

use crate::error::DispatchError;
use crate::evaluator::OutputEvent;
use crate::messages::PartitionMessage;
use crate::types::PartitionId;
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// One named partition
    Direct(PartitionId),
    /// One partition chosen by hashing the key
    Keyed(String),
    /// Any one partition
    Random,
    /// Every partition
    Broadcast,
}

#[async_trait]
pub trait DispatchFabric: Send + Sync {
    /// Partition ids reachable through this fabric, ascending.
    fn partitions(&self) -> &[PartitionId];

    /// Delivers `message`, waiting for inbox capacity. Returns the number of
    /// partitions it reached.
    async fn send(&self, route: Route, message: PartitionMessage) -> Result<usize, DispatchError>;

    /// Delivers `message` without waiting on a full inbox. Partitions use
    /// this towards each other; order between forwarded messages is not kept.
    async fn forward(
        &self,
        route: Route,
        message: PartitionMessage,
    ) -> Result<usize, DispatchError> {
        self.send(route, message).await
    }

    /// Hands an output event to the consumer.
    async fn emit(&self, event: OutputEvent) -> Result<(), DispatchError>;

    /// Called by a partition once it finished handling one message.
    fn message_done(&self) {}
}

/// Receiving ends created together with a [`ChannelFabric`].
pub struct FabricEndpoints {
    pub fabric: ChannelFabric,
    pub inboxes: Vec<(PartitionId, mpsc::Receiver<PartitionMessage>)>,
    pub outputs: mpsc::Receiver<OutputEvent>,
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    fn done(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct ChannelFabric {
    inboxes: Arc<BTreeMap<PartitionId, mpsc::Sender<PartitionMessage>>>,
    ids: Arc<[PartitionId]>,
    output: mpsc::Sender<OutputEvent>,
    in_flight: Arc<InFlight>,
}

impl ChannelFabric {
    /// Creates one inbox per distinct partition id.
    pub fn build(
        partitions: &[PartitionId],
        inbox_capacity: usize,
        output_capacity: usize,
    ) -> Result<FabricEndpoints, DispatchError> {
        if partitions.is_empty() {
            return Err(DispatchError::NoPartitions);
        }

        let mut senders = BTreeMap::new();
        let mut receivers = BTreeMap::new();
        for id in partitions {
            if senders.contains_key(id) {
                continue;
            }
            let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
            senders.insert(*id, tx);
            receivers.insert(*id, rx);
        }
        let ids: Arc<[PartitionId]> = senders.keys().copied().collect::<Vec<_>>().into();
        let (output, outputs) = mpsc::channel(output_capacity.max(1));

        debug!("📬 Dispatch fabric created for {} partitions", ids.len());
        Ok(FabricEndpoints {
            fabric: Self {
                inboxes: Arc::new(senders),
                ids,
                output,
                in_flight: Arc::new(InFlight::default()),
            },
            inboxes: receivers.into_iter().collect(),
            outputs,
        })
    }

    /// Partition a key hashes to.
    pub fn keyed_target(&self, key: &str) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let slot = (hasher.finish() % self.ids.len() as u64) as usize;
        self.ids[slot]
    }

    /// Messages delivered but not yet reported handled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Resolves once every delivered message has been handled.
    pub async fn idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn targets(&self, route: &Route) -> Result<Vec<PartitionId>, DispatchError> {
        Ok(match route {
            Route::Direct(id) => {
                if !self.inboxes.contains_key(id) {
                    return Err(DispatchError::UnknownTarget(*id));
                }
                vec![*id]
            }
            Route::Keyed(key) => vec![self.keyed_target(key)],
            Route::Random => {
                let slot = rand::thread_rng().gen_range(0..self.ids.len());
                vec![self.ids[slot]]
            }
            Route::Broadcast => self.ids.to_vec(),
        })
    }

    fn sender(&self, id: PartitionId) -> Result<&mpsc::Sender<PartitionMessage>, DispatchError> {
        self.inboxes.get(&id).ok_or(DispatchError::UnknownTarget(id))
    }

    async fn deliver(
        &self,
        target: PartitionId,
        message: PartitionMessage,
    ) -> Result<(), DispatchError> {
        let sender = self.sender(target)?;
        self.in_flight.add(1);
        if sender.send(message).await.is_err() {
            self.in_flight.done();
            return Err(DispatchError::Closed(target));
        }
        Ok(())
    }
}

#[async_trait]
impl DispatchFabric for ChannelFabric {
    fn partitions(&self) -> &[PartitionId] {
        &self.ids
    }

    async fn send(&self, route: Route, message: PartitionMessage) -> Result<usize, DispatchError> {
        let targets = self.targets(&route)?;
        if let [target] = targets.as_slice() {
            self.deliver(*target, message).await?;
            return Ok(1);
        }

        let deliveries = targets
            .iter()
            .map(|target| self.deliver(*target, message.clone()));

        let mut delivered = 0;
        for result in join_all(deliveries).await {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast delivery failed: {}", e),
            }
        }
        if delivered == 0 {
            return Err(DispatchError::Closed(targets[0]));
        }
        Ok(delivered)
    }

    async fn forward(
        &self,
        route: Route,
        message: PartitionMessage,
    ) -> Result<usize, DispatchError> {
        let targets = self.targets(&route)?;
        let mut delivered = 0;
        for target in targets {
            let sender = self.sender(target)?;
            self.in_flight.add(1);
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(message)) => {
                    let sender = sender.clone();
                    let in_flight = Arc::clone(&self.in_flight);
                    tokio::spawn(async move {
                        if sender.send(message).await.is_err() {
                            in_flight.done();
                            debug!("Partition {} closed before a deferred delivery", target);
                        }
                    });
                    delivered += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.in_flight.done();
                    debug!("Partition {} is closed, dropping forwarded message", target);
                }
            }
        }
        Ok(delivered)
    }

    async fn emit(&self, event: OutputEvent) -> Result<(), DispatchError> {
        self.output
            .send(event)
            .await
            .map_err(|_| DispatchError::OutputClosed)
    }

    fn message_done(&self) {
        self.in_flight.done();
    }
}
