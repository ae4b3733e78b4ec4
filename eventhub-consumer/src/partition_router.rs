//! Partition Router - Routes events to partition-specific workers
//!
//! Workers are created lazily on the first event of a partition and removed
//! when the partition is revoked, on shutdown, or when the consumer aborts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::ConsumerError;
use crate::event::ReceivedEvent;
use crate::handler::EventHandler;
use crate::metrics_consts::{ACTIVE_PARTITIONS, PARTITIONS_REVOKED_TOTAL};
use crate::partition::PartitionContext;
use crate::partition_worker::{FailureReceiver, FailureSender, PartitionWorker};

pub struct PartitionRouter {
    workers: HashMap<String, PartitionWorker>,
    handler: Arc<dyn EventHandler>,
    store: Arc<dyn CheckpointStore>,
    eventhub_name: Arc<str>,
    consumer_group: Arc<str>,
    channel_capacity: usize,
    failures: FailureSender,
}

impl PartitionRouter {
    /// Create a router and the receiving end on which its workers report
    /// handler failures.
    pub fn new(
        handler: Arc<dyn EventHandler>,
        store: Arc<dyn CheckpointStore>,
        eventhub_name: &str,
        consumer_group: &str,
        channel_capacity: usize,
    ) -> (Self, FailureReceiver) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let router = Self {
            workers: HashMap::new(),
            handler,
            store,
            eventhub_name: eventhub_name.into(),
            consumer_group: consumer_group.into(),
            channel_capacity,
            failures,
        };
        (router, failures_rx)
    }

    pub fn active_partitions(&self) -> usize {
        self.workers.len()
    }

    /// Hand `event` to its partition's worker, starting one if needed.
    /// Waits while the worker's channel is full.
    pub async fn route(&mut self, event: ReceivedEvent) -> Result<(), ConsumerError> {
        let partition_id = event.partition_id().to_owned();
        let sender = match self.workers.get(&partition_id) {
            Some(worker) => worker.sender(),
            None => self.add_partition(partition_id.clone()),
        };

        if sender.send(event).await.is_err() {
            // The worker only stops on its own after a handler failure.
            if let Some(worker) = self.workers.remove(&partition_id) {
                worker.abort();
                self.record_active();
            }
            return Err(ConsumerError::PartitionStopped(partition_id));
        }
        Ok(())
    }

    fn add_partition(&mut self, partition_id: String) -> mpsc::Sender<ReceivedEvent> {
        info!(partition = partition_id, "creating partition worker");

        let ctx = PartitionContext::new(
            self.eventhub_name.clone(),
            self.consumer_group.clone(),
            partition_id.clone(),
            self.store.clone(),
        );
        let worker = PartitionWorker::new(
            ctx,
            self.handler.clone(),
            self.failures.clone(),
            self.channel_capacity,
        );
        let sender = worker.sender();
        self.workers.insert(partition_id, worker);
        self.record_active();
        sender
    }

    /// Stop the workers of partitions this consumer no longer owns.
    pub async fn revoke(&mut self, partition_ids: &[String]) {
        for partition_id in partition_ids {
            if let Some(worker) = self.workers.remove(partition_id) {
                info!(partition = partition_id, "revoking partition worker");
                metrics::counter!(PARTITIONS_REVOKED_TOTAL).increment(1);
                worker.revoke().await;
            }
        }
        self.record_active();
    }

    /// Drain and stop every worker. Workers still running after `timeout`
    /// are aborted.
    pub async fn shutdown_all(&mut self, timeout: Duration) {
        let workers: Vec<PartitionWorker> = self.workers.drain().map(|(_, w)| w).collect();
        self.record_active();
        if workers.is_empty() {
            return;
        }

        info!("draining {} partition workers", workers.len());
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        let drained = tokio::time::timeout(timeout, async move {
            for worker in workers {
                worker.shutdown().await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "partition workers did not drain within {:?}, aborting them",
                timeout
            );
            for handle in abort_handles {
                handle.abort();
            }
        }
    }

    /// Stop every worker without draining.
    pub fn abort_all(&mut self) {
        for (partition_id, worker) in self.workers.drain() {
            warn!(partition = partition_id, "aborting partition worker");
            worker.abort();
        }
        self.record_active();
    }

    fn record_active(&self) {
        metrics::gauge!(ACTIVE_PARTITIONS).set(self.workers.len() as f64);
    }
}
