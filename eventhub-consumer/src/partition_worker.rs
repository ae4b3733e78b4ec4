//! Partition Worker - Dedicated task processing the events of a single partition
//!
//! Each partition gets its own worker with a bounded channel, so events of one
//! partition are handled in order while partitions proceed in parallel, and a
//! slow handler applies backpressure to the receive loop.
//!
//! A worker whose checkpoint finds the partition reassigned stops handling
//! events and waits for the revocation that follows.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::HandlerError;
use crate::event::ReceivedEvent;
use crate::handler::EventHandler;
use crate::metrics_consts::{
    EVENTS_PROCESSED_TOTAL, HANDLER_DURATION_SECONDS, HANDLER_ERRORS_TOTAL,
};
use crate::partition::{CloseReason, PartitionContext};

/// A handler error, reported by the worker that stopped because of it.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition_id: String,
    pub error: HandlerError,
}

pub type FailureSender = mpsc::UnboundedSender<PartitionFailure>;
pub type FailureReceiver = mpsc::UnboundedReceiver<PartitionFailure>;

/// A worker that processes events for a single partition
pub struct PartitionWorker {
    partition_id: String,
    sender: mpsc::Sender<ReceivedEvent>,
    revoked: CancellationToken,
    handle: JoinHandle<()>,
}

impl PartitionWorker {
    pub fn new(
        ctx: PartitionContext,
        handler: Arc<dyn EventHandler>,
        failures: FailureSender,
        channel_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(channel_capacity.max(1));
        let revoked = CancellationToken::new();
        let partition_id = ctx.partition_id().to_owned();

        let handle = tokio::spawn(Self::run_worker(
            ctx,
            receiver,
            handler,
            failures,
            revoked.clone(),
        ));

        Self {
            partition_id,
            sender,
            revoked,
            handle,
        }
    }

    /// Get a clone of the sender, so the caller can await capacity without
    /// holding a borrow of the worker.
    pub fn sender(&self) -> mpsc::Sender<ReceivedEvent> {
        self.sender.clone()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Process every queued event, then close the partition.
    pub async fn shutdown(self) {
        drop(self.sender);
        Self::join(self.partition_id, self.handle).await;
    }

    /// Finish the in-flight event, drop the queued ones and close the
    /// partition as lost. The new owner receives the dropped events again.
    pub async fn revoke(self) {
        self.revoked.cancel();
        drop(self.sender);
        Self::join(self.partition_id, self.handle).await;
    }

    /// Stop immediately, without closing the partition.
    pub fn abort(self) {
        self.handle.abort();
    }

    async fn join(partition_id: String, handle: JoinHandle<()>) {
        match handle.await {
            Ok(()) => debug!(partition = partition_id, "partition worker stopped"),
            Err(e) if e.is_cancelled() => {
                debug!(partition = partition_id, "partition worker aborted")
            }
            Err(e) => warn!(
                partition = partition_id,
                "partition worker panicked during shutdown: {}", e
            ),
        }
    }

    /// The main worker loop
    async fn run_worker(
        ctx: PartitionContext,
        mut receiver: mpsc::Receiver<ReceivedEvent>,
        handler: Arc<dyn EventHandler>,
        failures: FailureSender,
        revoked: CancellationToken,
    ) {
        info!(partition = ctx.partition_id(), "starting partition worker");
        handler.on_partition_initialize(&ctx).await;

        let labels = [("partition", ctx.partition_id().to_owned())];
        // Set once a checkpoint shows another consumer owns the partition.
        let mut lost = false;

        let reason = loop {
            let event = tokio::select! {
                biased;

                _ = revoked.cancelled() => break CloseReason::OwnershipLost,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None if lost => break CloseReason::OwnershipLost,
                    None => break CloseReason::Shutdown,
                },
            };

            let offset = event.offset();
            if lost {
                debug!(partition = ctx.partition_id(), offset, "partition lost, dropping event");
                continue;
            }
            debug!(partition = ctx.partition_id(), offset, "processing event");

            let start = Instant::now();
            let result = handler.on_event(&ctx, event).await;
            metrics::histogram!(HANDLER_DURATION_SECONDS, &labels)
                .record(start.elapsed().as_secs_f64());

            match result {
                Ok(()) => {
                    metrics::counter!(EVENTS_PROCESSED_TOTAL, &labels).increment(1);
                }
                Err(error) if error.is_ownership_lost() => {
                    // Keep draining until revoked, the receive loop still routes here.
                    warn!(
                        partition = ctx.partition_id(),
                        offset,
                        "partition moved to another consumer, dropping its events until revoked"
                    );
                    lost = true;
                }
                Err(error) => {
                    metrics::counter!(HANDLER_ERRORS_TOTAL, &labels).increment(1);
                    error!(
                        partition = ctx.partition_id(),
                        offset,
                        error = %error,
                        "handler failed, stopping partition"
                    );
                    // Nothing after the failed event may run, or a later
                    // checkpoint would skip it.
                    let failure = PartitionFailure {
                        partition_id: ctx.partition_id().to_owned(),
                        error,
                    };
                    if failures.send(failure).is_err() {
                        warn!(
                            partition = ctx.partition_id(),
                            "consumer loop is gone, handler failure not reported"
                        );
                    }
                    return;
                }
            }
        };

        // Queued events of a revoked partition are dropped with the receiver.
        drop(receiver);
        handler.on_partition_close(&ctx, reason).await;
        info!(partition = ctx.partition_id(), ?reason, "partition worker shutting down");
    }
}
