use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{ConsumerError, ReceiveError};
use crate::event::ReceivedEvent;
use crate::handler::EventHandler;
use crate::metrics_consts::{CONSUMER_SUBSCRIBED, EVENTS_RECEIVED_TOTAL, RECEIVE_ERRORS_TOTAL};
use crate::partition_router::PartitionRouter;
use crate::partition_worker::{FailureReceiver, PartitionFailure};
use crate::retry::RetryPolicy;

/// What the source delivers next.
#[derive(Debug)]
pub enum SourceMessage {
    Event(ReceivedEvent),
    /// The listed partitions were assigned to another consumer of the group.
    Revoked(Vec<String>),
}

/// A subscription to one event hub under one consumer group.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next event or rebalance notice.
    async fn next(&self) -> Result<SourceMessage, ReceiveError>;

    /// Leave the consumer group and release the connection.
    async fn close(&self);
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub partition_channel_capacity: usize,
    /// How long to wait for an event before reporting an idle period.
    pub receive_timeout: Option<Duration>,
    /// Drain budget for partition workers on shutdown.
    pub shutdown_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            partition_channel_capacity: 100,
            receive_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

enum Step {
    Shutdown,
    Failed(PartitionFailure),
    Received(Result<Option<SourceMessage>, ReceiveError>),
}

/// Receives events from an [`EventSource`] and dispatches them, in order
/// per partition, to an [`EventHandler`].
pub struct EventHubConsumer {
    source: Box<dyn EventSource>,
    store: Arc<dyn CheckpointStore>,
    options: ConsumerOptions,
    eventhub_name: String,
    consumer_group: String,
    liveness: HealthHandle,
}

impl EventHubConsumer {
    pub fn new(
        source: Box<dyn EventSource>,
        store: Arc<dyn CheckpointStore>,
        options: ConsumerOptions,
        eventhub_name: &str,
        consumer_group: &str,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            source,
            store,
            options,
            eventhub_name: eventhub_name.to_owned(),
            consumer_group: consumer_group.to_owned(),
            liveness,
        }
    }

    /// Consume until `shutdown` completes or an unrecoverable error occurs.
    ///
    /// On shutdown queued events are handled before returning. On error the
    /// partition workers are aborted. The source is closed either way.
    pub async fn run<F>(
        self,
        handler: Arc<dyn EventHandler>,
        shutdown: F,
    ) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()> + Send,
    {
        let (mut router, mut failures) = PartitionRouter::new(
            handler.clone(),
            self.store.clone(),
            &self.eventhub_name,
            &self.consumer_group,
            self.options.partition_channel_capacity,
        );

        info!(
            eventhub = self.eventhub_name,
            consumer_group = self.consumer_group,
            "consumer subscribed"
        );
        metrics::gauge!(CONSUMER_SUBSCRIBED).set(1.0);

        let mut result = self
            .consume(&mut router, &mut failures, handler.as_ref(), shutdown)
            .await;

        metrics::gauge!(CONSUMER_SUBSCRIBED).set(0.0);
        if result.is_ok() {
            router.shutdown_all(self.options.shutdown_timeout).await;
            // A handler may have failed while its queue was draining.
            if let Ok(failure) = failures.try_recv() {
                result = Err(failure.into());
            }
        }
        if let Err(e) = &result {
            error!("consumer stopping on error: {}", e);
            router.abort_all();
        }

        self.source.close().await;
        info!(eventhub = self.eventhub_name, "consumer disconnected");

        result
    }

    async fn consume<F>(
        &self,
        router: &mut PartitionRouter,
        failures: &mut FailureReceiver,
        handler: &dyn EventHandler,
        shutdown: F,
    ) -> Result<(), ConsumerError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let retry_policy = self.options.retry_policy;
        let mut attempts: u32 = 0;

        loop {
            if attempts > 0 {
                let delay = retry_policy.time_until_next_retry(attempts);
                debug!(attempts, ?delay, "waiting before receiving again");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let step = tokio::select! {
                biased;

                _ = &mut shutdown => Step::Shutdown,
                Some(failure) = failures.recv() => Step::Failed(failure),
                received = self.receive() => Step::Received(received),
            };

            match step {
                Step::Shutdown => break,
                Step::Failed(failure) => return Err(failure.into()),
                Step::Received(Ok(None)) => {
                    debug!("no events received within the receive timeout");
                    self.liveness.report_healthy();
                }
                Step::Received(Ok(Some(SourceMessage::Event(event)))) => {
                    if attempts > 0 {
                        info!(attempts, "receiving again after transient errors");
                        metrics::gauge!(CONSUMER_SUBSCRIBED).set(1.0);
                        attempts = 0;
                    }
                    self.liveness.report_healthy();
                    metrics::counter!(
                        EVENTS_RECEIVED_TOTAL,
                        "partition" => event.partition_id().to_owned()
                    )
                    .increment(1);

                    // An event abandoned here is not checkpointed and will be
                    // delivered again.
                    tokio::select! {
                        biased;

                        _ = &mut shutdown => break,
                        routed = router.route(event) => {
                            if let Err(e) = routed {
                                return Err(failures.try_recv().map(Into::into).unwrap_or(e));
                            }
                        }
                    }
                }
                Step::Received(Ok(Some(SourceMessage::Revoked(partition_ids)))) => {
                    info!(?partition_ids, "partitions revoked");
                    router.revoke(&partition_ids).await;
                }
                Step::Received(Err(source)) => {
                    let retryable = source.is_retryable();
                    metrics::counter!(
                        RECEIVE_ERRORS_TOTAL,
                        "retryable" => retryable.to_string()
                    )
                    .increment(1);

                    attempts += 1;
                    let error = ConsumerError::Receive { attempts, source };
                    if !retryable || !retry_policy.should_retry(attempts) {
                        return Err(error);
                    }

                    warn!(attempts, "transient receive error: {}", error);
                    metrics::gauge!(CONSUMER_SUBSCRIBED).set(0.0);
                    handler.on_error(&error).await;
                }
            }
        }

        info!("shutdown requested");
        Ok(())
    }

    async fn receive(&self) -> Result<Option<SourceMessage>, ReceiveError> {
        match self.options.receive_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.source.next()).await {
                Ok(received) => received.map(Some),
                Err(_) => Ok(None),
            },
            None => self.source.next().await.map(Some),
        }
    }
}

impl From<PartitionFailure> for ConsumerError {
    fn from(failure: PartitionFailure) -> Self {
        ConsumerError::Handler {
            partition_id: failure.partition_id,
            source: failure.error,
        }
    }
}
