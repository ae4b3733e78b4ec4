//! Event source and checkpoint store backed by the namespace's Kafka endpoint.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use health::HealthHandle;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Headers};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, ClientContext, Message, Offset, TopicPartitionList};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::connection_string::{ConnectionString, KAFKA_SASL_USERNAME};
use crate::consumer::{EventSource, SourceMessage};
use crate::error::{CheckpointError, ConsumerError, ReceiveError};
use crate::event::ReceivedEvent;
use crate::metrics_consts::{KAFKA_CALLBACK_QUEUE_DEPTH, KAFKA_CONSUMER_LAG};

/// Notices raised from librdkafka callbacks, picked up by the receive loop.
#[derive(Debug)]
enum Notice {
    Revoked(Vec<String>),
    Failed(ReceiveError),
}

pub struct EventHubContext {
    liveness: HealthHandle,
    notices: mpsc::UnboundedSender<Notice>,
}

impl EventHubContext {
    fn new(liveness: HealthHandle) -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        (Self { liveness, notices }, notices_rx)
    }

    fn notify(&self, notice: Notice) {
        if let Err(e) = self.notices.send(notice) {
            warn!("receive loop is gone, dropping notice: {:?}", e.0);
        }
    }
}

impl ClientContext for EventHubContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        metrics::gauge!(KAFKA_CALLBACK_QUEUE_DEPTH).set(stats.replyq as f64);

        for (_, topic) in stats.topics {
            for (partition, stats) in topic.partitions {
                // librdkafka reports an internal partition -1
                if partition < 0 {
                    continue;
                }
                metrics::gauge!(
                    KAFKA_CONSUMER_LAG,
                    "partition" => partition.to_string()
                )
                .set(stats.consumer_lag as f64);
            }
        }
    }

    fn error(&self, error: KafkaError, reason: &str) {
        let error = match receive_error(error) {
            ReceiveError::Unauthorized(message) => {
                ReceiveError::Unauthorized(format!("{}: {}", message, reason))
            }
            error => error,
        };

        if error.is_retryable() {
            warn!("librdkafka error: {}: {}", error, reason);
            return;
        }
        error!("unrecoverable librdkafka error: {}: {}", error, reason);
        self.notify(Notice::Failed(error));
    }
}

impl ConsumerContext for EventHubContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                if partitions.count() == 0 {
                    return;
                }
                let partition_ids: Vec<String> = partitions
                    .elements()
                    .iter()
                    .map(|element| element.partition().to_string())
                    .collect();
                info!(?partition_ids, "partitions are being revoked");
                self.notify(Notice::Revoked(partition_ids));
            }
            Rebalance::Assign(partitions) => {
                info!("assigned {} partitions", partitions.count());
            }
            Rebalance::Error(e) => {
                error!("rebalance error: {}", e);
            }
        }
    }
}

pub type EventHubStreamConsumer = StreamConsumer<EventHubContext>;

fn receive_error(error: KafkaError) -> ReceiveError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::Authentication | RDKafkaErrorCode::SaslAuthenticationFailed) => {
            ReceiveError::Unauthorized(error.to_string())
        }
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::BrokerNotAvailable,
        ) => ReceiveError::Disconnected(error.to_string()),
        _ => ReceiveError::Kafka(error),
    }
}

/// The group coordinator refuses commits from a member whose generation
/// ended, which is what a rebalance that moved the partition looks like.
fn commit_error(error: KafkaError, partition_id: String) -> CheckpointError {
    match error.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::RebalanceInProgress
            | RDKafkaErrorCode::IllegalGeneration
            | RDKafkaErrorCode::UnknownMemberId,
        ) => CheckpointError::OwnershipLost(partition_id),
        _ => CheckpointError::Kafka(error),
    }
}

/// Build the librdkafka configuration for reading `config.consumer_group`
/// through the namespace's Kafka endpoint.
pub fn client_config(config: &Config, connection: &ConnectionString) -> ClientConfig {
    let bootstrap = config
        .kafka_bootstrap
        .as_ref()
        .map(|bootstrap| bootstrap.as_str().to_owned())
        .unwrap_or_else(|| connection.kafka_bootstrap_server());

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", bootstrap)
        .set("group.id", config.consumer_group.as_str())
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set(
            "auto.offset.reset",
            config.starting_position.as_offset_reset(),
        )
        .set("queued.min.messages", config.prefetch.max(1).to_string())
        .set("statistics.interval.ms", "10000");

    if !config.kafka_plaintext {
        client_config
            .set("security.protocol", "SASL_SSL")
            .set("sasl.mechanism", "PLAIN")
            .set("sasl.username", KAFKA_SASL_USERNAME)
            .set("sasl.password", connection.as_secret());
    }

    client_config
}

pub struct KafkaEventSource {
    consumer: Arc<EventHubStreamConsumer>,
    eventhub_name: String,
    notices: Mutex<mpsc::UnboundedReceiver<Notice>>,
}

impl KafkaEventSource {
    /// Create the consumer, check that the event hub is reachable and
    /// subscribe to it.
    pub fn connect(
        client_config: &ClientConfig,
        eventhub_name: &str,
        liveness: HealthHandle,
    ) -> Result<Self, ConsumerError> {
        info!(eventhub = eventhub_name, "connecting to the event hub");

        let (context, notices) = EventHubContext::new(liveness);
        let consumer: EventHubStreamConsumer = client_config
            .create_with_context(context)
            .map_err(ConsumerError::Connect)?;

        // Ping the cluster to make sure we can reach brokers, fail after 10 seconds
        let metadata = consumer
            .fetch_metadata(Some(eventhub_name), Timeout::After(Duration::new(10, 0)))
            .map_err(ConsumerError::Connect)?;
        if let Some(code) = metadata.topics().first().and_then(|topic| topic.error()) {
            return Err(ConsumerError::Connect(KafkaError::MetadataFetch(
                code.into(),
            )));
        }

        consumer
            .subscribe(&[eventhub_name])
            .map_err(ConsumerError::Connect)?;
        info!(eventhub = eventhub_name, "connected to the event hub");

        Ok(Self {
            consumer: Arc::new(consumer),
            eventhub_name: eventhub_name.to_owned(),
            notices: Mutex::new(notices),
        })
    }

    /// A checkpoint store committing offsets through this consumer.
    pub fn checkpoint_store(&self) -> KafkaCheckpointStore {
        KafkaCheckpointStore {
            consumer: self.consumer.clone(),
            topic: self.eventhub_name.clone(),
        }
    }
}

fn to_event(message: &BorrowedMessage<'_>) -> ReceivedEvent {
    let mut event = ReceivedEvent::new(
        message.partition().to_string(),
        message.offset(),
        message.payload().unwrap_or_default(),
    );

    if let Some(key) = message.key() {
        event = event.with_partition_key(String::from_utf8_lossy(key));
    }
    if let Some(enqueued_time) = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis)
    {
        event = event.with_enqueued_time(enqueued_time);
    }
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                event = event.with_property(header.key, String::from_utf8_lossy(value));
            }
        }
    }

    event
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next(&self) -> Result<SourceMessage, ReceiveError> {
        let mut notices = self.notices.lock().await;

        tokio::select! {
            biased;

            Some(notice) = notices.recv() => match notice {
                Notice::Revoked(partition_ids) => Ok(SourceMessage::Revoked(partition_ids)),
                Notice::Failed(error) => Err(error),
            },
            message = self.consumer.recv() => {
                let message = message.map_err(receive_error)?;
                Ok(SourceMessage::Event(to_event(&message)))
            }
        }
    }

    async fn close(&self) {
        debug!(eventhub = self.eventhub_name, "unsubscribing");
        self.consumer.unsubscribe();
    }
}

/// Checkpoints by committing the consumer group offset of the partition.
#[derive(Clone)]
pub struct KafkaCheckpointStore {
    consumer: Arc<EventHubStreamConsumer>,
    topic: String,
}

#[async_trait]
impl CheckpointStore for KafkaCheckpointStore {
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let partition: i32 = checkpoint
            .partition_id
            .parse()
            .map_err(|_| CheckpointError::InvalidPartition(checkpoint.partition_id.clone()))?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &self.topic,
            partition,
            Offset::Offset(checkpoint.next_offset()),
        )?;

        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        let partition_id = checkpoint.partition_id.clone();
        tokio::task::spawn_blocking(move || {
            if consumer
                .assignment()?
                .find_partition(&topic, partition)
                .is_none()
            {
                return Err(CheckpointError::OwnershipLost(partition_id));
            }
            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| commit_error(e, partition_id))
        })
        .await
        .map_err(|e| CheckpointError::Interrupted(e.to_string()))?
    }
}
