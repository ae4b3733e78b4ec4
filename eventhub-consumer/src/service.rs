use std::future::Future;
use std::sync::Arc;

use health::HealthHandle;
use tracing::info;

use crate::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use crate::config::{CheckpointStoreKind, Config};
use crate::connection_string::ConnectionString;
use crate::consumer::{ConsumerOptions, EventHubConsumer};
use crate::error::ConsumerError;
use crate::handler::EventHandler;
use crate::kafka::{client_config, KafkaEventSource};

impl From<&Config> for ConsumerOptions {
    fn from(config: &Config) -> Self {
        Self {
            partition_channel_capacity: config.partition_channel_capacity,
            receive_timeout: config.receive_timeout.map(|timeout| timeout.0),
            shutdown_timeout: config.shutdown_timeout.0,
            retry_policy: config.reconnect.retry_policy(),
        }
    }
}

/// Connect with `config`, then dispatch every event to `handler` until
/// `shutdown` completes or an unrecoverable error occurs.
pub async fn run<F>(
    config: &Config,
    handler: Arc<dyn EventHandler>,
    liveness: HealthHandle,
    shutdown: F,
) -> Result<(), ConsumerError>
where
    F: Future<Output = ()> + Send,
{
    let connection: ConnectionString = config.connection_string.parse()?;
    let eventhub_name = connection.resolve_event_hub_name(
        config
            .eventhub_name
            .as_ref()
            .map(|name| name.as_str()),
    )?;
    info!(
        namespace = connection.host(),
        eventhub = eventhub_name,
        consumer_group = config.consumer_group.as_str(),
        "starting event hub consumer"
    );

    let client_config = client_config(config, &connection);
    let source = KafkaEventSource::connect(&client_config, &eventhub_name, liveness.clone())?;
    let store: Arc<dyn CheckpointStore> = match config.checkpoint_store {
        CheckpointStoreKind::Kafka => Arc::new(source.checkpoint_store()),
        CheckpointStoreKind::Memory => Arc::new(InMemoryCheckpointStore::new()),
    };

    let consumer = EventHubConsumer::new(
        Box::new(source),
        store,
        ConsumerOptions::from(config),
        &eventhub_name,
        config.consumer_group.as_str(),
        liveness,
    );

    consumer.run(handler, shutdown).await
}
