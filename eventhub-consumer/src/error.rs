use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// Errors found while reading configuration or the connection string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("connection string is empty")]
    EmptyConnectionString,
    #[error("connection string segment {0:?} is not a key=value pair")]
    MalformedSegment(String),
    #[error("connection string has no Endpoint")]
    MissingEndpoint,
    #[error("connection string endpoint {0:?} is not a valid sb:// address")]
    InvalidEndpoint(String),
    #[error("connection string needs SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature")]
    MissingCredentials,
    #[error("no event hub name: set EVENTHUB_NAME or add EntityPath to the connection string")]
    MissingEventHubName,
    #[error("event hub name {configured:?} does not match EntityPath {entity_path:?} in the connection string")]
    EventHubNameMismatch {
        configured: String,
        entity_path: String,
    },
}

/// Errors returned while waiting for the next event.
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    /// No broker could be reached. Retried like any other transport error.
    #[error("connection lost: {0}")]
    Disconnected(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
}

impl ReceiveError {
    /// Transport hiccups are retried. Credential, authorization and topic errors are not:
    /// they will not go away by reconnecting.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReceiveError::Disconnected(_) => true,
            ReceiveError::Unauthorized(_) => false,
            ReceiveError::Kafka(error) => !matches!(
                error.rdkafka_error_code(),
                Some(
                    RDKafkaErrorCode::Authentication
                        | RDKafkaErrorCode::SaslAuthenticationFailed
                        | RDKafkaErrorCode::TopicAuthorizationFailed
                        | RDKafkaErrorCode::GroupAuthorizationFailed
                        | RDKafkaErrorCode::ClusterAuthorizationFailed
                        | RDKafkaErrorCode::UnknownTopicOrPartition
                        | RDKafkaErrorCode::UnknownTopic
                        | RDKafkaErrorCode::Fatal
                )
            ),
        }
    }
}

/// Errors advancing a partition checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("partition id {0:?} is not a kafka partition number")]
    InvalidPartition(String),
    #[error("event from partition {actual} cannot checkpoint partition {expected}")]
    PartitionMismatch { expected: String, actual: String },
    #[error("checkpoint commit was interrupted: {0}")]
    Interrupted(String),
    /// The partition was handed to another consumer before the commit landed.
    #[error("partition {0} is no longer owned by this consumer")]
    OwnershipLost(String),
}

/// Errors raised by an event handler.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("failed to checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to process event: {0}")]
    Processing(String),
}

impl HandlerError {
    /// The partition moved to another consumer. Its worker stops without
    /// failing the run, and the new owner picks up from the last checkpoint.
    pub fn is_ownership_lost(&self) -> bool {
        matches!(
            self,
            HandlerError::Checkpoint(CheckpointError::OwnershipLost(_))
        )
    }
}

/// Errors that end a consumer run.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to connect to the event hub: {0}")]
    Connect(KafkaError),
    #[error("failed to receive events after {attempts} attempt(s): {source}")]
    Receive {
        attempts: u32,
        #[source]
        source: ReceiveError,
    },
    #[error("handler failed on partition {partition_id}: {source}")]
    Handler {
        partition_id: String,
        #[source]
        source: HandlerError,
    },
    #[error("worker for partition {0} stopped unexpectedly")]
    PartitionStopped(String),
}
