use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(from = "EVENTHUB_CONNECTION_STRING")]
    pub connection_string: String,

    #[envconfig(from = "EVENTHUB_CONSUMER_GROUP")]
    pub consumer_group: NonEmptyString,

    // Optional when the connection string carries an EntityPath
    #[envconfig(from = "EVENTHUB_NAME")]
    pub eventhub_name: Option<NonEmptyString>,

    #[envconfig(from = "EVENTHUB_STARTING_POSITION", default = "latest")]
    pub starting_position: StartingPosition,

    #[envconfig(from = "EVENTHUB_PREFETCH", default = "300")]
    pub prefetch: u32,

    #[envconfig(from = "EVENTHUB_RECEIVE_TIMEOUT")]
    pub receive_timeout: Option<EnvMsDuration>,

    #[envconfig(from = "EVENTHUB_CHECKPOINT_STORE", default = "kafka")]
    pub checkpoint_store: CheckpointStoreKind,

    #[envconfig(from = "EVENTHUB_KAFKA_BOOTSTRAP")]
    pub kafka_bootstrap: Option<NonEmptyString>,

    #[envconfig(from = "EVENTHUB_KAFKA_PLAINTEXT", default = "false")]
    pub kafka_plaintext: bool,

    #[envconfig(from = "PARTITION_CHANNEL_CAPACITY", default = "100")]
    pub partition_channel_capacity: usize,

    #[envconfig(from = "SHUTDOWN_TIMEOUT", default = "30000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub reconnect: ReconnectConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct ReconnectConfig {
    #[envconfig(from = "RECONNECT_MAX_ATTEMPTS", default = "5")]
    pub max_attempts: u32,

    #[envconfig(from = "RECONNECT_INITIAL_INTERVAL", default = "1000")]
    pub initial_interval: EnvMsDuration,

    #[envconfig(from = "RECONNECT_BACKOFF_COEFFICIENT", default = "2")]
    pub backoff_coefficient: u32,

    #[envconfig(from = "RECONNECT_MAXIMUM_INTERVAL", default = "30000")]
    pub maximum_interval: EnvMsDuration,
}

impl ReconnectConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.backoff_coefficient,
            self.initial_interval.0,
            Some(self.maximum_interval.0),
        )
        .max_attempts(self.max_attempts)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

/// Where to start reading a partition that has no checkpoint yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingPosition {
    Earliest,
    Latest,
}

impl StartingPosition {
    /// Value for librdkafka's `auto.offset.reset`.
    pub fn as_offset_reset(&self) -> &'static str {
        match self {
            StartingPosition::Earliest => "earliest",
            StartingPosition::Latest => "latest",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStartingPositionError(pub String);

impl FromStr for StartingPosition {
    type Err = ParseStartingPositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "-1" => Ok(StartingPosition::Earliest),
            "latest" | "@latest" => Ok(StartingPosition::Latest),
            other => Err(ParseStartingPositionError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStoreKind {
    /// Commit consumer group offsets on the broker
    Kafka,
    /// Keep checkpoints in process memory, lost on restart
    Memory,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCheckpointStoreKindError(pub String);

impl FromStr for CheckpointStoreKind {
    type Err = ParseCheckpointStoreKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(CheckpointStoreKind::Kafka),
            "memory" => Ok(CheckpointStoreKind::Memory),
            other => Err(ParseCheckpointStoreKindError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn required() -> HashMap<String, String> {
        HashMap::from([
            (
                "EVENTHUB_CONNECTION_STRING".to_owned(),
                "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=listen;SharedAccessKey=c2VjcmV0".to_owned(),
            ),
            ("EVENTHUB_CONSUMER_GROUP".to_owned(), "$Default".to_owned()),
        ])
    }

    #[test]
    fn defaults_apply() {
        let config = Config::init_from_hashmap(&required()).unwrap();

        assert_eq!(config.bind(), "0.0.0.0:3302");
        assert_eq!(config.consumer_group.as_str(), "$Default");
        assert!(config.eventhub_name.is_none());
        assert_eq!(config.starting_position, StartingPosition::Latest);
        assert_eq!(config.prefetch, 300);
        assert!(config.receive_timeout.is_none());
        assert_eq!(config.checkpoint_store, CheckpointStoreKind::Kafka);
        assert!(!config.kafka_plaintext);
        assert_eq!(config.partition_channel_capacity, 100);
        assert_eq!(config.shutdown_timeout.0, time::Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut env = required();
        env.insert("EVENTHUB_NAME".to_owned(), "spherelight".to_owned());
        env.insert("EVENTHUB_STARTING_POSITION".to_owned(), "earliest".to_owned());
        env.insert("EVENTHUB_RECEIVE_TIMEOUT".to_owned(), "250".to_owned());
        env.insert("EVENTHUB_CHECKPOINT_STORE".to_owned(), "memory".to_owned());
        env.insert("RECONNECT_INITIAL_INTERVAL".to_owned(), "10".to_owned());

        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.eventhub_name.unwrap().as_str(), "spherelight");
        assert_eq!(config.starting_position, StartingPosition::Earliest);
        assert_eq!(
            config.receive_timeout.unwrap().0,
            time::Duration::from_millis(250)
        );
        assert_eq!(config.checkpoint_store, CheckpointStoreKind::Memory);
        assert_eq!(
            config.reconnect.initial_interval.0,
            time::Duration::from_millis(10)
        );
    }

    #[test]
    fn consumer_group_is_required_and_non_empty() {
        let mut env = required();
        env.remove("EVENTHUB_CONSUMER_GROUP");
        assert!(Config::init_from_hashmap(&env).is_err());

        env.insert("EVENTHUB_CONSUMER_GROUP".to_owned(), "".to_owned());
        assert!(Config::init_from_hashmap(&env).is_err());
    }

    #[test]
    fn unknown_starting_position_is_rejected() {
        assert_eq!(
            "@latest".parse::<StartingPosition>(),
            Ok(StartingPosition::Latest)
        );
        assert!("tomorrow".parse::<StartingPosition>().is_err());
    }
}
