// ==== Consumer loop ====
/// Counter for events received from the source, per partition
pub const EVENTS_RECEIVED_TOTAL: &str = "eventhub_events_received_total";

/// Counter for receive errors, labelled by whether they were retried
pub const RECEIVE_ERRORS_TOTAL: &str = "eventhub_receive_errors_total";

/// Gauge set to 1 while the consumer is subscribed and receiving
pub const CONSUMER_SUBSCRIBED: &str = "eventhub_consumer_subscribed";

// ==== Partition workers ====
/// Counter for events the handler completed successfully
pub const EVENTS_PROCESSED_TOTAL: &str = "eventhub_events_processed_total";

/// Counter for handler failures
pub const HANDLER_ERRORS_TOTAL: &str = "eventhub_handler_errors_total";

/// Histogram for time spent in the handler per event
pub const HANDLER_DURATION_SECONDS: &str = "eventhub_handler_duration_seconds";

/// Gauge for partitions with a running worker
pub const ACTIVE_PARTITIONS: &str = "eventhub_active_partitions";

/// Counter for partitions taken away by a rebalance
pub const PARTITIONS_REVOKED_TOTAL: &str = "eventhub_partitions_revoked_total";

// ==== Checkpoints ====
pub const CHECKPOINTS_TOTAL: &str = "eventhub_checkpoints_total";
pub const CHECKPOINT_ERRORS_TOTAL: &str = "eventhub_checkpoint_errors_total";

// ==== librdkafka statistics ====
pub const KAFKA_CALLBACK_QUEUE_DEPTH: &str = "eventhub_kafka_callback_queue_depth";
pub const KAFKA_CONSUMER_LAG: &str = "eventhub_kafka_consumer_lag";
