use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::CheckpointError;
use crate::event::ReceivedEvent;
use crate::metrics_consts::{CHECKPOINTS_TOTAL, CHECKPOINT_ERRORS_TOTAL};

/// Identifies the partition a handler call belongs to, and lets the handler
/// advance that partition's checkpoint.
#[derive(Clone)]
pub struct PartitionContext {
    eventhub_name: Arc<str>,
    consumer_group: Arc<str>,
    partition_id: String,
    store: Arc<dyn CheckpointStore>,
}

impl PartitionContext {
    pub fn new(
        eventhub_name: Arc<str>,
        consumer_group: Arc<str>,
        partition_id: String,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            eventhub_name,
            consumer_group,
            partition_id,
            store,
        }
    }

    pub fn eventhub_name(&self) -> &str {
        &self.eventhub_name
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Record `event` as processed. A restarted consumer in the same group
    /// resumes after it.
    pub async fn update_checkpoint(&self, event: &ReceivedEvent) -> Result<(), CheckpointError> {
        if event.partition_id() != self.partition_id {
            return Err(CheckpointError::PartitionMismatch {
                expected: self.partition_id.clone(),
                actual: event.partition_id().to_owned(),
            });
        }

        let checkpoint = Checkpoint::for_event(&self.eventhub_name, &self.consumer_group, event);
        let labels = [("partition", self.partition_id.clone())];

        match self.store.update_checkpoint(&checkpoint).await {
            Ok(()) => {
                metrics::counter!(CHECKPOINTS_TOTAL, &labels).increment(1);
                debug!(
                    partition = self.partition_id,
                    offset = checkpoint.offset,
                    "checkpoint updated"
                );
                Ok(())
            }
            Err(e) => {
                metrics::counter!(CHECKPOINT_ERRORS_TOTAL, &labels).increment(1);
                error!(
                    partition = self.partition_id,
                    offset = checkpoint.offset,
                    "failed to update checkpoint: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for PartitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionContext")
            .field("eventhub_name", &self.eventhub_name)
            .field("consumer_group", &self.consumer_group)
            .field("partition_id", &self.partition_id)
            .finish()
    }
}

/// Why a partition stopped being processed by this consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The consumer is shutting down
    Shutdown,
    /// The partition was assigned to another consumer in the group
    OwnershipLost,
}

#[cfg(test)]
mod tests {
    use crate::checkpoint::InMemoryCheckpointStore;

    use super::*;

    fn context(store: Arc<InMemoryCheckpointStore>) -> PartitionContext {
        PartitionContext::new("hub".into(), "$Default".into(), "0".to_owned(), store)
    }

    #[tokio::test]
    async fn checkpoints_events_of_its_partition() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ctx = context(store.clone());

        ctx.update_checkpoint(&ReceivedEvent::new("0", 5, "x"))
            .await
            .unwrap();

        assert_eq!(store.get("hub", "$Default", "0").unwrap().offset, 5);
    }

    #[tokio::test]
    async fn refuses_events_of_other_partitions() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let ctx = context(store.clone());

        let result = ctx
            .update_checkpoint(&ReceivedEvent::new("1", 5, "x"))
            .await;

        assert!(matches!(
            result,
            Err(CheckpointError::PartitionMismatch { .. })
        ));
        assert_eq!(store.get("hub", "$Default", "1"), None);
    }
}
