use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CheckpointError;
use crate::event::ReceivedEvent;

/// The last processed position of one partition for one consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub eventhub_name: String,
    pub consumer_group: String,
    pub partition_id: String,
    /// Offset of the last processed event.
    pub offset: i64,
}

impl Checkpoint {
    pub fn for_event(eventhub_name: &str, consumer_group: &str, event: &ReceivedEvent) -> Self {
        Self {
            eventhub_name: eventhub_name.to_owned(),
            consumer_group: consumer_group.to_owned(),
            partition_id: event.partition_id().to_owned(),
            offset: event.offset(),
        }
    }

    /// Where a new consumer resumes reading.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

/// Durable storage for partition checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Advance the stored position of `checkpoint.partition_id`.
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// Keeps checkpoints in memory only. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<(String, String, String), Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        eventhub_name: &str,
        consumer_group: &str,
        partition_id: &str,
    ) -> Option<Checkpoint> {
        let key = (
            eventhub_name.to_owned(),
            consumer_group.to_owned(),
            partition_id.to_owned(),
        );
        self.checkpoints
            .read()
            .ok()
            .and_then(|checkpoints| checkpoints.get(&key).cloned())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let key = (
            checkpoint.eventhub_name.clone(),
            checkpoint.consumer_group.clone(),
            checkpoint.partition_id.clone(),
        );
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| CheckpointError::Interrupted("checkpoint map poisoned".to_owned()))?;
        checkpoints.insert(key, checkpoint.clone());

        debug!(
            partition = checkpoint.partition_id,
            offset = checkpoint.offset,
            "stored checkpoint in memory"
        );
        Ok(())
    }
}
