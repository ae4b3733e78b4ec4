use std::io::{self, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{ConsumerError, HandlerError};
use crate::event::ReceivedEvent;
use crate::partition::{CloseReason, PartitionContext};

/// Processes the events of every partition the consumer owns.
///
/// Calls for one partition never overlap: `on_event` returns before the next
/// event of that partition is delivered. Different partitions are handled
/// concurrently. Checkpointing is up to the handler, through
/// [`PartitionContext::update_checkpoint`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(
        &self,
        ctx: &PartitionContext,
        event: ReceivedEvent,
    ) -> Result<(), HandlerError>;

    /// Called before the first event of a partition.
    async fn on_partition_initialize(&self, ctx: &PartitionContext) {
        info!(partition = ctx.partition_id(), "partition initialized");
    }

    /// Called once the partition has stopped, unless its handler failed.
    async fn on_partition_close(&self, ctx: &PartitionContext, reason: CloseReason) {
        info!(partition = ctx.partition_id(), ?reason, "partition closed");
    }

    /// Called for receive errors that are about to be retried.
    async fn on_error(&self, error: &ConsumerError) {
        warn!("error receiving events: {}", error);
    }
}

/// The line written for each event.
pub fn format_event_line(event: &ReceivedEvent, partition_id: &str) -> String {
    format!(
        "Received the event: \"{}\" from the partition with ID: \"{}\"",
        event, partition_id
    )
}

/// Writes one line per event and then checkpoints it.
pub struct PrintingHandler<W> {
    out: Mutex<W>,
}

impl PrintingHandler<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> PrintingHandler<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn print(&self, line: &str) -> Result<(), HandlerError> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| HandlerError::Processing("output writer lock poisoned".to_owned()))?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> EventHandler for PrintingHandler<W> {
    async fn on_event(
        &self,
        ctx: &PartitionContext,
        event: ReceivedEvent,
    ) -> Result<(), HandlerError> {
        self.print(&format_event_line(&event, ctx.partition_id()))?;
        ctx.update_checkpoint(&event).await?;
        Ok(())
    }
}
