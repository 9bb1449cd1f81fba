use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Per-call entry ceiling of the durable queue's batch send.
pub const MAX_BATCH_SIZE: usize = 10;

/// One message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Caller-side id, echoed back in the batch outcome. The job id.
    pub entry_id: String,
    pub body: String,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub entry_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub entry_id: String,
    pub error: String,
}

/// Result of one batch send: entries can fail individually.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendBatchOutcome {
    pub successful: Vec<SentMessage>,
    pub failed: Vec<FailedEntry>,
}

/// A message claimed from the queue and hidden from other consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Token for [`QueueProvider::ack`]/[`QueueProvider::nack`]; changes on every receive.
    pub receipt_handle: String,
    pub body: String,
    /// Deliveries so far, this one included.
    pub receive_count: u32,
}

/// At-least-once durable queue.
///
/// A received message stays invisible to other consumers until it is acked,
/// nacked, or its visibility timeout lapses, after which it is redelivered.
pub trait QueueProvider: Send + Sync + Clone {
    /// Sends up to [`MAX_BATCH_SIZE`] messages in one call.
    fn send_batch(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> impl Future<Output = Result<SendBatchOutcome, AppError>> + Send;

    /// Claims the next visible message, if any.
    fn receive(&self) -> impl Future<Output = Result<Option<ReceivedMessage>, AppError>> + Send;

    /// Deletes a processed message.
    fn ack(&self, receipt_handle: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Makes a message visible again after `delay`.
    fn nack(
        &self,
        receipt_handle: &str,
        delay: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
