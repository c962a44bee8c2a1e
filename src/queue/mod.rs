//! Queue transport seen by producers and workers.
//!
//! The transport owns delivery: at-least-once, with deferred delivery via
//! [`Envelope::scheduled_time`] and a dead-letter sink per queue. Workers
//! acknowledge a delivery only once it has been fully handled; anything
//! left unacknowledged comes back after the visibility timeout.

pub mod memory;
pub mod pgmq;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::Result;

pub use memory::InMemoryQueue;
pub use pgmq::PgmqQueue;

/// Queue fed by create-post requests.
pub const CREATE_POST_QUEUE: &str = "process_create_post";

/// Queue fed by create-comment requests.
pub const CREATE_COMMENT_QUEUE: &str = "process_create_comments";

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}_dlq")
}

/// One delivery of a message to one consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Transport-assigned id, used to acknowledge.
    pub id: i64,
    /// How many times the transport has handed out this message.
    pub read_count: i32,
    pub envelope: Envelope,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Take the next visible message, hiding it for `visibility_timeout_secs`.
    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Enqueue an envelope, delayed until its scheduled time if it has one.
    async fn enqueue(&self, envelope: Envelope) -> Result<i64>;

    /// Move an envelope to this queue's dead-letter sink.
    async fn dead_letter(&self, envelope: &Envelope) -> Result<()>;
}

#[async_trait]
impl<T: QueueTransport + ?Sized> QueueTransport for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>> {
        (**self).receive(visibility_timeout_secs).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        (**self).ack(delivery).await
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<i64> {
        (**self).enqueue(envelope).await
    }

    async fn dead_letter(&self, envelope: &Envelope) -> Result<()> {
        (**self).dead_letter(envelope).await
    }
}
