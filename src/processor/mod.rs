//! Message processors: decode → domain effect → commit-or-retry.
//!
//! [`MessageProcessor`] is the one orchestrator every queue uses; what
//! differs per queue is the [`DomainEffect`] plugged into it. Nothing that
//! goes wrong while handling one envelope escapes [`MessageProcessor::handle`]:
//! every outcome is reported as a [`Disposition`].

pub mod comment;
pub mod post;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::error::ProcessingError;
use crate::queue::QueueTransport;
use crate::retry::{DeadLetterReason, RetryCoordinator, RetryDecision, expiration_of};
use crate::telemetry::metrics;

pub use comment::CreateCommentEffect;
pub use post::CreatePostEffect;

/// The persistence step of one operation.
#[async_trait]
pub trait DomainEffect: Send + Sync {
    type Payload: DeserializeOwned + Default + Send + 'static;

    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    async fn apply(&self, payload: Self::Payload) -> Result<(), ProcessingError>;
}

/// What happened to one delivery.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// The effect was applied.
    Succeeded,
    /// A renewed envelope was enqueued for a later attempt.
    Retrying {
        error: ProcessingError,
        scheduled_for: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// The renewed envelope could not be enqueued.
    RetryEnqueueFailed {
        error: ProcessingError,
        enqueue_error: String,
    },
    /// The original envelope went to the dead-letter sink.
    DeadLettered {
        error: ProcessingError,
        reason: DeadLetterReason,
    },
    /// Routing to the dead-letter sink failed. The message is logged and
    /// dropped as lost.
    DeadLetterFailed {
        reason: DeadLetterReason,
        dead_letter_error: String,
    },
}

impl Disposition {
    /// Whether the delivery is fully handled and may be acknowledged.
    ///
    /// A failed re-enqueue leaves it to the transport's redelivery. A failed
    /// dead-letter does not: the message is past its deadline, so it is
    /// acknowledged as lost.
    pub fn settles_delivery(&self) -> bool {
        !matches!(self, Disposition::RetryEnqueueFailed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Succeeded => "succeeded",
            Disposition::Retrying { .. } => "retrying",
            Disposition::RetryEnqueueFailed { .. } => "retry_enqueue_failed",
            Disposition::DeadLettered { .. } => "dead_lettered",
            Disposition::DeadLetterFailed { .. } => "dead_letter_failed",
        }
    }
}

pub struct MessageProcessor<E, Q> {
    effect: E,
    queue: Q,
    coordinator: RetryCoordinator,
    effect_timeout: Duration,
}

impl<E, Q> MessageProcessor<E, Q>
where
    E: DomainEffect,
    Q: QueueTransport,
{
    /// `queue` is where retries are re-enqueued and dead letters routed;
    /// it is the queue this processor consumes from.
    pub fn new(effect: E, queue: Q, coordinator: RetryCoordinator, effect_timeout: Duration) -> Self {
        Self {
            effect,
            queue,
            coordinator,
            effect_timeout,
        }
    }

    pub fn effect(&self) -> &E {
        &self.effect
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    /// Handle one delivered envelope.
    pub async fn handle(&self, envelope: &Envelope) -> Disposition {
        let start = Instant::now();

        let disposition = match self.process(envelope).await {
            Ok(()) => {
                info!(effect = self.effect.name(), "message processed");
                Disposition::Succeeded
            }
            Err(error) => self.handle_failure(envelope, error).await,
        };

        let labels = [
            KeyValue::new("queue", self.queue.name().to_string()),
            KeyValue::new("effect", self.effect.name()),
            KeyValue::new("result", disposition.as_str()),
        ];
        metrics::messages_processed().add(1, &labels);
        metrics::processing_duration_ms().record(start.elapsed().as_secs_f64() * 1000.0, &labels);

        disposition
    }

    async fn process(&self, envelope: &Envelope) -> Result<(), ProcessingError> {
        if envelope.body.is_empty() {
            debug!(effect = self.effect.name(), "empty message, nothing to process");
            return Ok(());
        }
        let payload: E::Payload = envelope.decode().map_err(ProcessingError::decode)?;

        match tokio::time::timeout(self.effect_timeout, self.effect.apply(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::timeout(self.effect_timeout)),
        }
    }

    async fn handle_failure(&self, envelope: &Envelope, error: ProcessingError) -> Disposition {
        warn!(
            effect = self.effect.name(),
            kind = %error.kind,
            %error,
            "processing failed, preparing retry"
        );

        match self.coordinator.prepare_retry(envelope) {
            RetryDecision::Retry(renewed) => {
                let scheduled_for = renewed.scheduled_time;
                let expires_at = expiration_of(&renewed);
                match self.queue.enqueue(renewed).await {
                    Ok(msg_id) => {
                        info!(
                            effect = self.effect.name(),
                            msg_id,
                            scheduled_for = ?scheduled_for,
                            expires_at = ?expires_at,
                            "retry scheduled"
                        );
                        metrics::retries_scheduled().add(
                            1,
                            &[
                                KeyValue::new("queue", self.queue.name().to_string()),
                                KeyValue::new("kind", error.kind.as_str()),
                            ],
                        );
                        Disposition::Retrying {
                            error,
                            scheduled_for,
                            expires_at,
                        }
                    }
                    Err(e) => {
                        error!(effect = self.effect.name(), "failed to enqueue retry: {e}");
                        Disposition::RetryEnqueueFailed {
                            error,
                            enqueue_error: e.to_string(),
                        }
                    }
                }
            }
            RetryDecision::DeadLetter(reason) => {
                info!(
                    effect = self.effect.name(),
                    %reason,
                    body_bytes = envelope.body.len(),
                    "dead lettering message"
                );
                match self.queue.dead_letter(envelope).await {
                    Ok(()) => {
                        metrics::dead_lettered().add(
                            1,
                            &[KeyValue::new("queue", self.queue.name().to_string())],
                        );
                        Disposition::DeadLettered { error, reason }
                    }
                    Err(e) => {
                        error!(
                            effect = self.effect.name(),
                            %reason,
                            body = %envelope.body_text(),
                            "dead-letter routing failed, message lost: {e}"
                        );
                        metrics::messages_lost().add(
                            1,
                            &[KeyValue::new("queue", self.queue.name().to_string())],
                        );
                        Disposition::DeadLetterFailed {
                            reason,
                            dead_letter_error: e.to_string(),
                        }
                    }
                }
            }
        }
    }
}
