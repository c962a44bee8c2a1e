//! Consumer loop: receive, hand to the processor, acknowledge.
//!
//! One [`Worker`] drains one queue. Clones share the processor and the
//! shutdown signal, so several can run against the same queue. A delivery
//! is acknowledged only once its [`Disposition`] settles it; a shutdown
//! signalled mid-delivery leaves it unacknowledged for the transport to
//! redeliver after the visibility timeout.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tracing::{Instrument, error, info, warn};

use crate::config::WorkerSettings;
use crate::error::Result;
use crate::processor::{Disposition, DomainEffect, MessageProcessor};
use crate::queue::QueueTransport;
use crate::telemetry::message::{record_disposition, record_state_transition, start_message_span};
use crate::telemetry::metrics;

/// Configuration for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Visibility timeout (seconds) for queue reads.
    pub visibility_timeout: i32,
    /// How long to sleep once the queue is drained.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            visibility_timeout: i32::try_from(settings.visibility_timeout.as_secs())
                .unwrap_or(i32::MAX),
            ..Self::default()
        }
    }
}

/// Result of one [`Worker::process_next`] call.
#[derive(Debug)]
pub enum Processed {
    /// Nothing visible on the queue.
    Empty,
    /// A delivery ran to a disposition.
    Handled(Disposition),
    /// Shutdown was signalled; any delivery in hand was left unacknowledged.
    Interrupted,
}

pub struct Worker<E, Q> {
    processor: Arc<MessageProcessor<E, Q>>,
    config: WorkerConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<E, Q> Clone for Worker<E, Q> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<E, Q> Worker<E, Q>
where
    E: DomainEffect,
    Q: QueueTransport,
{
    pub fn new(processor: MessageProcessor<E, Q>, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            processor: Arc::new(processor),
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn processor(&self) -> &MessageProcessor<E, Q> {
        &self.processor
    }

    /// Signal this worker and all its clones to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Drain the queue, then poll, until shutdown.
    pub async fn run(&self) {
        let queue = self.processor.queue().name().to_string();
        let mut shutdown = self.shutdown.subscribe();
        info!(%queue, effect = self.processor.effect().name(), "worker started");

        loop {
            loop {
                match self.process_next().await {
                    Ok(Processed::Handled(_)) => continue,
                    Ok(Processed::Empty) => break,
                    Ok(Processed::Interrupted) => {
                        info!(%queue, "worker stopped");
                        return;
                    }
                    Err(e) => {
                        error!(%queue, "process_next error: {e}");
                        break;
                    }
                }
            }

            tokio::select! {
                _ = stopped(&mut shutdown) => {
                    info!(%queue, "worker stopped");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Receive and handle at most one delivery.
    ///
    /// # Errors
    ///
    /// Only transport failures surface here (receive or ack). Everything the
    /// processor runs into is folded into the returned [`Disposition`].
    pub async fn process_next(&self) -> Result<Processed> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Ok(Processed::Interrupted);
        }

        let queue = self.processor.queue();
        let Some(delivery) = queue.receive(self.config.visibility_timeout).await? else {
            return Ok(Processed::Empty);
        };

        let span = start_message_span(queue.name(), delivery.id, delivery.read_count);
        record_state_transition(&span, "queued", "processing");

        let handled = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => None,
            disposition = self.processor.handle(&delivery.envelope).instrument(span.clone()) => {
                Some(disposition)
            }
        };

        let Some(disposition) = handled else {
            span.in_scope(|| {
                warn!(msg_id = delivery.id, "shutdown during processing, leaving for redelivery");
            });
            record_state_transition(&span, "processing", "interrupted");
            record_disposition(&span, "interrupted");
            metrics::deliveries_interrupted()
                .add(1, &[KeyValue::new("queue", queue.name().to_string())]);
            return Ok(Processed::Interrupted);
        };

        record_disposition(&span, disposition.as_str());
        if disposition.settles_delivery() {
            queue.ack(&delivery).await?;
            record_state_transition(&span, "processing", "acknowledged");
        } else {
            span.in_scope(|| {
                warn!(
                    msg_id = delivery.id,
                    disposition = disposition.as_str(),
                    "delivery left unacknowledged"
                );
            });
            record_state_transition(&span, "processing", "unacknowledged");
        }

        Ok(Processed::Handled(disposition))
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also counts as stop.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
