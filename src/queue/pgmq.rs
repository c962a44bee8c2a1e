//! pgmq-backed transport.
//!
//! Envelopes are stored as `{"body": <text>, "properties": {...}}`. The
//! scheduled time becomes a pgmq send delay; acknowledging archives the
//! message; dead letters go to a sibling `<name>_dlq` queue.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Delivery, QueueTransport, dead_letter_queue_name};
use crate::db::Db;
use crate::envelope::Envelope;
use crate::error::{Error, Result};

/// Wire shape of an envelope inside a pgmq message.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEnvelope {
    body: String,
    #[serde(default)]
    properties: std::collections::HashMap<String, serde_json::Value>,
}

impl StoredEnvelope {
    fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let body = String::from_utf8(envelope.body.clone())
            .map_err(|e| Error::Codec(format!("envelope body is not utf-8: {e}")))?;
        Ok(Self {
            body,
            properties: envelope.properties.clone(),
        })
    }

    fn into_envelope(self) -> Envelope {
        Envelope {
            body: self.body.into_bytes(),
            properties: self.properties,
            scheduled_time: None,
        }
    }
}

/// Seconds from now until the envelope may be delivered, floored at zero.
fn delay_seconds(envelope: &Envelope) -> i32 {
    delay_seconds_at(envelope, Utc::now())
}

/// Rounds up so a deferred message is never visible before its scheduled
/// time.
fn delay_seconds_at(envelope: &Envelope, now: DateTime<Utc>) -> i32 {
    envelope
        .scheduled_time
        .map(|at| {
            let ms = (at - now).num_milliseconds().max(0);
            ((ms + 999) / 1000).min(i64::from(i32::MAX)) as i32
        })
        .unwrap_or(0)
}

pub struct PgmqQueue {
    db: Arc<Db>,
    name: String,
    dead_letter_name: String,
}

impl PgmqQueue {
    pub fn new(db: Arc<Db>, name: impl Into<String>) -> Self {
        let name = name.into();
        let dead_letter_name = dead_letter_queue_name(&name);
        Self {
            db,
            name,
            dead_letter_name,
        }
    }

    pub fn dead_letter_name(&self) -> &str {
        &self.dead_letter_name
    }

    /// Create the queue and its dead-letter queue (idempotent).
    pub async fn ensure_queues(&self) -> Result<()> {
        self.db.create_queue(&self.name).await?;
        self.db.create_queue(&self.dead_letter_name).await?;
        Ok(())
    }

    /// Number of dead-lettered messages waiting for an operator.
    pub async fn dead_letter_count(&self) -> Result<i64> {
        self.db.queue_length(&self.dead_letter_name).await
    }
}

#[async_trait]
impl QueueTransport for PgmqQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>> {
        let Some(msg) = self
            .db
            .read_from_queue(&self.name, visibility_timeout_secs)
            .await?
        else {
            return Ok(None);
        };

        // A foreign message is handed on as a raw body so the processor's
        // decode failure routes it through retry and dead-lettering.
        let envelope = match serde_json::from_value::<StoredEnvelope>(msg.message.clone()) {
            Ok(stored) => stored.into_envelope(),
            Err(e) => {
                warn!(queue = %self.name, msg_id = msg.msg_id, "message is not an envelope: {e}");
                Envelope::with_body(msg.message.to_string())
            }
        };

        Ok(Some(Delivery {
            id: msg.msg_id,
            read_count: msg.read_ct,
            envelope,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.db.archive_message(&self.name, delivery.id).await
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<i64> {
        let stored = serde_json::to_value(StoredEnvelope::from_envelope(&envelope)?)?;
        self.db
            .send_to_queue(&self.name, &stored, delay_seconds(&envelope))
            .await
    }

    async fn dead_letter(&self, envelope: &Envelope) -> Result<()> {
        let stored = serde_json::to_value(StoredEnvelope::from_envelope(envelope)?)?;
        self.db
            .send_to_queue(&self.dead_letter_name, &stored, 0)
            .await?;
        Ok(())
    }
}
