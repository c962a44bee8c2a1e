//! In-process queue with the same delivery rules as pgmq.
//!
//! Scheduled envelopes stay invisible until their time; received messages
//! are hidden for the visibility timeout and reappear if never acknowledged.
//! Failure switches let tests exercise the re-enqueue and dead-letter
//! error paths.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use super::{Delivery, QueueTransport};
use crate::envelope::Envelope;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Stored {
    id: i64,
    read_count: i32,
    visible_at: DateTime<Utc>,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    ready: Vec<Stored>,
    in_flight: BTreeMap<i64, Stored>,
    dead_letters: Vec<Envelope>,
    acked: usize,
}

#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    inner: Mutex<Inner>,
    fail_enqueue: AtomicBool,
    fail_dead_letter: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            fail_enqueue: AtomicBool::new(false),
            fail_dead_letter: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `enqueue` fail.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `dead_letter` fail.
    pub fn set_fail_dead_letter(&self, fail: bool) {
        self.fail_dead_letter.store(fail, Ordering::SeqCst);
    }

    /// Envelopes waiting for delivery, including scheduled ones.
    pub fn pending(&self) -> Vec<Envelope> {
        self.lock()
            .map(|inner| inner.ready.iter().map(|s| s.envelope.clone()).collect())
            .unwrap_or_default()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().map(|inner| inner.in_flight.len()).unwrap_or(0)
    }

    pub fn acked_count(&self) -> usize {
        self.lock().map(|inner| inner.acked).unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<Envelope> {
        self.lock()
            .map(|inner| inner.dead_letters.clone())
            .unwrap_or_default()
    }

    /// Receive as of `now`, for tests that step the clock themselves.
    pub fn receive_at(
        &self,
        visibility_timeout_secs: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        let mut inner = self.lock()?;

        // Unacknowledged deliveries whose visibility timeout ran out come back.
        let expired: Vec<i64> = inner
            .in_flight
            .values()
            .filter(|s| s.visible_at <= now)
            .map(|s| s.id)
            .collect();
        for id in expired {
            if let Some(stored) = inner.in_flight.remove(&id) {
                inner.ready.push(stored);
            }
        }
        inner.ready.sort_by_key(|s| (s.visible_at, s.id));

        let Some(pos) = inner.ready.iter().position(|s| s.visible_at <= now) else {
            return Ok(None);
        };
        let mut stored = inner.ready.remove(pos);
        stored.read_count += 1;
        stored.visible_at = now + TimeDelta::seconds(i64::from(visibility_timeout_secs.max(0)));

        let mut envelope = stored.envelope.clone();
        envelope.scheduled_time = None;
        let delivery = Delivery {
            id: stored.id,
            read_count: stored.read_count,
            envelope,
        };
        inner.in_flight.insert(stored.id, stored);
        Ok(Some(delivery))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Queue(format!("queue {} lock poisoned", self.name)))
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, visibility_timeout_secs: i32) -> Result<Option<Delivery>> {
        self.receive_at(visibility_timeout_secs, Utc::now())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_flight.remove(&delivery.id).is_none() {
            return Err(Error::Queue(format!(
                "message {} is not in flight on {}",
                delivery.id, self.name
            )));
        }
        inner.acked += 1;
        Ok(())
    }

    async fn enqueue(&self, envelope: Envelope) -> Result<i64> {
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(Error::Queue(format!("enqueue to {} refused", self.name)));
        }
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.ready.push(Stored {
            id,
            read_count: 0,
            visible_at: envelope.scheduled_time.unwrap_or_else(Utc::now),
            envelope,
        });
        Ok(id)
    }

    async fn dead_letter(&self, envelope: &Envelope) -> Result<()> {
        if self.fail_dead_letter.load(Ordering::SeqCst) {
            return Err(Error::Queue(format!(
                "dead-letter sink for {} unavailable",
                self.name
            )));
        }
        self.lock()?.dead_letters.push(envelope.clone());
        Ok(())
    }
}
