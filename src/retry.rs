//! Retry policy and the retry coordinator.
//!
//! A failed delivery is turned into either a renewed envelope scheduled for
//! later delivery, or a dead-letter decision. The only state carried between
//! attempts is the `ExpirationDateTime` property: an absolute deadline set on
//! the first failure and copied unchanged onto every retry. No attempt
//! counter is kept, so the decision can be recomputed from the envelope alone.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::envelope::Envelope;

/// Property holding the message's fixed deadline, in ticks.
pub const EXPIRATION_PROPERTY: &str = "ExpirationDateTime";

/// 100ns ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Process-wide retry timing. Loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before a failed message is redelivered.
    pub next_attempt_delay: Duration,
    /// Total time a message may keep retrying, measured from its first failure.
    pub overall_timeout: Duration,
}

impl RetryConfig {
    pub fn new(next_attempt_delay: Duration, overall_timeout: Duration) -> Self {
        Self {
            next_attempt_delay,
            overall_timeout,
        }
    }

    pub fn from_secs(next_attempt_delay_secs: u64, overall_timeout_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(next_attempt_delay_secs),
            Duration::from_secs(overall_timeout_secs),
        )
    }

    pub fn next_attempt_delay(&self) -> Duration {
        self.next_attempt_delay
    }

    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_secs(30, 300)
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Why a message is being abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The deadline carried by the message has passed.
    Expired { expired_at: DateTime<Utc> },
    /// The deadline property exists but cannot be read.
    MalformedMarker(String),
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadLetterReason::Expired { expired_at } => {
                write!(f, "retry deadline {expired_at} has passed")
            }
            DeadLetterReason::MalformedMarker(raw) => {
                write!(f, "unreadable {EXPIRATION_PROPERTY} marker: {raw}")
            }
        }
    }
}

/// Outcome of [`RetryCoordinator::prepare_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Re-enqueue this envelope; it carries the deadline and a scheduled time.
    Retry(Envelope),
    /// Route the original envelope to the dead-letter sink.
    DeadLetter(DeadLetterReason),
}

impl RetryDecision {
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            RetryDecision::Retry(envelope) => Some(envelope),
            RetryDecision::DeadLetter(_) => None,
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        matches!(self, RetryDecision::DeadLetter(_))
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Decides what happens to a failed delivery. Holds no mutable state.
#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    config: RetryConfig,
}

impl RetryCoordinator {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide against the current wall clock.
    pub fn prepare_retry(&self, failed: &Envelope) -> RetryDecision {
        self.prepare_retry_at(failed, Utc::now())
    }

    /// Decide as of `now`.
    ///
    /// Only the body and the expiration marker move to the renewed envelope.
    /// A marker at or before `now`, or one that cannot be parsed, yields
    /// [`RetryDecision::DeadLetter`].
    pub fn prepare_retry_at(&self, failed: &Envelope, now: DateTime<Utc>) -> RetryDecision {
        let mut renewed = Envelope::with_body(failed.body.clone());

        match failed.property(EXPIRATION_PROPERTY) {
            Some(marker) => {
                renewed.set_property(EXPIRATION_PROPERTY, marker.clone());
                let expires_at = match marker_to_datetime(marker) {
                    Some(at) => at,
                    None => {
                        return RetryDecision::DeadLetter(DeadLetterReason::MalformedMarker(
                            marker.to_string(),
                        ));
                    }
                };
                if expires_at <= now {
                    return RetryDecision::DeadLetter(DeadLetterReason::Expired {
                        expired_at: expires_at,
                    });
                }
            }
            None => {
                let expires_at = add_duration(now, self.config.overall_timeout);
                renewed.set_property(EXPIRATION_PROPERTY, to_ticks(expires_at));
            }
        }

        renewed.scheduled_time = Some(add_duration(now, self.config.next_attempt_delay));
        RetryDecision::Retry(renewed)
    }
}

/// Read the deadline of an envelope, if it carries a valid one.
pub fn expiration_of(envelope: &Envelope) -> Option<DateTime<Utc>> {
    envelope
        .property(EXPIRATION_PROPERTY)
        .and_then(marker_to_datetime)
}

fn marker_to_datetime(marker: &serde_json::Value) -> Option<DateTime<Utc>> {
    let ticks = match marker {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    from_ticks(ticks)
}

fn add_duration(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

/// Convert a UTC instant to 100ns ticks since 0001-01-01T00:00:00Z.
pub fn to_ticks(at: DateTime<Utc>) -> i64 {
    at.timestamp()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(UNIX_EPOCH_TICKS)
        .saturating_add(i64::from(at.timestamp_subsec_nanos() / 100))
}

/// Inverse of [`to_ticks`]. `None` if out of chrono's range.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_tick_offset() {
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(to_ticks(epoch), UNIX_EPOCH_TICKS);
        assert_eq!(from_ticks(UNIX_EPOCH_TICKS), Some(epoch));
    }

    #[test]
    fn ticks_keep_100ns_precision() {
        let at = DateTime::from_timestamp(1_700_000_000, 123_456_700).unwrap();
        assert_eq!(from_ticks(to_ticks(at)), Some(at));
    }
}
