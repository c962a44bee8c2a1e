//! Message handling span helpers.
//!
//! One span per delivery, with state-transition events recorded inside it.

use tracing::Span;

/// Start a span for handling one delivery.
///
/// The `message.disposition` field is declared empty and filled in by
/// [`record_disposition`].
pub fn start_message_span(queue: &str, msg_id: i64, read_count: i32) -> Span {
    tracing::info_span!(
        "message.process",
        "messaging.destination.name" = queue,
        "messaging.message.id" = msg_id,
        "message.read_count" = read_count,
        "message.disposition" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

/// Record how the delivery ended.
pub fn record_disposition(span: &Span, disposition: &str) {
    span.record("message.disposition", disposition);
}
