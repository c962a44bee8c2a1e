//! Metric instrument factories for imagegram.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"imagegram"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for imagegram instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("imagegram")
}

/// Counter: requests accepted or rejected at the producer boundary.
/// Labels: `operation`, `result` ("created" | "bad_request").
pub fn messages_submitted() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.submitted")
        .with_description("Number of create requests seen by the producer")
        .build()
}

/// Counter: deliveries handled by a processor.
/// Labels: `queue`, `effect`, `result` (disposition).
pub fn messages_processed() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.processed")
        .with_description("Number of deliveries handled, by disposition")
        .build()
}

/// Counter: renewed envelopes enqueued for a later attempt.
/// Labels: `queue`, `kind` (processing error kind).
pub fn retries_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.retries")
        .with_description("Number of retries scheduled")
        .build()
}

/// Counter: messages routed to a dead-letter queue.
/// Labels: `queue`.
pub fn dead_lettered() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.dead_lettered")
        .with_description("Number of messages dead-lettered")
        .build()
}

/// Counter: expired messages dropped because dead-letter routing failed.
/// Labels: `queue`.
pub fn messages_lost() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.lost")
        .with_description("Expired messages dropped after a failed dead-letter")
        .build()
}

/// Counter: deliveries abandoned unacknowledged because of shutdown.
/// Labels: `queue`.
pub fn deliveries_interrupted() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.messages.interrupted")
        .with_description("Deliveries left for redelivery at shutdown")
        .build()
}

/// Counter: queue-level operations (send, read, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: writes to blob and table storage.
/// Labels: `store` ("blob" | "table"), `target` (container or table).
pub fn storage_writes() -> Counter<u64> {
    meter()
        .u64_counter("imagegram.storage.writes")
        .with_description("Number of storage writes")
        .build()
}

/// Histogram: time to handle one delivery, in milliseconds.
/// Labels: `queue`, `effect`, `result`.
pub fn processing_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("imagegram.processing.duration_ms")
        .with_description("Delivery handling duration in milliseconds")
        .with_unit("ms")
        .build()
}
