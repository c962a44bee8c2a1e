//! Integration tests for telemetry initialization and span helpers.

use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = imagegram::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "imagegram-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    if let Ok(guard) = imagegram::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn message_span_creates_and_records_disposition() {
    let span = imagegram::telemetry::message::start_message_span("process_create_post", 42, 1);
    imagegram::telemetry::message::record_state_transition(&span, "queued", "processing");
    imagegram::telemetry::message::record_disposition(&span, "succeeded");
    imagegram::telemetry::message::record_state_transition(&span, "processing", "acknowledged");
}

#[test]
fn metric_instruments_accept_measurements_without_provider() {
    use imagegram::telemetry::metrics;

    let labels = [KeyValue::new("queue", "process_create_post")];
    metrics::messages_submitted().add(1, &labels);
    metrics::messages_processed().add(1, &labels);
    metrics::retries_scheduled().add(1, &labels);
    metrics::dead_lettered().add(1, &labels);
    metrics::messages_lost().add(1, &labels);
    metrics::deliveries_interrupted().add(1, &labels);
    metrics::queue_operations().add(1, &labels);
    metrics::storage_writes().add(1, &labels);
    metrics::processing_duration_ms().record(12.5, &labels);
}
