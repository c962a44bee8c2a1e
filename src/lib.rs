//! # imagegram
//!
//! Queue-backed ingestion for ImageGram posts and comments.
//!
//! Producers validate create requests and enqueue them (pgmq). Workers
//! decode each message, apply its effect (image blob upload, table upsert)
//! and, on failure, schedule a delayed redelivery stamped with an overall
//! deadline; messages that outlive the deadline go to a dead-letter queue.

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod model;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod telemetry;
pub mod worker;
