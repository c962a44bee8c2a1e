//! Error types for imagegram.
//!
//! [`Error`] is the crate-wide error for plumbing (config, database, queue,
//! storage). [`ProcessingError`] is what a message processor reports when a
//! delivery fails; the retry path only looks at its kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single delivery could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingErrorKind {
    /// Body did not match the expected payload shape.
    Decode,
    /// A storage collaborator failed.
    DomainEffect,
    /// The domain effect did not finish within the configured timeout.
    Timeout,
}

impl ProcessingErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingErrorKind::Decode => "decode",
            ProcessingErrorKind::DomainEffect => "domain_effect",
            ProcessingErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ProcessingErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} failure: {message}")]
pub struct ProcessingError {
    pub kind: ProcessingErrorKind,
    pub message: String,
}

impl ProcessingError {
    pub fn new(kind: ProcessingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::new(ProcessingErrorKind::Decode, err.to_string())
    }

    pub fn domain_effect(err: impl std::fmt::Display) -> Self {
        Self::new(ProcessingErrorKind::DomainEffect, err.to_string())
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::new(
            ProcessingErrorKind::Timeout,
            format!("domain effect did not finish within {}ms", after.as_millis()),
        )
    }
}
