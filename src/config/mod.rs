//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or a
//! number doesn't parse. A TOML file can override the retry, storage and
//! worker sections. Sensitive values wrapped in secrecy::SecretString to
//! prevent log leaks.

pub mod secrets;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Time a delivery's visibility timeout must leave after the effect
/// timeout for the retry enqueue or dead-letter call and the ack.
pub const VISIBILITY_HEADROOM: Duration = Duration::from_secs(10);

/// Where uploaded images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root directory of the filesystem blob store.
    pub blob_root: PathBuf,
    /// Container (subdirectory) for post images.
    pub posted_images_container: String,
}

/// Consumer loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Upper bound on one domain effect (blob upload, table write).
    pub effect_timeout: Duration,
    /// How long a received message stays hidden from other workers. Must
    /// cover `effect_timeout` plus [`VISIBILITY_HEADROOM`].
    pub visibility_timeout: Duration,
    /// Worker instances per queue.
    pub workers_per_queue: usize,
}

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub worker: WorkerSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            retry: RetryConfig::from_secs(
                parsed_var("RETRY_NEXT_ATTEMPT_DELAY_SECS", 30)?,
                parsed_var("RETRY_OVERALL_TIMEOUT_SECS", 300)?,
            ),
            storage: StorageConfig {
                blob_root: std::env::var("BLOB_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./blobs")),
                posted_images_container: std::env::var("POSTED_IMAGES_CONTAINER")
                    .unwrap_or_else(|_| "posted-images".to_string()),
            },
            worker: WorkerSettings {
                effect_timeout: Duration::from_secs(parsed_var("EFFECT_TIMEOUT_SECS", 30)?),
                visibility_timeout: Duration::from_secs(parsed_var(
                    "VISIBILITY_TIMEOUT_SECS",
                    60,
                )?),
                workers_per_queue: parsed_var("WORKERS_PER_QUEUE", 2)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which a message could become visible again
    /// while a worker is still handling it.
    pub fn validate(&self) -> Result<()> {
        let worker = &self.worker;
        if worker.visibility_timeout.as_secs() > i32::MAX as u64 {
            return Err(Error::Config(format!(
                "visibility timeout of {}s is too large",
                worker.visibility_timeout.as_secs()
            )));
        }
        if worker.effect_timeout + VISIBILITY_HEADROOM > worker.visibility_timeout {
            return Err(Error::Config(format!(
                "visibility timeout ({}s) must be at least the effect timeout ({}s) plus {}s",
                worker.visibility_timeout.as_secs(),
                worker.effect_timeout.as_secs(),
                VISIBILITY_HEADROOM.as_secs()
            )));
        }
        Ok(())
    }

    /// Override sections from a TOML file. Keys absent from the file keep
    /// their current values.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        self.apply_toml(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    /// Override sections from TOML text.
    pub fn apply_toml(&mut self, content: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        if let Some(retry) = file.retry {
            if let Some(secs) = retry.next_attempt_delay_secs {
                self.retry.next_attempt_delay = Duration::from_secs(secs);
            }
            if let Some(secs) = retry.overall_timeout_secs {
                self.retry.overall_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(storage) = file.storage {
            if let Some(root) = storage.blob_root {
                self.storage.blob_root = root;
            }
            if let Some(container) = storage.posted_images_container {
                self.storage.posted_images_container = container;
            }
        }
        if let Some(worker) = file.worker {
            if let Some(secs) = worker.effect_timeout_secs {
                self.worker.effect_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = worker.visibility_timeout_secs {
                self.worker.visibility_timeout = Duration::from_secs(secs);
            }
            if let Some(n) = worker.workers_per_queue {
                self.worker.workers_per_queue = n;
            }
        }
        self.validate()
    }
}

/// Optional TOML overlay.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    retry: Option<RetrySection>,
    storage: Option<StorageSection>,
    worker: Option<WorkerSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrySection {
    next_attempt_delay_secs: Option<u64>,
    overall_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageSection {
    blob_root: Option<PathBuf>,
    posted_images_container: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerSection {
    effect_timeout_secs: Option<u64>,
    visibility_timeout_secs: Option<u64>,
    workers_per_queue: Option<usize>,
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("environment variable {name}={raw}: {e}"))),
        Err(_) => Ok(default),
    }
}
