//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database URL so callers don't
//! need a direct dependency to expose it.

pub use secrecy::{ExposeSecret, SecretString};
