//! Transport envelope and the JSON codec around it.
//!
//! An [`Envelope`] is what a queue stores and hands to a consumer: the
//! serialized payload, an open property bag that survives redelivery, and
//! an optional time before which the message must not be delivered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub body: Vec<u8>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl Envelope {
    /// A fresh envelope carrying only `body`.
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            properties: HashMap::new(),
            scheduled_time: None,
        }
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Body as text, lossy. For logging only.
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the body. See [`decode`].
    pub fn decode<T: DeserializeOwned + Default>(&self) -> Result<T> {
        decode(Some(self))
    }
}

/// Serialize `payload` as JSON into a new envelope with no properties.
pub fn encode<T: Serialize>(payload: &T) -> Result<Envelope> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| Error::Codec(format!("failed to encode payload: {e}")))?;
    Ok(Envelope::with_body(body))
}

/// Deserialize an envelope body.
///
/// A missing envelope or an empty body yields `T::default()` so callers can
/// tell "nothing to process" apart from a body of the wrong shape, which is
/// an [`Error::Codec`].
pub fn decode<T: DeserializeOwned + Default>(envelope: Option<&Envelope>) -> Result<T> {
    let Some(envelope) = envelope else {
        return Ok(T::default());
    };
    if envelope.body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&envelope.body)
        .map_err(|e| Error::Codec(format!("failed to decode payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn encode_starts_with_empty_properties() {
        let env = encode(&Sample {
            name: "x".to_string(),
        })
        .unwrap();
        assert!(env.properties.is_empty());
        assert!(env.scheduled_time.is_none());
        assert_eq!(env.body_text(), r#"{"name":"x"}"#);
    }

    #[test]
    fn empty_body_decodes_to_default() {
        let env = Envelope::with_body(Vec::new());
        assert_eq!(env.decode::<Sample>().unwrap(), Sample::default());
    }
}
