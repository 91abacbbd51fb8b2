//! Renderer configuration
//!
//! Both halves of the renderer are configured by plain structs with
//! defaults and builder methods; the pair can also be loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::PipelineConfig;
use crate::receiver::RaopConfig;

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// RAOP protocol settings
    pub raop: RaopConfig,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
}

impl RendererConfig {
    /// Parse from JSON; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns `RendererError::Config` if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns `RendererError::Config` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Serde helper storing a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RendererConfig::from_json(r#"{"raop": {"drain_timeout": 2500}}"#).unwrap();
        assert_eq!(config.raop.drain_timeout, Duration::from_millis(2500));
        assert_eq!(config.raop.repair_capacity, RaopConfig::default().repair_capacity);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = RendererConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(RendererConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_malformed_json() {
        let err = RendererConfig::from_json("{").unwrap_err();
        assert!(!err.is_recoverable());
    }
}
