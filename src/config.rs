//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one engine instance
///
/// Deserializable so a host application can keep it in its own config file:
///
/// ```json
/// { "cache_time_seconds": 300, "coalesce_in_flight": true }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a cached entry stays fresh; `None` keeps entries until cleared
    pub cache_time_seconds: Option<u64>,
    /// Let concurrent non-bypassing calls for one key share a single fetch
    pub coalesce_in_flight: bool,
}

impl EngineConfig {
    /// The configured TTL as a `Duration`
    pub fn cache_time(&self) -> Option<Duration> {
        self.cache_time_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert!(config.cache_time().is_none());
        assert!(!config.coalesce_in_flight);
    }

    #[test]
    fn test_engine_config_from_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{ "cache_time_seconds": 90 }"#)
            .expect("partial config should deserialize");

        assert_eq!(config.cache_time(), Some(Duration::from_secs(90)));
        assert!(!config.coalesce_in_flight);
    }

    #[test]
    fn test_engine_config_from_empty_json() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
