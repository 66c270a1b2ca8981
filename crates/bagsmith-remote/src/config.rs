use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_FETCH_MAX_BYTES: u64 = 1024 * 1024;

/// Limits applied to every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    /// Allow plain local paths and `file://` URLs.
    #[serde(default = "default_allow_local")]
    pub allow_local: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_bytes: DEFAULT_FETCH_MAX_BYTES,
            allow_local: true,
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn remote_only(mut self) -> Self {
        self.allow_local = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_max_bytes() -> u64 {
    DEFAULT_FETCH_MAX_BYTES
}

fn default_allow_local() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = FetchConfig::default();
        assert_eq!(c.timeout(), Duration::from_secs(10));
        assert_eq!(c.max_bytes, 1024 * 1024);
        assert!(c.allow_local);
    }

    #[test]
    fn builder_methods() {
        let c = FetchConfig::default()
            .with_timeout(Duration::from_millis(10))
            .with_max_bytes(5)
            .remote_only();
        assert_eq!(c.timeout_secs, 1);
        assert_eq!(c.max_bytes, 5);
        assert!(!c.allow_local);
    }

    #[test]
    fn deserializes_partial_toml() {
        let c: FetchConfig = toml::from_str("max_bytes = 42").unwrap();
        assert_eq!(c.max_bytes, 42);
        assert_eq!(c.timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<FetchConfig>("retries = 3").is_err());
    }
}
