//! Connection settings
//!
//! ```toml
//! base_url = "http://localhost:5000/api/v1"
//! token = "..."
//! request_timeout_secs = 10
//! ```

use crate::error::HttpError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Where and how to reach the REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// API root, including the version prefix
    pub base_url: String,
    /// Bearer token
    pub token: Option<String>,
    /// Per-request timeout; none by default
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/v1".to_string(),
            token: None,
            request_timeout_secs: None,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// - `HttpError::Parse` on malformed TOML
    /// - `HttpError::InvalidConfig` if the base url is empty
    pub fn from_toml_str(text: &str) -> Result<Self, HttpError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HttpError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// # Errors
    /// Returns `HttpError::InvalidConfig` on an empty base url or zero timeout
    pub fn validate(&self) -> Result<(), HttpError> {
        if self.base_url.trim().is_empty() {
            return Err(HttpError::InvalidConfig("base_url is empty".to_string()));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(HttpError::InvalidConfig(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_point_at_local_api() {
        let config = HttpConfig::default();
        assert_eq!(config.base_url, "http://localhost:5000/api/v1");
        assert!(config.token.is_none());
        assert!(config.timeout().is_none());
    }

    #[test]
    fn toml_overrides() {
        let config = HttpConfig::from_toml_str(
            "base_url = \"https://boards.example.com/api/v1\"\ntoken = \"abc\"\nrequest_timeout_secs = 5\n",
        )
        .unwrap();
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = HttpConfig::from_toml_str("request_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, HttpError::InvalidConfig(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "base_url = \"http://127.0.0.1:9/api/v1\"").unwrap();
        let config = HttpConfig::load(file.path()).unwrap();
        assert_eq!(config, HttpConfig::new("http://127.0.0.1:9/api/v1"));
    }
}
