//! Client configuration.

use qsync_core::{Error, Result};
use std::time::Duration;

/// Default bound on every remote call. A timeout is a failure, never an
/// indefinite block.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`crate::ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the authority's API, e.g. `http://localhost:8080/v2`
    pub base_url: String,

    /// Bearer credential presented on every call
    pub api_key: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with the default timeout.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read configuration from `QSYNC_API_URL`, `QSYNC_API_KEY` and
    /// optionally `QSYNC_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("QSYNC_API_URL")
            .map_err(|_| Error::Config("QSYNC_API_URL is not set".to_string()))?;
        let api_key = std::env::var("QSYNC_API_KEY")
            .map_err(|_| Error::Config("QSYNC_API_KEY is not set".to_string()))?;

        let mut config = Self::new(base_url, api_key);
        if let Ok(secs) = std::env::var("QSYNC_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| Error::Config(format!("invalid QSYNC_TIMEOUT_SECS: {secs}")))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
