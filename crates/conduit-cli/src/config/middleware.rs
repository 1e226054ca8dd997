//! Middleware configuration for the HTTP server.
//!
//! ```bash
//! conduit --cors-origins "https://example.com" --slow-request-threshold-ms 1000
//! ```
//!
//! The authorization rejection policy lives with the session settings in
//! the service group (`--auth-rejection`).

use anyhow::{Result as AnyhowResult, bail};
use clap::Args;
use conduit_server::middleware::{AccessLogConfig, CorsConfig};
use serde::{Deserialize, Serialize};

/// Middleware configuration combining CORS and access log settings.
#[derive(Debug, Clone, Args, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// CORS (Cross-Origin Resource Sharing) configuration.
    #[clap(flatten)]
    pub cors: CorsConfig,

    /// Access log configuration.
    #[clap(flatten)]
    pub access_log: AccessLogConfig,
}

impl MiddlewareConfig {
    /// Validates the middleware configuration.
    pub fn validate(&self) -> AnyhowResult<()> {
        if self.access_log.slow_request_threshold_ms == 0 {
            bail!("Slow request threshold must be at least 1 millisecond");
        }

        if let Some(path) = self
            .access_log
            .skip_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            bail!("Access log skip path {path:?} must start with '/'");
        }

        Ok(())
    }

    /// Logs middleware configuration at info level.
    pub fn log(&self) {
        self.cors.log();
        self.access_log.log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(skip_paths: &[&str]) -> MiddlewareConfig {
        MiddlewareConfig {
            cors: CorsConfig::default(),
            access_log: AccessLogConfig {
                skip_paths: skip_paths.iter().map(|p| (*p).to_owned()).collect(),
                ..AccessLogConfig::default()
            },
        }
    }

    #[test]
    fn skip_paths_must_be_absolute() {
        assert!(config(&["/echo"]).validate().is_ok());
        assert!(config(&["echo"]).validate().is_err());
    }
}
