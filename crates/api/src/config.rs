//! Server configuration from CLI flags and environment variables.
//!
//! ```bash
//! jobba-api --port 8080 --log-format pretty
//! JOBBA_PORT=8080 JOBBA_HOST=127.0.0.1 jobba-api
//! ```

use clap::Parser;
use thiserror::Error;

use jobba_observability::LogFormat;

/// Default cap on request bodies (1 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Parser)]
#[command(name = "jobba-api")]
#[command(about = "Background task server: schedule jobs and inspect their lifecycle over HTTP")]
#[command(version)]
pub struct ServerConfig {
    /// Host/IP to listen on
    #[arg(long, default_value = "0.0.0.0", env = "JOBBA_HOST")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "JOBBA_PORT")]
    pub port: u16,

    /// Log output format (json or pretty)
    #[arg(long, default_value = "json", env = "JOBBA_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Maximum accepted request body size in bytes
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT, env = "JOBBA_BODY_LIMIT")]
    pub body_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("port must be > 0")]
    ZeroPort,
    #[error("body limit must be > 0")]
    ZeroBodyLimit,
    #[error("host must not be empty")]
    EmptyHost,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_format: LogFormat::default(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Parse from the process arguments and environment.
    pub fn from_env() -> Self {
        Self::parse()
    }

    /// `host:port` to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.body_limit == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }
        Ok(())
    }
}
