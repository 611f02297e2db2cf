use std::time::Duration;
use thiserror::Error as ThisError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MUTATION_LOG_CAPACITY: usize = 1024;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, ThisError, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Resolved server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    /// 0 binds an ephemeral port.
    pub port: u16,
    /// Number of connections served at once, and the number of accepted connections that
    /// may wait for a free worker.
    pub max_connections: usize,
    /// How long a soft stop may take before connections are cancelled.
    pub shutdown_timeout: Duration,
    /// How long a command waits for the store before the connection gives up.
    pub lock_timeout: Duration,
    pub mutation_log_capacity: usize,
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            mutation_log_capacity: DEFAULT_MUTATION_LOG_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.mutation_log_capacity == 0 {
            return Err(ConfigError::Zero("mutation_log_capacity"));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Zero("max_frame_size"));
        }

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
