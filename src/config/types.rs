//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::DEFAULT_RECV_BUFFER_SIZE;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the listening socket binds to (host or IP, without port)
    pub bind_addr: String,
    /// Numeric port the listening socket binds to
    pub service: String,
    /// Listen backlog depth
    pub backlog: u32,
    /// Maximum number of concurrently tracked peer connections
    pub max_connections: usize,
    /// Size of the fixed receive buffer
    pub recv_buffer_size: usize,
    /// Optional readiness-wait timeout; unset means block indefinitely
    #[serde(default, with = "humantime_serde")]
    pub poll_timeout: Option<Duration>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1".to_string(),
                service: "8080".to_string(),
                backlog: 64,
                max_connections: 1024,
                recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
                poll_timeout: None,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
