//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        // Override with environment variables if present
        if let Ok(bind_addr) = std::env::var("REFLECTD_BIND_ADDR") {
            config.server.bind_addr = bind_addr;
        }

        if let Ok(service) = std::env::var("REFLECTD_SERVICE") {
            config.server.service = service;
        }

        if let Ok(backlog) = std::env::var("REFLECTD_BACKLOG") {
            config.server.backlog = backlog
                .parse::<u32>()
                .with_context(|| format!("Invalid REFLECTD_BACKLOG: {}", backlog))?;
        }

        if let Ok(max_conn) = std::env::var("REFLECTD_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid REFLECTD_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(buffer_size) = std::env::var("REFLECTD_BUFFER_SIZE") {
            config.server.recv_buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid REFLECTD_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("REFLECTD_POLL_TIMEOUT") {
            config.server.poll_timeout = Some(
                humantime::parse_duration(&timeout)
                    .with_context(|| format!("Invalid REFLECTD_POLL_TIMEOUT: {}", timeout))?,
            );
        }

        if let Ok(log_level) = std::env::var("REFLECTD_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        if self.server.bind_addr.is_empty() {
            bail!("bind_addr must not be empty");
        }

        if self.server.service.is_empty() {
            bail!("service must not be empty");
        }

        if self.server.backlog == 0 {
            bail!("backlog must be greater than 0");
        }

        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        // The receive buffer must at least hold the header terminator.
        if self.server.recv_buffer_size < 4 {
            bail!("recv_buffer_size must be at least 4 bytes");
        }

        if self.server.recv_buffer_size > 1048576 {
            bail!("recv_buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        backlog: Option<u32>,
        buffer_size: Option<usize>,
    ) {
        // Override bind address if provided
        if let Some(bind_addr) = bind {
            self.server.bind_addr = bind_addr.to_string();
            tracing::info!("CLI override: bind address set to {}", bind_addr);
        }

        // Override port if provided
        if let Some(port) = port {
            self.server.service = port.to_string();
            tracing::info!("CLI override: port set to {}", port);
        }

        // Override max connections if provided
        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        // Override backlog if provided
        if let Some(backlog) = backlog {
            self.server.backlog = backlog;
            tracing::info!("CLI override: backlog set to {}", backlog);
        }

        // Override buffer size if provided
        if let Some(buffer_size) = buffer_size {
            self.server.recv_buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
