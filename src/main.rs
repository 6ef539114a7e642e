//! Reflectd - Diagnostic TCP Listener
//!
//! Accepts TCP connections, reads until the end of the HTTP headers, and
//! answers every peer with a small HTML page naming the peer's address and
//! the local host name.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reflectd::{config::ConfigManager, Listener};

/// CLI arguments for Reflectd
#[derive(Parser, Debug)]
#[command(name = "reflectd")]
#[command(about = "Reflectd - Diagnostic TCP Listener")]
#[command(version)]
#[command(long_about = "
Reflectd - Diagnostic TCP Listener

Accepts TCP connections, reads until the end of the HTTP headers, and
answers every peer with a small HTML page naming the peer's address and
the local host name.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  REFLECTD_BIND_ADDR        - Bind address (e.g., 127.0.0.1)
  REFLECTD_SERVICE          - Port to listen on (e.g., 8080)
  REFLECTD_BACKLOG          - Listen backlog depth
  REFLECTD_MAX_CONNECTIONS  - Maximum concurrent connections
  REFLECTD_BUFFER_SIZE      - Receive buffer size in bytes
  REFLECTD_POLL_TIMEOUT     - Optional readiness-wait timeout (e.g., 5s)
  REFLECTD_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Maximum number of concurrent connections
    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    /// Listen backlog depth
    #[arg(long, help = "Listen backlog depth")]
    pub backlog: Option<u32>,

    /// Receive buffer size in bytes
    #[arg(long, help = "Receive buffer size in bytes")]
    pub buffer_size: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!(
        "Starting Reflectd v{} - Diagnostic TCP Listener",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.backlog,
        args.buffer_size,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!(
            "  Bind address: {}:{}",
            config.server.bind_addr, config.server.service
        );
        info!("  Backlog: {}", config.server.backlog);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Receive buffer: {} bytes", config.server.recv_buffer_size);
        match config.server.poll_timeout {
            Some(timeout) => info!("  Poll timeout: {:?}", timeout),
            None => info!("  Poll timeout: none"),
        }
        return Ok(());
    }

    info!("Configuration loaded successfully");
    info!(
        "Bind address: {}:{}",
        config.server.bind_addr, config.server.service
    );
    info!("Max connections: {}", config.server.max_connections);

    let config = Arc::new(config);
    let mut listener = Listener::new(Arc::clone(&config))?;

    listener.bind(&config.server.bind_addr, &config.server.service)?;
    listener.listen(config.server.backlog)?;

    info!("Reflectd started successfully");
    info!("Press Ctrl+C to stop");

    // The loop has no cancellation path; process termination ends it.
    listener.run()
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
