//! Reflectd Library
//!
//! Single-threaded diagnostic TCP listener: accepts connections, reads
//! until the end of the HTTP headers, and answers every peer with a fixed
//! HTML page naming the peer's address and the local host name.

pub mod config;
pub mod connection;
pub mod listener;
pub mod poller;
pub mod protocol;

pub use config::Config;
pub use connection::{Connection, ConnectionSet};
pub use listener::Listener;
pub use poller::{MioPoller, Poller};

/// Common error type for the listener
pub type Result<T> = anyhow::Result<T>;
