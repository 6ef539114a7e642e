//! Listener Loop Module
//!
//! The single-threaded accept/receive/respond cycle over a readiness
//! poller.

pub mod server;

pub use server::Listener;
