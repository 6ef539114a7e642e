//! Protocol Constants

/// Four-byte sequence marking the end of an HTTP header block.
pub const HEADER_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// Default size of the fixed receive buffer.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;

/// Host name used when none can be discovered.
pub const FALLBACK_HOST_NAME: &str = "localhost";
