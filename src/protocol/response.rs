//! Diagnostic Response Document
//!
//! Every served connection receives the same shape of response: a minimal
//! HTTP/1.1 200 envelope around an HTML fragment naming the peer's address
//! and the local host name.

use std::net::SocketAddr;

use super::constants::{FALLBACK_HOST_NAME, HEADER_TERMINATOR};

/// True once `data` ends with the header terminator.
pub fn headers_complete(data: &[u8]) -> bool {
    data.ends_with(HEADER_TERMINATOR)
}

/// Render the reflection page for one peer.
pub fn reflection_page(peer: SocketAddr, host_name: &str) -> String {
    format!(
        "<p>host ip: {}:{}</p>\n\
         <p>host name: {}</p>\n\
         <p>request</p>\n\
         \r\n",
        peer.ip(),
        peer.port(),
        host_name
    )
}

/// Wrap a body in the fixed HTTP/1.1 200 envelope.
///
/// The `Content-Length` header carries the exact byte length of the body.
pub fn http_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Connection: keep-alive\r\n\
         Content-Length: {}\r\n\r\n\
         {}",
        body.len(),
        body
    )
}

/// Local host name for the reflection page.
///
/// Reads `/etc/hostname`, falling back to the `HOSTNAME` environment
/// variable and finally to a fixed name.
pub fn host_name() -> String {
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }

    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_HOST_NAME.to_string())
}
