//! Response Protocol
//!
//! The fixed HTTP/1.1 response document and header-terminator detection.

pub mod constants;
pub mod response;

pub use constants::*;
pub use response::{headers_complete, host_name, http_response, reflection_page};
