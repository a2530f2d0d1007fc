//! The two C5 `Transport` implementations: a reqwest HTTP client against the
//! relay's wire protocol, and a disabled stub for signed-out operation.

mod disabled;
mod http;

pub use disabled::DisabledTransport;
pub use http::HttpTransport;
