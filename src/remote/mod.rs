//! Remote spreadsheet backend: typed procedures and the request bridge.
//!
//! Every call goes through [`Bridge`], which correlates the reply with a
//! per-call token, enforces a timeout and rejects HTML error pages. The wire
//! itself sits behind the [`Transport`] trait so the HTTP client can be swapped
//! for a scripted one in tests.

mod bridge;
mod error;
#[cfg(test)]
pub mod mock;
mod transport;
mod types;

pub use bridge::Bridge;
pub use error::BridgeError;
pub use transport::HttpTransport;
pub use types::{Dataset, RemoteOp};
