//! TCP transport for peer sessions.
//!
//! Provides:
//! - Wire protocol (line-delimited JSON)
//! - `TcpServer` / `TcpClient` endpoints running on their own runtime
//! - `TcpConnector`, the default endpoint factory
//! - Socket policy responder for legacy plugin clients (feature: policy)

pub mod client;
pub mod connector;
pub mod protocol;
pub mod server;

mod connection;

#[cfg(feature = "policy")]
pub mod policy;

pub use client::TcpClient;
pub use connector::TcpConnector;
pub use protocol::FrameError;
pub use server::TcpServer;

#[cfg(test)]
pub(crate) mod testing;
