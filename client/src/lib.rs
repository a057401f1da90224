//! trirpc Client Library
//!
//! Calls methods on a trirpc server over mutual TLS or over the server's
//! local socket. Each call is one request on its own connection; failures to
//! reach the server ([`TransportError`]) are reported separately from errors
//! the server answered with ([`CallError::remote`]).
//!
//! # Example
//!
//! ```no_run
//! use trirpc_client::{ClientConfig, RpcClient};
//! use trirpc_common::summary::{ServerSummary, ServerSummaryQuery, GET_SERVER_SUMMARY};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = RpcClient::local("@/tmp/server.sock", ClientConfig::new());
//! let summary: ServerSummary = client
//!     .call(GET_SERVER_SUMMARY, &ServerSummaryQuery::new("superserver"))
//!     .await?;
//! println!("{:?}", summary.qemu);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod error;

pub use client::*;
pub use error::{CallError, TransportError};
// Re-export important types from trirpc-common for convenience
pub use trirpc_common::{ProtocolError, RpcError, TlsMaterial, TlsMaterialPath};
