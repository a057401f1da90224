//! trirpc Common Library
//!
//! This crate provides the pieces shared by the trirpc client and server:
//!
//! - Mutual-TLS configuration built from a leaf + CA certificate chain
//! - Local socket address normalization (abstract namespace vs. filesystem)
//! - The JSON-RPC envelope codec used on every transport
//! - Configuration constants and certificate locations
//!
//! # Features
//!
//! - **Mutual TLS**: both peers present certificates issued by the one CA
//!   embedded in the chain, over a single pinned cipher suite
//! - **Transport-agnostic envelopes**: the same bytes travel over loopback
//!   TCP, TLS, and local sockets
//! - **`test-util`**: a generated throwaway PKI for tests

/// Configuration constants and certificate locations
pub mod config;

/// Envelope codec
pub mod envelope;

pub mod error;

/// Local socket addressing
pub mod socket_addr;

/// Payload types of the demo method
pub mod summary;

/// TLS configurator
pub mod tls;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use config::{TlsMaterialPath, RPC_PATH, SOCKET_PATH};
pub use envelope::{RequestId, RpcError};
pub use error::{ConfigError, ProtocolError};
pub use socket_addr::SocketAddress;
pub use tls::TlsMaterial;
