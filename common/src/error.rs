use std::{io, net::SocketAddr, path::PathBuf};

use crate::envelope::{codes, RpcError};

/// Problems with TLS material or listener configuration. Always fatal at
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse certificate chain: {0}")]
    Certificates(#[source] io::Error),

    #[error(
        "certificate file should hold 2 concatenated certificates (leaf + CA), found {found}"
    )]
    ChainLength { found: usize },

    #[error("CA certificate is not usable as a trust anchor: {0}")]
    InvalidCa(#[source] rustls::Error),

    #[error("failed to parse private key: {0}")]
    KeyMaterial(#[source] io::Error),

    #[error("no private key found")]
    MissingKey,

    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),

    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid server name {0:?}")]
    ServerName(String),

    #[error("{0} is not a loopback address")]
    NotLoopback(SocketAddr),
}

/// Envelope-level failures. On the server these are answered with an error
/// envelope; on the client they are returned from the call.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote error: {0}")]
    Remote(RpcError),

    #[error("protocol violation: {0}")]
    Violation(String),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
}

impl ProtocolError {
    /// The error object a server sends back for this failure
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Decode(_) => RpcError::new(codes::PARSE_ERROR, self.to_string()),
            Self::InvalidRequest(_) => RpcError::new(codes::INVALID_REQUEST, self.to_string()),
            Self::Remote(error) => error.clone(),
            _ => RpcError::new(codes::INTERNAL_ERROR, self.to_string()),
        }
    }

    /// The server-supplied error, if this is one
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            Self::Remote(error) => Some(error),
            _ => None,
        }
    }
}
