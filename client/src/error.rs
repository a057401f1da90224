use std::{io, time::Duration};

use trirpc_common::{ProtocolError, RpcError};

/// The call never produced a response envelope
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {target} failed: {source}")]
    Handshake {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] http::Error),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a call failed. Network problems and remote errors are kept apart so
/// callers can retry one and not the other.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CallError {
    /// The error envelope the server answered with, if that is what happened
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            Self::Protocol(e) => e.remote(),
            Self::Transport(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote().is_some()
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
