use std::{io, path::PathBuf, time::Duration};

use trirpc_common::ConfigError;

/// A transport failed in a way that ends it. The orchestrator answers any of
/// these by cancelling every other transport.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid configuration for {endpoint}: {source}")]
    Config {
        endpoint: String,
        #[source]
        source:   ConfigError,
    },

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source:   io::Error,
    },

    #[error("failed to accept on {endpoint}: {source}")]
    Accept {
        endpoint: String,
        #[source]
        source:   io::Error,
    },
}

/// Problems while winding a transport down. Logged; the transport still
/// reaches `Closed`.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("drain of {endpoint} exceeded {timeout:?}, aborting {remaining} connection(s)")]
    DrainTimeout {
        endpoint:  String,
        timeout:   Duration,
        remaining: usize,
    },

    #[error("failed to remove socket file {path:?}: {source}")]
    SocketCleanup {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
}

/// First fatal error reported by any transport
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Transport(#[from] ServeError),

    #[error("transport task failed: {0}")]
    Task(String),
}
