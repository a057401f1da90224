use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use trirpc_common::config::{
    TlsMaterialPath, DEFAULT_DRAIN_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, LOOPBACK_PORT, SOCKET_PATH,
    TLS_PORT,
};

/// Where the server listens and how long it waits while shutting down
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Plaintext listener, must be a loopback address
    pub loopback_addr:     SocketAddr,
    /// Mutual-TLS listener
    pub public_addr:       SocketAddr,
    /// Local socket path; a leading `@` selects the abstract namespace
    pub socket_path:       String,
    pub tls:               TlsMaterialPath,
    pub drain_timeout:     Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            loopback_addr:     SocketAddr::from((Ipv4Addr::LOCALHOST, LOOPBACK_PORT)),
            public_addr:       SocketAddr::from((Ipv4Addr::UNSPECIFIED, TLS_PORT)),
            socket_path:       SOCKET_PATH.to_string(),
            tls:               TlsMaterialPath::server(),
            drain_timeout:     DEFAULT_DRAIN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Create a config with the well-known endpoints
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the plaintext loopback address
    pub fn with_loopback_addr(mut self, addr: SocketAddr) -> Self {
        self.loopback_addr = addr;
        self
    }

    /// Set the mutual-TLS address
    pub fn with_public_addr(mut self, addr: SocketAddr) -> Self {
        self.public_addr = addr;
        self
    }

    /// Set the local socket path
    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set where the server certificate and key are read from
    pub fn with_tls(mut self, tls: TlsMaterialPath) -> Self {
        self.tls = tls;
        self
    }

    /// Set how long in-flight requests may run after shutdown begins
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the deadline for a TLS handshake to complete
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
