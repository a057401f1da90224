//! trirpc server.
//!
//! Serves one JSON-RPC endpoint, `POST /rpc/v1`, over three transports at
//! once:
//!
//! - plaintext HTTP on a loopback TCP address,
//! - mutual-TLS HTTP on a public TCP address,
//! - plaintext HTTP on a local socket (abstract namespace on Linux).
//!
//! All three share one [`MethodRegistry`] and one cancellation token; the
//! first transport to fail takes the others down with it.

use std::sync::Arc;

use axum::{middleware::from_fn, routing::post, Router};
use tokio_util::sync::CancellationToken;
use trirpc_common::{config::RPC_PATH, SocketAddress, TlsMaterial};

pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod middleware;
pub mod orchestrator;
pub mod registry;

pub use config::ServerConfig;
pub use error::{LifecycleError, OrchestrationError, ServeError};
pub use listener::{
    LifecycleState, Listener, LocalAddr, TransportEndpoint, TransportKind, ACCEPT_BACKOFF,
};
pub use orchestrator::Orchestrator;
pub use registry::{MethodError, MethodHandler, MethodRegistry};

/// Builds the HTTP surface shared by every transport.
pub fn router(registry: Arc<MethodRegistry>) -> Router {
    Router::new()
        .route(RPC_PATH, post(handler::handle_rpc))
        .layer(from_fn(middleware::log_request))
        .with_state(registry)
}

pub struct RpcServer {
    config:   ServerConfig,
    registry: Arc<MethodRegistry>,
}

impl RpcServer {
    pub fn new(config: ServerConfig, registry: MethodRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    /// Server exposing the built-in methods
    pub fn with_default_methods(config: ServerConfig) -> Self {
        let mut registry = MethodRegistry::new();
        commands::register(&mut registry);
        Self::new(config, registry)
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.registry))
    }

    /// The three endpoints this server listens on. TLS material is loaded
    /// here, once; a bad chain or key fails before anything is bound.
    pub fn endpoints(&self) -> Result<Vec<TransportEndpoint>, ServeError> {
        let public = format!("tls {}", self.config.public_addr);
        let tls = TlsMaterial::load(&self.config.tls)
            .and_then(|material| material.server_config())
            .map_err(|source| ServeError::Config {
                endpoint: public,
                source,
            })?;

        let mut endpoints = vec![
            TransportEndpoint::Loopback(self.config.loopback_addr),
            TransportEndpoint::PublicTls {
                addr: self.config.public_addr,
                tls,
            },
        ];
        #[cfg(unix)]
        endpoints.push(TransportEndpoint::LocalSocket(SocketAddress::normalize(
            &self.config.socket_path,
        )));

        Ok(endpoints)
    }

    /// Serves every transport until `shutdown` is cancelled or one of them
    /// fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), OrchestrationError> {
        let endpoints = self.endpoints()?;

        tracing::info!(
            "Starting server with methods: {}",
            self.registry.methods().collect::<Vec<_>>().join(", ")
        );

        let mut orchestrator = Orchestrator::new(self.router(), shutdown)
            .with_drain_timeout(self.config.drain_timeout)
            .with_handshake_timeout(self.config.handshake_timeout);
        for endpoint in endpoints {
            orchestrator.spawn(endpoint);
        }
        orchestrator.wait().await
    }
}
