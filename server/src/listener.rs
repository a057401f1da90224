//! One transport's lifetime: bind, accept, serve, drain, close.
//!
//! A [`Listener`] moves through [`LifecycleState`] strictly forward and
//! publishes every step on a watch channel. Each accepted connection runs as
//! its own task; on cancellation the listener stops accepting, asks every
//! connection to finish its in-flight request, and aborts whatever is still
//! running once the drain timeout expires.

#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use hyper::{body::Incoming, service::service_fn, Request};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
#[cfg(unix)]
use trirpc_common::SocketAddress;
use trirpc_common::{
    config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT},
    ConfigError,
};

use crate::error::{LifecycleError, ServeError};

/// Pause before accepting again after running out of descriptors
pub const ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Loopback,
    PublicTls,
    LocalSocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loopback => "loopback",
            Self::PublicTls => "tls",
            Self::LocalSocket => "socket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how a transport listens.
#[derive(Debug, Clone)]
pub enum TransportEndpoint {
    /// Plaintext TCP, restricted to loopback addresses
    Loopback(SocketAddr),
    /// Mutual-TLS TCP
    PublicTls {
        addr: SocketAddr,
        tls:  Arc<rustls::ServerConfig>,
    },
    /// Local interprocess socket, no TLS
    #[cfg(unix)]
    LocalSocket(SocketAddress),
}

impl TransportEndpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Loopback(_) => TransportKind::Loopback,
            Self::PublicTls { .. } => TransportKind::PublicTls,
            #[cfg(unix)]
            Self::LocalSocket(_) => TransportKind::LocalSocket,
        }
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback(addr) => write!(f, "loopback {addr}"),
            Self::PublicTls { addr, .. } => write!(f, "tls {addr}"),
            #[cfg(unix)]
            Self::LocalSocket(address) => write!(f, "socket {address}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Bound,
    Serving,
    Draining,
    Closed,
}

/// Attached to every request as an extension.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub transport: TransportKind,
    pub remote:    String,
}

/// Address a listener actually bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAddr {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(SocketAddress),
}

impl LocalAddr {
    pub fn tcp(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(addr) => Some(*addr),
            #[cfg(unix)]
            Self::Unix(_) => None,
        }
    }
}

enum BoundSocket {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl BoundSocket {
    async fn accept(&self) -> io::Result<(Connection, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY for {}: {}", remote, e);
                }
                Ok((Connection::Tcp(stream), remote.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Connection::Unix(stream), "local".to_string()))
            }
        }
    }
}

/// A bound transport, ready to [`serve`](Listener::serve).
pub struct Listener {
    endpoint:          TransportEndpoint,
    socket:            BoundSocket,
    local_addr:        LocalAddr,
    tls:               Option<TlsAcceptor>,
    state:             watch::Sender<LifecycleState>,
    drain_timeout:     Duration,
    handshake_timeout: Duration,
}

impl Listener {
    /// Binds `endpoint`. Failure here is fatal for the transport and is never
    /// retried.
    pub async fn bind(endpoint: TransportEndpoint) -> Result<Self, ServeError> {
        let (state, _) = watch::channel(LifecycleState::Created);

        let bind_error = |source: io::Error| ServeError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let (socket, local_addr, tls) = match &endpoint {
            TransportEndpoint::Loopback(addr) => {
                if !addr.ip().is_loopback() {
                    return Err(ServeError::Config {
                        endpoint: endpoint.to_string(),
                        source:   ConfigError::NotLoopback(*addr),
                    });
                }
                let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                (BoundSocket::Tcp(listener), LocalAddr::Tcp(local), None)
            }
            TransportEndpoint::PublicTls { addr, tls } => {
                let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
                let local = listener.local_addr().map_err(bind_error)?;
                (
                    BoundSocket::Tcp(listener),
                    LocalAddr::Tcp(local),
                    Some(TlsAcceptor::from(Arc::clone(tls))),
                )
            }
            #[cfg(unix)]
            TransportEndpoint::LocalSocket(address) => {
                let listener = address.bind().map_err(bind_error)?;
                (
                    BoundSocket::Unix(listener),
                    LocalAddr::Unix(address.clone()),
                    None,
                )
            }
        };

        state.send_replace(LifecycleState::Bound);
        tracing::debug!("Bound {}", endpoint);

        Ok(Self {
            endpoint,
            socket,
            local_addr,
            tls,
            state,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Set how long connections may finish in-flight requests once draining
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the deadline for a TLS handshake to complete
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &TransportEndpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> &LocalAddr {
        &self.local_addr
    }

    /// Watches this listener's lifecycle. The receiver keeps reporting
    /// `Closed` after the listener is gone.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Accepts and serves connections until `shutdown` is cancelled or
    /// accepting fails, then drains. The listener always reaches `Closed`
    /// before this returns.
    ///
    /// Running out of file descriptors or socket buffers pauses accepting for
    /// [`ACCEPT_BACKOFF`] instead of ending the transport. Any other accept
    /// error is fatal and cancels `shutdown` before this listener drains.
    pub async fn serve(self, router: Router, shutdown: CancellationToken) -> Result<(), ServeError> {
        let Self {
            endpoint,
            socket,
            local_addr: _,
            tls,
            state,
            drain_timeout,
            handshake_timeout,
        } = self;
        let kind = endpoint.kind();

        state.send_replace(LifecycleState::Serving);
        tracing::info!("Serving {}", endpoint);

        // Connections stop with the shared token, or with this listener alone
        // when accepting fails.
        let connection_shutdown = shutdown.child_token();
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),

                accepted = socket.accept() => match accepted {
                    Ok((connection, remote)) => {
                        tracing::debug!("Accepted {} connection from {}", kind, remote);
                        let info = ConnectionInfo { transport: kind, remote };
                        let router = router.clone();
                        let shutdown = connection_shutdown.clone();
                        match (connection, &tls) {
                            (Connection::Tcp(stream), Some(acceptor)) => {
                                connections.spawn(serve_tls(
                                    acceptor.clone(),
                                    stream,
                                    handshake_timeout,
                                    router,
                                    info,
                                    shutdown,
                                ));
                            }
                            (Connection::Tcp(stream), None) => {
                                connections.spawn(serve_connection(stream, router, info, shutdown));
                            }
                            #[cfg(unix)]
                            (Connection::Unix(stream), _) => {
                                connections.spawn(serve_connection(stream, router, info, shutdown));
                            }
                        }
                    }
                    Err(e) if is_connection_error(&e) => {
                        tracing::debug!("Connection dropped before accept on {}: {}", endpoint, e);
                    }
                    Err(e) if is_resource_exhaustion(&e) => {
                        tracing::warn!(
                            "Accept on {} is out of resources, retrying in {:?}: {}",
                            endpoint,
                            ACCEPT_BACKOFF,
                            e
                        );
                        let cancelled = tokio::select! {
                            _ = shutdown.cancelled() => true,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
                        };
                        if cancelled {
                            break Ok(());
                        }
                    }
                    Err(source) => {
                        tracing::error!("Accept failed on {}: {}", endpoint, source);
                        // Siblings stop now rather than after this drain.
                        shutdown.cancel();
                        break Err(ServeError::Accept {
                            endpoint: endpoint.to_string(),
                            source,
                        });
                    }
                },

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("Connection task on {} failed: {}", endpoint, e);
                    }
                }
            }
        };

        state.send_replace(LifecycleState::Draining);
        drop(socket);
        connection_shutdown.cancel();
        tracing::info!(
            "Draining {} ({} connection(s) in flight)",
            endpoint,
            connections.len()
        );

        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            let err = LifecycleError::DrainTimeout {
                endpoint:  endpoint.to_string(),
                timeout:   drain_timeout,
                remaining: connections.len(),
            };
            tracing::warn!("{}", err);
            connections.shutdown().await;
        }

        #[cfg(unix)]
        if let TransportEndpoint::LocalSocket(address) = &endpoint {
            remove_socket_file(address);
        }

        state.send_replace(LifecycleState::Closed);
        tracing::info!("Closed {}", endpoint);
        result
    }
}

#[cfg(unix)]
impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.socket {
            BoundSocket::Tcp(listener) => listener.as_fd(),
            BoundSocket::Unix(listener) => listener.as_fd(),
        }
    }
}

#[cfg(unix)]
fn remove_socket_file(address: &SocketAddress) {
    let Some(path) = address.file_path() else {
        return;
    };
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            let err = LifecycleError::SocketCleanup {
                path: path.clone(),
                source,
            };
            tracing::warn!("{}", err);
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Out of descriptors or memory; clears once other connections close.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(unix)]
    if let Some(code) = e.raw_os_error() {
        return matches!(
            code,
            libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM
        );
    }
    false
}

async fn serve_tls(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    handshake_timeout: Duration,
    router: Router,
    info: ConnectionInfo,
    shutdown: CancellationToken,
) {
    let stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!("TLS handshake with {} failed: {}", info.remote, e);
            return;
        }
        Err(_) => {
            tracing::warn!(
                "TLS handshake with {} timed out after {:?}",
                info.remote,
                handshake_timeout
            );
            return;
        }
    };

    serve_connection(stream, router, info, shutdown).await;
}

/// Speaks HTTP/1.1 or HTTP/2 (detected per connection) until the peer hangs
/// up or `shutdown` fires, in which case the in-flight request is allowed to
/// complete.
async fn serve_connection<I>(
    io: I,
    router: Router,
    info: ConnectionInfo,
    shutdown: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let remote = info.remote.clone();
    let service = service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(info.clone());
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        tracing::debug!("Connection from {} ended with error: {}", remote, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_peers_are_not_fatal() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused,
        ] {
            assert!(is_connection_error(&io::Error::from(kind)));
        }
        assert!(!is_connection_error(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_retried() {
        for code in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS, libc::ENOMEM] {
            let e = io::Error::from_raw_os_error(code);
            assert!(is_resource_exhaustion(&e), "{e}");
            assert!(!is_connection_error(&e));
        }
    }

    #[test]
    fn other_accept_errors_are_fatal() {
        assert!(is_resource_exhaustion(&io::Error::from(io::ErrorKind::OutOfMemory)));
        assert!(!is_resource_exhaustion(&io::Error::from(io::ErrorKind::InvalidInput)));
        #[cfg(unix)]
        assert!(!is_resource_exhaustion(&io::Error::from_raw_os_error(libc::EINVAL)));
    }
}
