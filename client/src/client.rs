use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use bytes::Bytes;
use http::{
    header::{CONTENT_TYPE, HOST},
    Request, Response, StatusCode,
};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::pki_types::ServerName;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
#[cfg(unix)]
use trirpc_common::SocketAddress;
use trirpc_common::{
    config::RPC_PATH,
    envelope::{self, RequestId},
    tls, ConfigError, ProtocolError, TlsMaterial,
};

use crate::error::{CallError, TransportError};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Configuration for an [`RpcClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound on a whole call: connect, handshake, request and response
    pub timeout:     Duration,
    /// HTTP path of the RPC endpoint
    pub rpc_path:    String,
    /// Name to verify the server certificate against; defaults to the host
    pub server_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout:     Duration::from_secs(30),
            rpc_path:    RPC_PATH.to_string(),
            server_name: None,
        }
    }
}

impl ClientConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the upper bound on a whole call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the HTTP path requests are posted to
    pub fn with_rpc_path<S: Into<String>>(mut self, path: S) -> Self {
        self.rpc_path = path.into();
        self
    }

    /// Set the name the server certificate is verified against
    pub fn with_server_name<S: Into<String>>(mut self, name: S) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

enum Dialer {
    Tls {
        connector:   TlsConnector,
        addr:        String,
        server_name: ServerName<'static>,
    },
    #[cfg(unix)]
    Local(SocketAddress),
}

/// Makes RPC calls to a trirpc server, over mutual TLS or a local socket.
///
/// Every call opens its own connection, sends one request and waits for its
/// response, so a client can be shared freely between tasks.
pub struct RpcClient {
    dialer:   Dialer,
    rpc_path: String,
    timeout:  Duration,
    next_id:  AtomicU64,
}

impl RpcClient {
    /// Client for the TLS transport at `host:port`. The server must present a
    /// certificate issued by the CA in `material`'s chain; the client presents
    /// `material`'s leaf in return.
    pub fn tls(
        host: &str,
        port: u16,
        material: &TlsMaterial,
        config: ClientConfig,
    ) -> Result<Self, ConfigError> {
        let connector = TlsConnector::from(material.client_config()?);
        let server_name = tls::server_name(config.server_name.as_deref().unwrap_or(host))?;
        let addr = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        Ok(Self {
            dialer:   Dialer::Tls {
                connector,
                addr,
                server_name,
            },
            rpc_path: config.rpc_path,
            timeout:  config.timeout,
            next_id:  AtomicU64::new(1),
        })
    }

    /// Client for the local socket at `path`, normalized the same way the
    /// server normalizes it. No TLS.
    #[cfg(unix)]
    pub fn local(path: &str, config: ClientConfig) -> Self {
        Self {
            dialer:   Dialer::Local(SocketAddress::normalize(path)),
            rpc_path: config.rpc_path,
            timeout:  config.timeout,
            next_id:  AtomicU64::new(1),
        }
    }

    /// Human-readable target, for logs
    pub fn target(&self) -> String {
        match &self.dialer {
            Dialer::Tls { addr, .. } => format!("tls {addr}"),
            #[cfg(unix)]
            Dialer::Local(address) => format!("socket {address}"),
        }
    }

    /// Calls `method` with `args` and decodes the result into `R`.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R, CallError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let result = self.call_value(method, args).await?;
        serde_json::from_value(result).map_err(|e| ProtocolError::Decode(e).into())
    }

    /// Calls `method` with `args` and returns the raw result.
    pub async fn call_value<A>(&self, method: &str, args: &A) -> Result<Value, CallError>
    where
        A: Serialize + ?Sized,
    {
        let id: RequestId = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = envelope::encode_request(method, args, id)?;

        tracing::debug!("Calling {} on {} (id {})", method, self.target(), id);

        let response = tokio::time::timeout(self.timeout, self.round_trip(body))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;

        Ok(envelope::decode_response(&response, id)?)
    }

    async fn round_trip(&self, body: Vec<u8>) -> Result<Bytes, CallError> {
        match &self.dialer {
            Dialer::Tls {
                connector,
                addr,
                server_name,
            } => {
                let tcp = TcpStream::connect(addr.as_str()).await.map_err(|source| {
                    TransportError::Connect {
                        target: addr.clone(),
                        source,
                    }
                })?;
                if let Err(e) = tcp.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY: {}", e);
                }

                let stream = connector
                    .connect(server_name.clone(), tcp)
                    .await
                    .map_err(|source| TransportError::Handshake {
                        target: addr.clone(),
                        source,
                    })?;

                if stream.get_ref().1.alpn_protocol() == Some(&b"h2"[..]) {
                    let uri = format!("https://{}{}", addr, self.rpc_path);
                    send_http2(stream, &uri, body).await
                } else {
                    send_http1(stream, addr, &self.rpc_path, body).await
                }
            }
            #[cfg(unix)]
            Dialer::Local(address) => {
                let stream = address
                    .connect()
                    .await
                    .map_err(|source| TransportError::Connect {
                        target: address.to_string(),
                        source,
                    })?;
                send_http1(stream, "localhost", &self.rpc_path, body).await
            }
        }
    }
}

async fn send_http1<I>(io: I, authority: &str, path: &str, body: Vec<u8>) -> Result<Bytes, CallError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(TransportError::from)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("HTTP/1 connection closed with error: {}", e);
        }
    });

    let request = Request::post(path)
        .header(HOST, authority)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))
        .map_err(TransportError::from)?;
    let response = sender
        .send_request(request)
        .await
        .map_err(TransportError::from)?;

    read_response(response).await
}

async fn send_http2<I>(io: I, uri: &str, body: Vec<u8>) -> Result<Bytes, CallError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) =
        hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(io))
            .await
            .map_err(TransportError::from)?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("HTTP/2 connection closed with error: {}", e);
        }
    });

    let request = Request::post(uri)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))
        .map_err(TransportError::from)?;
    let response = sender
        .send_request(request)
        .await
        .map_err(TransportError::from)?;

    read_response(response).await
}

/// Anything but `200 OK` means the request never reached the dispatcher.
async fn read_response(response: Response<Incoming>) -> Result<Bytes, CallError> {
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(TransportError::from)?
        .to_bytes();

    if status != StatusCode::OK {
        tracing::debug!(
            "Unexpected status {}: {}",
            status,
            String::from_utf8_lossy(&body)
        );
        return Err(ProtocolError::UnexpectedStatus(status.as_u16()).into());
    }
    Ok(body)
}
