use axum::{extract::Request, middleware::Next, response::Response};

use crate::listener::ConnectionInfo;

/// Logs protocol, method and peer of every inbound request.
pub async fn log_request(request: Request, next: Next) -> Response {
    let (transport, remote) = match request.extensions().get::<ConnectionInfo>() {
        Some(info) => (info.transport.as_str(), info.remote.as_str()),
        None => ("unknown", "-"),
    };

    tracing::info!(
        proto = ?request.version(),
        method = %request.method(),
        remote_addr = %remote,
        transport,
        "request"
    );

    next.run(request).await
}
