//! The single HTTP endpoint every transport serves.
//!
//! Every well-formed POST is answered with `200 OK` and an envelope; whether
//! the call succeeded is only visible inside the envelope.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde_json::Value;
use trirpc_common::{envelope, RpcError};

use crate::registry::MethodRegistry;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Decodes the envelope, dispatches it, encodes the outcome.
pub async fn handle_rpc(
    State(registry): State<Arc<MethodRegistry>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "rpc: unrecognized Content-Type",
        )
            .into_response();
    }

    let request = match envelope::decode_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejecting malformed request: {}", e);
            return envelope_response(Value::Null, Err(e.to_rpc_error()));
        }
    };

    tracing::debug!("RPC call: {}({})", request.method, request.args);

    let outcome = registry
        .dispatch(&request.method, request.args)
        .await
        .map_err(|e| {
            tracing::warn!("RPC error for {}: {}", request.method, e);
            RpcError::from(e)
        });

    envelope_response(request.id, outcome)
}

fn envelope_response(id: Value, outcome: Result<Value, RpcError>) -> Response {
    match envelope::encode_response(id, outcome) {
        Ok(body) => ([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `application/json`, parameters such as `charset` ignored
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, Router};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;
    use trirpc_common::{config::RPC_PATH, envelope::codes};

    use super::*;
    use crate::{commands, router};

    fn app() -> Router {
        let mut registry = MethodRegistry::new();
        commands::register(&mut registry);
        router(Arc::new(registry))
    }

    fn post(content_type: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(RPC_PATH)
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, Bytes) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    #[tokio::test]
    async fn successful_call_returns_result_envelope() {
        let body = envelope::encode_request(
            "RPC.GetServerSummary",
            &json!({"ServerName": "superserver"}),
            1,
        )
        .unwrap();
        let (status, body) = send(post("application/json", body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            envelope::decode_response(&body, 1).unwrap(),
            json!({"ServerName": "superserver", "Qemu": {"Major": 2, "Minor": 11, "Micro": 3}})
        );
    }

    #[tokio::test]
    async fn handler_error_is_still_200() {
        let body =
            envelope::encode_request("RPC.GetServerSummary", &json!({"ServerName": "other"}), 2)
                .unwrap();
        let (status, body) = send(post("application/json; charset=utf-8", body)).await;

        assert_eq!(status, StatusCode::OK);
        let err = envelope::decode_response(&body, 2).unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.code, codes::SERVER_ERROR);
        assert!(remote.message.contains("other"));
    }

    #[tokio::test]
    async fn unknown_method_is_an_envelope_error() {
        let body = envelope::encode_request("RPC.Nope", &json!({}), 3).unwrap();
        let (status, body) = send(post("application/json", body)).await;

        assert_eq!(status, StatusCode::OK);
        let err = envelope::decode_response(&body, 3).unwrap_err();
        assert_eq!(err.remote().unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error_envelope() {
        let (status, body) = send(post("application/json", "{oops")).await;

        assert_eq!(status, StatusCode::OK);
        let wire: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(wire["error"]["code"], json!(codes::PARSE_ERROR));
        assert_eq!(wire["id"], Value::Null);
    }

    #[tokio::test]
    async fn string_id_is_echoed_verbatim() {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": "RPC.GetServerSummary",
            "params": {"ServerName": "superserver"},
            "id": "call-42",
        }))
        .unwrap();
        let (status, body) = send(post("application/json", body)).await;

        assert_eq!(status, StatusCode::OK);
        let wire: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(wire["id"], json!("call-42"));
        assert_eq!(wire["result"]["ServerName"], json!("superserver"));
    }

    #[tokio::test]
    async fn wrong_content_type_is_rejected() {
        let (status, _) = send(post("text/plain", "{}")).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn only_post_is_routed() {
        let request = Request::get(RPC_PATH).body(Body::empty()).unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
