//! JSON-RPC 2.0 request/response envelopes.
//!
//! A request travels as `{"jsonrpc":"2.0","method":..,"params":[args],"id":n}`
//! and the matching response as `{"jsonrpc":"2.0","result":..,"id":n}` or
//! `{"jsonrpc":"2.0","error":{..},"id":n}`. The same functions are used by
//! every transport on both ends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Version tag carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation identifier matching a response to its request
pub type RequestId = u64;

/// Standard JSON-RPC error codes
pub mod codes {
    /// Body is not valid JSON or not an envelope
    pub const PARSE_ERROR: i64 = -32700;
    /// Envelope is well-formed JSON but not a valid request
    pub const INVALID_REQUEST: i64 = -32600;
    /// No handler is registered under the method name
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Arguments did not match what the handler expects
    pub const INVALID_PARAMS: i64 = -32602;
    /// The server failed to produce a response
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The handler ran and returned an error
    pub const SERVER_ERROR: i64 = -32000;
}

/// Error object carried inside a response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code:    i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data:    Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A request as seen by the serving side
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRequest {
    pub method: String,
    pub args:   Value,
    /// Whatever id the caller sent, echoed back verbatim; `null` when absent
    pub id:     Value,
}

#[derive(Serialize)]
struct OutgoingRequest<'a, A: ?Sized> {
    jsonrpc: &'static str,
    method:  &'a str,
    params:  [&'a A; 1],
    id:      RequestId,
}

#[derive(Deserialize)]
struct IncomingRequest {
    #[serde(default)]
    jsonrpc: Option<String>,
    method:  String,
    #[serde(default)]
    params:  Value,
    #[serde(default)]
    id:      Value,
}

#[derive(Serialize, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result:  Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error:   Option<RpcError>,
    #[serde(default)]
    id:      Value,
}

/// Serializes a call to `method` with a single argument value.
pub fn encode_request<A: Serialize + ?Sized>(
    method: &str,
    args: &A,
    id: RequestId,
) -> Result<Vec<u8>, ProtocolError> {
    let request = OutgoingRequest {
        jsonrpc: JSONRPC_VERSION,
        method,
        params: [args],
        id,
    };
    serde_json::to_vec(&request).map_err(ProtocolError::Encode)
}

/// Parses a request body.
///
/// `params` may be a one-element array wrapping the argument or the argument
/// object itself; an absent `params` decodes as `null`.
pub fn decode_request(bytes: &[u8]) -> Result<DecodedRequest, ProtocolError> {
    let request: IncomingRequest = serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?;

    if let Some(version) = request.jsonrpc.as_deref() {
        if version != JSONRPC_VERSION {
            return Err(ProtocolError::InvalidRequest(format!(
                "unsupported jsonrpc version {version:?}"
            )));
        }
    }
    if request.method.is_empty() {
        return Err(ProtocolError::InvalidRequest("empty method name".to_string()));
    }

    let args = match request.params {
        Value::Array(mut items) => {
            if items.is_empty() {
                Value::Null
            } else {
                items.swap_remove(0)
            }
        }
        other => other,
    };

    Ok(DecodedRequest {
        method: request.method,
        args,
        id: request.id,
    })
}

/// Serializes the outcome of a call. Exactly one of `result` / `error` is
/// written.
pub fn encode_response(
    id: Value,
    outcome: Result<Value, RpcError>,
) -> Result<Vec<u8>, ProtocolError> {
    let (result, error) = match outcome {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    let response = ResponseEnvelope {
        jsonrpc: Some(JSONRPC_VERSION.to_string()),
        result,
        error,
        id,
    };
    serde_json::to_vec(&response).map_err(ProtocolError::Encode)
}

/// Parses a response body for the request numbered `expected`.
///
/// An `error` member becomes [`ProtocolError::Remote`]. A body carrying both
/// members, neither member (a `null` result counts as absent), or another
/// request's id is a [`ProtocolError::Violation`].
pub fn decode_response(bytes: &[u8], expected: RequestId) -> Result<Value, ProtocolError> {
    let response: ResponseEnvelope =
        serde_json::from_slice(bytes).map_err(ProtocolError::Decode)?;

    if response.id != Value::from(expected) {
        return Err(ProtocolError::Violation(format!(
            "response id {} does not match request id {expected}",
            response.id
        )));
    }

    match (response.result, response.error) {
        (Some(_), Some(_)) => Err(ProtocolError::Violation(
            "response carries both result and error".to_string(),
        )),
        (None, Some(error)) => Err(ProtocolError::Remote(error)),
        (Some(result), None) => Ok(result),
        (None, None) => Err(ProtocolError::Violation(
            "response carries neither result nor error".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_round_trips() {
        let args = json!({"ServerName": "superserver"});
        let bytes = encode_request("RPC.GetServerSummary", &args, 7).unwrap();
        let decoded = decode_request(&bytes).unwrap();

        assert_eq!(decoded.method, "RPC.GetServerSummary");
        assert_eq!(decoded.args, args);
        assert_eq!(decoded.id, Some(7));
    }

    #[test]
    fn request_wraps_args_in_a_single_element_array() {
        let bytes = encode_request("Echo", &json!([1, 2]), 1).unwrap();
        let wire: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(wire["jsonrpc"], "2.0");
        assert_eq!(wire["params"], json!([[1, 2]]));

        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded.args, json!([1, 2]));
    }

    #[test]
    fn bare_object_params_are_accepted() {
        let body = br#"{"method":"RPC.GetServerSummary","params":{"ServerName":"x"},"id":3}"#;
        let decoded = decode_request(body).unwrap();
        assert_eq!(decoded.args, json!({"ServerName": "x"}));
        assert_eq!(decoded.id, json!(3));
    }

    #[test]
    fn missing_params_and_id_decode_as_null() {
        let decoded = decode_request(br#"{"jsonrpc":"2.0","method":"Ping"}"#).unwrap();
        assert_eq!(decoded.args, Value::Null);
        assert_eq!(decoded.id, Value::Null);
    }

    #[test]
    fn any_request_id_is_echoed_back() {
        for id in [json!("req-1"), json!(-3), json!(1.5)] {
            let body = serde_json::to_vec(&json!({"jsonrpc": "2.0", "method": "Ping", "id": id}))
                .unwrap();
            let decoded = decode_request(&body).unwrap();
            assert_eq!(decoded.id, id);

            let bytes = encode_response(decoded.id, Ok(json!(true))).unwrap();
            let wire: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(wire["id"], id);
        }
    }

    #[test]
    fn malformed_request_is_a_parse_error() {
        let err = decode_request(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert_eq!(err.to_rpc_error().code, codes::PARSE_ERROR);

        let err = decode_request(br#"{"params":[]}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn wrong_version_is_an_invalid_request() {
        let err = decode_request(br#"{"jsonrpc":"1.0","method":"Ping","id":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
        assert_eq!(err.to_rpc_error().code, codes::INVALID_REQUEST);
    }

    #[test]
    fn response_round_trips() {
        let result = json!({"ServerName": "superserver"});
        let bytes = encode_response(json!(9), Ok(result.clone())).unwrap();
        assert_eq!(decode_response(&bytes, 9).unwrap(), result);
    }

    #[test]
    fn error_response_becomes_remote_error() {
        let bytes = encode_response(
            json!(4),
            Err(RpcError::new(codes::SERVER_ERROR, "Unknown server name: other")),
        )
        .unwrap();

        let wire: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(wire.get("result").is_none());

        match decode_response(&bytes, 4).unwrap_err() {
            ProtocolError::Remote(error) => {
                assert_eq!(error.code, codes::SERVER_ERROR);
                assert_eq!(error.message, "Unknown server name: other");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn both_result_and_error_is_a_violation() {
        let body = br#"{"jsonrpc":"2.0","result":1,"error":{"code":-32000,"message":"x"},"id":1}"#;
        assert!(matches!(
            decode_response(body, 1),
            Err(ProtocolError::Violation(_))
        ));
    }

    #[test]
    fn neither_result_nor_error_is_a_violation() {
        for body in [
            &br#"{"jsonrpc":"2.0","id":1}"#[..],
            &br#"{"jsonrpc":"2.0","result":null,"id":1}"#[..],
        ] {
            assert!(matches!(
                decode_response(body, 1),
                Err(ProtocolError::Violation(_))
            ));
        }
    }

    #[test]
    fn mismatched_id_is_a_violation() {
        let bytes = encode_response(json!(2), Ok(json!(true))).unwrap();
        assert!(matches!(
            decode_response(&bytes, 3),
            Err(ProtocolError::Violation(_))
        ));
    }

    #[test]
    fn malformed_response_is_a_decode_error() {
        assert!(matches!(
            decode_response(b"<html>", 1),
            Err(ProtocolError::Decode(_))
        ));
    }
}
