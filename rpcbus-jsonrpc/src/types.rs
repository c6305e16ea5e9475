//! Rust struct definitions that ser/de to/from JSON-RPC messages.
//!
//! The shapes here are deliberately lenient about the `"jsonrpc": "2.0"` marker: clients of the
//! bus are allowed to omit it, and responses only carry it when the request that caused them did.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, RpcBusError};
/// Re-export the basic protocol types from `jsonrpsee-types`; no need to re-invent this wheel.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Request Id
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id.  Fractional ids aren't accepted; JSON-RPC says they SHOULD NOT be used.
    Number(i64),
    /// String id
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(number) => write!(f, "{number}"),
            Id::Str(string) => f.write_str(string),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<Id> for JsonValue {
    fn from(id: Id) -> Self {
        match id {
            Id::Null => JsonValue::Null,
            Id::Number(number) => JsonValue::from(number),
            Id::Str(string) => JsonValue::String(string),
        }
    }
}

/// Serializable [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object).
///
/// The `id` is optional.  It is used purely to correlate a response with its request; a request
/// without one is still dispatched, but nothing is sent back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// JSON-RPC version marker, if the client sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<TwoPointZero>,
    /// Request ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    /// Name of the method to be invoked.
    pub method: String,
    /// Parameter values of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Request {
    /// Create a JSON-RPC method call.
    pub fn new(id: impl Into<Option<Id>>, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self {
            jsonrpc: None,
            id: id.into(),
            method: method.into(),
            params: params.into(),
        }
    }
}

/// Serializable [JSON-RPC notification object](https://www.jsonrpc.org/specification#request-object).
///
/// On this bus notifications only flow outbound, pushed to a subscribed session.
///
/// Rejects unknown fields, so that a request carrying an `id` never parses as a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<TwoPointZero>,
    /// Name of the method to be invoked on the client.
    pub method: String,
    /// Parameter values of the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Self {
        Self {
            jsonrpc: None,
            method: method.into(),
            params: params.into(),
        }
    }
}

/// [JSON-RPC response object](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<TwoPointZero>,
    /// Request ID
    pub id: Id,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn new(id: Id, payload: ResponsePayload) -> Self {
        Self {
            jsonrpc: None,
            id,
            payload,
        }
    }

    /// Create a successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self::new(id, ResponsePayload::success(result))
    }

    /// Create an error response
    pub fn error(id: Id, code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::error_detail(id, ErrorDetails::new(code, message, data))
    }

    pub fn error_detail(id: Id, details: ErrorDetails) -> Self {
        Self::new(id, ResponsePayload::error(details))
    }

    /// Set (or clear) the version marker
    pub fn with_version(mut self, jsonrpc: Option<TwoPointZero>) -> Self {
        self.jsonrpc = jsonrpc;
        self
    }

    /// The result of a successful response, or `None` for an error response
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.payload {
            ResponsePayload::Success(success) => Some(&success.result),
            ResponsePayload::Error(_) => None,
        }
    }

    /// The error details of a failed response, or `None` for a successful one
    pub fn error_details(&self) -> Option<&ErrorDetails> {
        match &self.payload {
            ResponsePayload::Error(error) => Some(&error.error),
            ResponsePayload::Success(_) => None,
        }
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum; success responses have `result` and error responses have
/// `error`, which is enough for serde to tell them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error`.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl ResponsePayload {
    pub fn success(result: JsonValue) -> Self {
        ResponsePayload::Success(SuccessResponse { result })
    }

    pub fn error(details: impl Into<ErrorDetails>) -> Self {
        ResponsePayload::Error(details.into().into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, data)
    }
    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
    pub fn invalid_params(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, data)
    }
    pub fn internal_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InternalError, message, data)
    }
}

/// Every JSON-RPC shape that travels over the bus's outbound channel, or that a transport might
/// want to parse.
///
/// Untagged, so the order of variants matters.  A notification has `method` and no `id`, a
/// request has `method` and usually an `id`, and a response has no `method` at all.  Since a
/// request's `id` is optional, notifications must be tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Notification(Notification),
    Request(Request),
    Response(Response),
}

impl JsonRpcMessage {
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            JsonRpcMessage::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            JsonRpcMessage::Notification(notification) => Some(notification),
            _ => None,
        }
    }

    /// Serialize this message for the wire.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|source| RpcBusError::SerResult {
            source,
            type_name: std::any::type_name::<Self>(),
        })
    }
}
