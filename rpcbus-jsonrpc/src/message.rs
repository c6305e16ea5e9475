//! The generic message model that travels over channels: a payload plus a set of headers.
//!
//! Headers go through two phases.  While a message is being assembled they live in a
//! [`MessageHeaderAccessor`], which can be freely modified.  Once frozen they become a
//! [`MessageHeaders`] value, which is read-only and shared by every clone of the message.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Id, JsonValue};
use crate::{Result, RpcBusError};

/// Well-known header names.
pub mod keys {
    /// Identifies the client connection a message came from or is addressed to.
    pub const SESSION_ID: &str = "sessionId";
    /// Method invoked on the client when pushing later notifications for a subscription.
    pub const SUBSCRIBE_METHOD_NAME: &str = "subscribeMethodName";
    /// The method a request targets.
    pub const MESSAGE_METHOD: &str = "messageMethod";
    /// The method name attached to an outgoing response or notification.
    pub const SEND_MESSAGE_METHOD: &str = "sendMessageMethod";
    pub const MESSAGE_TYPE: &str = "messageType";
    /// The id of the request a response answers.
    pub const CORRELATION_ID: &str = "correlationId";
    pub const MESSAGE_ID: &str = "messageId";
}

/// Discriminates the role a message plays in a JSON-RPC exchange.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Request,
    Subscribe,
    Response,
    Notification,
}

/// A payload and its frozen headers.
#[derive(Clone, Debug)]
pub struct Message<T> {
    payload: T,
    headers: MessageHeaders,
}

impl<T> Message<T> {
    pub fn new(payload: T, headers: MessageHeaders) -> Self {
        Self { payload, headers }
    }

    /// Wrap a payload in a message with no headers other than a fresh message id.
    pub fn from_payload(payload: T) -> Self {
        Self::new(payload, MessageHeaderAccessor::new().into_headers())
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn into_parts(self) -> (T, MessageHeaders) {
        (self.payload, self.headers)
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Replace the payload, keeping the headers.
    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            payload: f(self.payload),
            headers: self.headers,
        }
    }
}

/// Read-only header set.  Cloning is cheap; all clones share the same map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageHeaders {
    headers: Arc<BTreeMap<String, JsonValue>>,
}

impl MessageHeaders {
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.headers.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(JsonValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.headers.iter()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get_str(keys::SESSION_ID)
    }

    pub fn subscribe_method(&self) -> Option<&str> {
        self.get_str(keys::SUBSCRIBE_METHOD_NAME)
    }

    pub fn message_method(&self) -> Option<&str> {
        self.get_str(keys::MESSAGE_METHOD)
    }

    pub fn send_message_method(&self) -> Option<&str> {
        self.get_str(keys::SEND_MESSAGE_METHOD)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.get_str(keys::MESSAGE_TYPE)
            .and_then(|value| MessageType::from_str(value).ok())
    }

    pub fn correlation_id(&self) -> Option<Id> {
        self.get(keys::CORRELATION_ID)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.get_str(keys::MESSAGE_ID)
    }

    /// Start a new, mutable header set seeded from these headers.
    pub fn to_accessor(&self) -> MessageHeaderAccessor {
        MessageHeaderAccessor::of_headers(self)
    }
}

/// Mutable builder for [`MessageHeaders`].
///
/// Once [`set_immutable`](Self::set_immutable) has been called every mutation fails with
/// [`RpcBusError::FrozenHeaders`], whatever the key.
#[derive(Clone, Debug)]
pub struct MessageHeaderAccessor {
    headers: BTreeMap<String, JsonValue>,
    mutable: bool,
}

impl Default for MessageHeaderAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHeaderAccessor {
    pub fn new() -> Self {
        Self {
            headers: BTreeMap::new(),
            mutable: true,
        }
    }

    /// Copy existing headers into a new accessor.  The message id is not copied; the message
    /// built from this accessor gets its own.
    pub fn of_headers(headers: &MessageHeaders) -> Self {
        let headers = headers
            .iter()
            .filter(|(key, _)| key.as_str() != keys::MESSAGE_ID)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self { headers, mutable: true }
    }

    pub fn of_message<T>(message: &Message<T>) -> Self {
        Self::of_headers(message.headers())
    }

    pub fn put_header(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Result<&mut Self> {
        let key = key.into();
        self.check_mutable(&key)?;
        self.headers.insert(key, value.into());
        Ok(self)
    }

    pub fn remove_header(&mut self, key: &str) -> Result<Option<JsonValue>> {
        self.check_mutable(key)?;
        Ok(self.headers.remove(key))
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.headers.get(key)
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) -> Result<&mut Self> {
        self.put_header(keys::SESSION_ID, session_id.into())
    }

    pub fn set_subscribe_method(&mut self, method: impl Into<String>) -> Result<&mut Self> {
        self.put_header(keys::SUBSCRIBE_METHOD_NAME, method.into())
    }

    pub fn set_message_method(&mut self, method: impl Into<String>) -> Result<&mut Self> {
        self.put_header(keys::MESSAGE_METHOD, method.into())
    }

    pub fn set_send_message_method(&mut self, method: impl Into<String>) -> Result<&mut Self> {
        self.put_header(keys::SEND_MESSAGE_METHOD, method.into())
    }

    pub fn set_message_type(&mut self, message_type: MessageType) -> Result<&mut Self> {
        self.put_header(keys::MESSAGE_TYPE, message_type.as_ref())
    }

    pub fn set_correlation_id(&mut self, id: Id) -> Result<&mut Self> {
        self.put_header(keys::CORRELATION_ID, id)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get(keys::SESSION_ID).and_then(JsonValue::as_str)
    }

    pub fn message_method(&self) -> Option<&str> {
        self.get(keys::MESSAGE_METHOD).and_then(JsonValue::as_str)
    }

    /// Freeze the headers.  There is no way back.
    pub fn set_immutable(&mut self) {
        self.mutable = false;
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Freeze and produce the read-only header set, stamped with a new message id unless one
    /// was set explicitly.
    pub fn into_headers(mut self) -> MessageHeaders {
        self.set_immutable();
        self.headers
            .entry(keys::MESSAGE_ID.to_string())
            .or_insert_with(|| JsonValue::String(uuid::Uuid::now_v7().to_string()));

        MessageHeaders {
            headers: Arc::new(self.headers),
        }
    }

    fn check_mutable(&self, key: &str) -> Result<()> {
        if self.mutable {
            Ok(())
        } else {
            Err(RpcBusError::FrozenHeaders { key: key.to_string() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn typed_headers_round_trip_through_accessor() {
        let mut accessor = MessageHeaderAccessor::new();
        accessor
            .set_session_id("session-1")
            .unwrap()
            .set_message_method("add")
            .unwrap()
            .set_message_type(MessageType::Subscribe)
            .unwrap()
            .set_correlation_id(Id::Number(4))
            .unwrap();
        let headers = accessor.into_headers();

        assert_eq!(headers.session_id(), Some("session-1"));
        assert_eq!(headers.message_method(), Some("add"));
        assert_eq!(headers.message_type(), Some(MessageType::Subscribe));
        assert_eq!(headers.get(keys::MESSAGE_TYPE), Some(&json!("SUBSCRIBE")));
        assert_eq!(headers.correlation_id(), Some(Id::Number(4)));
        assert!(headers.message_id().is_some());
        assert!(headers.subscribe_method().is_none());
    }

    #[test]
    fn frozen_headers_reject_every_mutation() {
        let mut accessor = MessageHeaderAccessor::new();
        accessor.set_session_id("s").unwrap();
        accessor.set_immutable();
        assert!(!accessor.is_mutable());

        for key in [
            keys::SESSION_ID,
            keys::SUBSCRIBE_METHOD_NAME,
            keys::MESSAGE_METHOD,
            keys::SEND_MESSAGE_METHOD,
            keys::MESSAGE_TYPE,
            keys::CORRELATION_ID,
            keys::MESSAGE_ID,
            "custom",
        ] {
            assert_matches!(
                accessor.put_header(key, "x"),
                Err(RpcBusError::FrozenHeaders { key: rejected }) if rejected == key
            );
            assert_matches!(accessor.remove_header(key), Err(RpcBusError::FrozenHeaders { .. }));
        }

        assert_matches!(accessor.set_session_id("other"), Err(RpcBusError::FrozenHeaders { .. }));
        assert_matches!(accessor.set_subscribe_method("m"), Err(RpcBusError::FrozenHeaders { .. }));
        assert_matches!(
            accessor.set_message_type(MessageType::Response),
            Err(RpcBusError::FrozenHeaders { .. })
        );
        assert_matches!(
            accessor.set_correlation_id(Id::Null),
            Err(RpcBusError::FrozenHeaders { .. })
        );

        // The failed mutations left the headers alone
        assert_eq!(accessor.session_id(), Some("s"));
    }

    #[test]
    fn copied_headers_get_a_new_message_id() {
        let mut accessor = MessageHeaderAccessor::new();
        accessor.set_session_id("s").unwrap();
        let original = Message::new(json!(1), accessor.into_headers());

        let copy = MessageHeaderAccessor::of_message(&original).into_headers();
        assert_eq!(copy.session_id(), Some("s"));
        assert_ne!(copy.message_id(), original.headers().message_id());
    }

    #[test]
    fn map_payload_keeps_headers() {
        let message = Message::from_payload(json!({"method": "add"}));
        let id = message.headers().message_id().map(str::to_owned);
        let mapped = message.map_payload(|payload| payload["method"].to_string());
        assert_eq!(mapped.payload(), "\"add\"");
        assert_eq!(mapped.headers().message_id().map(str::to_owned), id);
    }
}
