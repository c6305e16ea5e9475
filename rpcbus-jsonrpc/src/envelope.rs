//! Translation between generic [`Message`]s and JSON-RPC shapes.
//!
//! Inbound, a raw JSON payload becomes a [`RequestMessage`] whose headers say what method it
//! targets, whether it registers a subscription, and which id to correlate the answer with.
//! Outbound, handler results become [`JsonRpcMessage`]s stamped with the method the transport
//! should report and the session they are addressed to.
use crate::handler::{HandlerMethod, MappingKind};
use crate::message::{Message, MessageHeaderAccessor, MessageType};
use crate::types::{
    ErrorDetails, Id, JsonRpcMessage, JsonValue, Notification, Request, Response, TwoPointZero,
};
use crate::{Result, RpcBusError};

/// A decoded inbound request, with headers describing it.
pub type RequestMessage = Message<Request>;

/// Stateless codec between the bus's message model and JSON-RPC.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRpcEnvelope;

impl JsonRpcEnvelope {
    /// The destination an inbound message is addressed to: its `method`.
    ///
    /// Messages without one, such as responses echoed back by a client, aren't meant for the
    /// dispatcher at all.
    pub fn destination(&self, message: &Message<JsonValue>) -> Option<String> {
        message
            .payload()
            .get("method")
            .and_then(JsonValue::as_str)
            .map(str::to_owned)
    }

    /// Decode an inbound payload into a request, classified according to the handler mapped to
    /// its method (if any).  Requests for a subscribe handler also carry the notification method
    /// the subscription will receive.
    pub fn decode_request(
        &self,
        message: &Message<JsonValue>,
        handler: Option<&HandlerMethod>,
    ) -> Result<RequestMessage> {
        let request: Request =
            serde_json::from_value(message.payload().clone()).map_err(|source| RpcBusError::InvalidRequest {
                source,
                request: message.payload().clone(),
            })?;

        let subscribe = handler.filter(|handler| handler.kind() == MappingKind::Subscribe);
        let message_type = match subscribe {
            Some(_) => MessageType::Subscribe,
            None => MessageType::Request,
        };

        let mut accessor = MessageHeaderAccessor::of_message(message);
        accessor
            .set_message_method(request.method.clone())?
            .set_message_type(message_type)?;
        if let Some(method) = subscribe.and_then(|handler| handler.return_type().subscribe_method.as_deref()) {
            accessor.set_subscribe_method(method)?;
        }
        if let Some(id) = &request.id {
            accessor.set_correlation_id(id.clone())?;
        }

        Ok(Message::new(request, accessor.into_headers()))
    }

    /// A success response to `request`, or `None` if the request has no id to correlate with.
    pub fn response(
        &self,
        request: &RequestMessage,
        result: JsonValue,
        send_method: &str,
        subscribe_method: Option<&str>,
    ) -> Result<Option<Message<JsonRpcMessage>>> {
        let Some(id) = request.payload().id.clone() else {
            return Ok(None);
        };

        let mut accessor = self.reply_headers(request, send_method, &id)?;
        if let Some(subscribe_method) = subscribe_method {
            accessor.set_subscribe_method(subscribe_method)?;
        }

        let response = Response::success(id, result).with_version(request.payload().jsonrpc);
        Ok(Some(Message::new(
            JsonRpcMessage::Response(response),
            accessor.into_headers(),
        )))
    }

    /// An error response to `request`, or `None` if the request has no id to correlate with.
    pub fn error_response(
        &self,
        request: &RequestMessage,
        details: ErrorDetails,
    ) -> Result<Option<Message<JsonRpcMessage>>> {
        let Some(id) = request.payload().id.clone() else {
            return Ok(None);
        };

        let accessor = self.reply_headers(request, &request.payload().method, &id)?;
        let response = Response::error_detail(id, details).with_version(request.payload().jsonrpc);
        Ok(Some(Message::new(
            JsonRpcMessage::Response(response),
            accessor.into_headers(),
        )))
    }

    /// An error response to a payload that couldn't be decoded as a request at all.  There's no
    /// usable id, so the response's id is `null`.
    pub fn invalid_request(
        &self,
        message: &Message<JsonValue>,
        details: ErrorDetails,
    ) -> Result<Message<JsonRpcMessage>> {
        let mut accessor = MessageHeaderAccessor::new();
        accessor.set_message_type(MessageType::Response)?;
        if let Some(session_id) = message.headers().session_id() {
            accessor.set_session_id(session_id)?;
        }

        let jsonrpc = (message.payload().get("jsonrpc").and_then(JsonValue::as_str) == Some("2.0"))
            .then_some(TwoPointZero);
        let response = Response::error_detail(Id::Null, details).with_version(jsonrpc);

        Ok(Message::new(
            JsonRpcMessage::Response(response),
            accessor.into_headers(),
        ))
    }

    /// A notification pushed to `session_id`, outside of any request.
    pub fn notification(
        &self,
        session_id: &str,
        method: &str,
        params: Option<JsonValue>,
    ) -> Result<Message<JsonRpcMessage>> {
        let mut accessor = MessageHeaderAccessor::new();
        accessor
            .set_session_id(session_id)?
            .set_send_message_method(method)?
            .set_message_type(MessageType::Notification)?;

        Ok(Message::new(
            JsonRpcMessage::Notification(Notification::new(method, params)),
            accessor.into_headers(),
        ))
    }

    fn reply_headers(&self, request: &RequestMessage, send_method: &str, id: &Id) -> Result<MessageHeaderAccessor> {
        let mut accessor = MessageHeaderAccessor::new();
        accessor
            .set_send_message_method(send_method)?
            .set_message_type(MessageType::Response)?
            .set_correlation_id(id.clone())?;
        if let Some(session_id) = request.headers().session_id() {
            accessor.set_session_id(session_id)?;
        }

        Ok(accessor)
    }
}
