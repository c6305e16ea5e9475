//! Return value handlers decide what happens to the value a handler returns.  Usually that's
//! wrapping it in a response and publishing it on the outbound channel.
use std::sync::Arc;

use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::envelope::{JsonRpcEnvelope, RequestMessage};
use crate::handler::ReturnType;
use crate::message::Message;
use crate::resolver::ResolverComposite;
use crate::template::SubscriptionRegistry;
use crate::types::{JsonRpcMessage, JsonValue};
use crate::{Result, RpcBusError};

pub trait ReturnValueHandler: Send + Sync + 'static {
    fn supports_return_type(&self, return_type: &ReturnType) -> bool;

    fn handle_return_value(&self, value: JsonValue, return_type: &ReturnType, message: &RequestMessage) -> Result<()>;
}

impl ResolverComposite<dyn ReturnValueHandler> {
    pub fn supports_return_type(&self, return_type: &ReturnType) -> bool {
        self.find(|handler| handler.supports_return_type(return_type)).is_some()
    }

    pub fn handle_return_value(&self, value: JsonValue, return_type: &ReturnType, message: &RequestMessage) -> Result<()> {
        match self.find(|handler| handler.supports_return_type(return_type)) {
            Some(handler) => handler.handle_return_value(value, return_type, message),
            None => Err(RpcBusError::UnsupportedReturnType {
                type_name: return_type.type_name,
            }),
        }
    }
}

fn publish(
    outbound: &dyn MessageChannel<JsonRpcMessage>,
    response: Option<Message<JsonRpcMessage>>,
    message: &RequestMessage,
) {
    let method = message.payload().method.as_str();
    match response {
        Some(response) => {
            if !outbound.send(response) {
                warn!(method, "Outbound channel dropped the response");
            }
        }
        None => {
            debug!(method, "Request has no id; not sending a response");
        }
    }
}

/// Acknowledges subscription requests, binding the session to the subscription's notification
/// method so later notifications can reach it.
pub struct SubscribeReturnValueHandler {
    envelope: JsonRpcEnvelope,
    outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl SubscribeReturnValueHandler {
    pub fn new(outbound: Arc<dyn MessageChannel<JsonRpcMessage>>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Self {
            envelope: JsonRpcEnvelope,
            outbound,
            subscriptions,
        }
    }
}

impl ReturnValueHandler for SubscribeReturnValueHandler {
    fn supports_return_type(&self, return_type: &ReturnType) -> bool {
        return_type.subscribe_method.is_some()
    }

    fn handle_return_value(&self, value: JsonValue, return_type: &ReturnType, message: &RequestMessage) -> Result<()> {
        let subscribe_method = return_type.subscribe_method.as_deref();

        match (message.headers().session_id(), subscribe_method) {
            (Some(session_id), Some(subscribe_method)) => {
                self.subscriptions.bind(session_id, subscribe_method);
            }
            _ => {
                warn!(
                    method = %message.payload().method,
                    "Subscription request has no session; nothing to bind notifications to"
                );
            }
        }

        let send_method = return_type
            .response_method
            .as_deref()
            .unwrap_or(&message.payload().method);
        let response = self
            .envelope
            .response(message, value, send_method, subscribe_method)?;
        publish(self.outbound.as_ref(), response, message);

        Ok(())
    }
}

/// Answers requests with a response carrying the return value.  Supports every return type, so
/// it belongs at the end of the chain.
pub struct ResponseReturnValueHandler {
    envelope: JsonRpcEnvelope,
    outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
}

impl ResponseReturnValueHandler {
    pub fn new(outbound: Arc<dyn MessageChannel<JsonRpcMessage>>) -> Self {
        Self {
            envelope: JsonRpcEnvelope,
            outbound,
        }
    }
}

impl ReturnValueHandler for ResponseReturnValueHandler {
    fn supports_return_type(&self, _return_type: &ReturnType) -> bool {
        true
    }

    fn handle_return_value(&self, value: JsonValue, return_type: &ReturnType, message: &RequestMessage) -> Result<()> {
        let send_method = return_type
            .response_method
            .as_deref()
            .unwrap_or(&message.payload().method);
        let response = self.envelope.response(message, value, send_method, None)?;
        publish(self.outbound.as_ref(), response, message);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageHeaderAccessor;
    use crate::types::{Id, Request};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Mutex;

    /// Collects everything sent to it.
    #[derive(Default)]
    struct Collector(Mutex<Vec<Message<JsonRpcMessage>>>);

    impl MessageChannel<JsonRpcMessage> for Collector {
        fn send(&self, message: Message<JsonRpcMessage>) -> bool {
            self.0.lock().unwrap().push(message);
            true
        }
    }

    fn request(id: Option<Id>, method: &str) -> RequestMessage {
        let mut accessor = MessageHeaderAccessor::new();
        accessor.set_session_id("session-1").unwrap();
        Message::new(Request::new(id, method, None), accessor.into_headers())
    }

    fn return_type(response_method: Option<&str>, subscribe_method: Option<&str>) -> ReturnType {
        ReturnType {
            type_name: "test",
            response_method: response_method.map(str::to_owned),
            subscribe_method: subscribe_method.map(str::to_owned),
        }
    }

    #[test]
    fn subscribe_handler_takes_precedence_for_subscriptions() {
        let collector = Arc::new(Collector::default());
        let subscriptions = Arc::new(SubscriptionRegistry::default());

        let mut composite = ResolverComposite::<dyn ReturnValueHandler>::new();
        composite
            .add_resolver(Arc::new(SubscribeReturnValueHandler::new(
                collector.clone(),
                subscriptions.clone(),
            )))
            .add_resolver(Arc::new(ResponseReturnValueHandler::new(collector.clone())));

        composite
            .handle_return_value(
                json!("subscribed"),
                &return_type(None, Some("ticks.tick")),
                &request(Some(Id::Number(1)), "ticks.subscribe"),
            )
            .unwrap();
        assert!(subscriptions.is_bound("session-1", "ticks.tick"));

        composite
            .handle_return_value(json!(3), &return_type(Some("sum"), None), &request(Some(Id::Number(2)), "add"))
            .unwrap();
        assert!(!subscriptions.is_bound("session-1", "sum"));

        let sent = collector.0.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].headers().subscribe_method(), Some("ticks.tick"));
        assert_eq!(sent[0].headers().send_message_method(), Some("ticks.subscribe"));
        assert_eq!(sent[1].headers().subscribe_method(), None);
        assert_eq!(sent[1].headers().send_message_method(), Some("sum"));
        assert_eq!(
            sent[1].payload().as_response().and_then(|response| response.result()),
            Some(&json!(3))
        );
    }

    #[test]
    fn requests_without_id_get_no_response() {
        let collector = Arc::new(Collector::default());
        let handler = ResponseReturnValueHandler::new(collector.clone());

        handler
            .handle_return_value(json!(3), &return_type(None, None), &request(None, "add"))
            .unwrap();
        assert!(collector.0.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_chain_rejects_return_type() {
        let composite = ResolverComposite::<dyn ReturnValueHandler>::new();
        assert!(!composite.supports_return_type(&return_type(None, None)));
        assert_matches!(
            composite.handle_return_value(json!(1), &return_type(None, None), &request(None, "add")),
            Err(RpcBusError::UnsupportedReturnType { type_name: "test" })
        );
    }
}
