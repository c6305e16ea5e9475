//! Wiring of the whole bus: the two channels, the registry, the dispatcher, and the sending
//! template, assembled from configuration.
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::channel::{ChannelConfig, ExecutorChannel, MessageChannel, SubscribableChannel};
use crate::dispatcher::Dispatcher;
use crate::handler::HandlerGroup;
use crate::message::{Message, MessageHeaderAccessor};
use crate::registry::{DestinationMapping, HandlerRegistry, HandlerRegistryBuilder, JsonRpcDestinationMapping};
use crate::resolver::ArgumentResolver;
use crate::return_value::ReturnValueHandler;
use crate::template::{JsonRpcSendingTemplate, SubscriptionRegistry};
use crate::types::{JsonRpcMessage, JsonValue};
use crate::{Result, RpcBusError};

const INBOUND_CHANNEL: &str = "clientInboundChannel";
const OUTBOUND_CHANNEL: &str = "clientOutboundChannel";

/// Configuration of the bus' two channels.
///
/// A channel section that leaves out `name` keeps that channel's default name.
///
/// ```yaml
/// inbound:
///   max_concurrency: 32
/// outbound:
///   shutdown_timeout: 10s
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Carries requests from transports to the dispatcher
    #[serde(deserialize_with = "inbound_section")]
    pub inbound: ChannelConfig,

    /// Carries responses and notifications from the dispatcher to transports
    #[serde(deserialize_with = "outbound_section")]
    pub outbound: ChannelConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbound: ChannelConfig::named(INBOUND_CHANNEL),
            outbound: ChannelConfig::named(OUTBOUND_CHANNEL),
        }
    }
}

fn inbound_section<'de, D>(deserializer: D) -> std::result::Result<ChannelConfig, D::Error>
where
    D: Deserializer<'de>,
{
    channel_section(deserializer, INBOUND_CHANNEL)
}

fn outbound_section<'de, D>(deserializer: D) -> std::result::Result<ChannelConfig, D::Error>
where
    D: Deserializer<'de>,
{
    channel_section(deserializer, OUTBOUND_CHANNEL)
}

fn channel_section<'de, D>(deserializer: D, default_name: &str) -> std::result::Result<ChannelConfig, D::Error>
where
    D: Deserializer<'de>,
{
    /// `name` is taken out here, so the flattened config only sees the other settings.
    #[derive(Deserialize)]
    struct Section {
        name: Option<String>,
        #[serde(flatten)]
        settings: ChannelConfig,
    }

    let Section { name, settings } = Section::deserialize(deserializer)?;
    Ok(ChannelConfig {
        name: name.unwrap_or_else(|| default_name.to_string()),
        ..settings
    })
}

pub struct RpcBusBuilder {
    config: BusConfig,
    groups: Vec<HandlerGroup>,
    mapping: Arc<dyn DestinationMapping>,
    argument_resolvers: Vec<Arc<dyn ArgumentResolver>>,
    return_value_handlers: Vec<Arc<dyn ReturnValueHandler>>,
}

impl RpcBusBuilder {
    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_group(mut self, group: HandlerGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn with_mapping(mut self, mapping: Arc<dyn DestinationMapping>) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_argument_resolver(mut self, resolver: Arc<dyn ArgumentResolver>) -> Self {
        self.argument_resolvers.push(resolver);
        self
    }

    pub fn with_return_value_handler(mut self, handler: Arc<dyn ReturnValueHandler>) -> Self {
        self.return_value_handlers.push(handler);
        self
    }

    /// Register all handler groups and start the channels.
    ///
    /// Fails if two handlers are mapped to the same destination.  Must be called within a tokio
    /// runtime, since subscribing the dispatcher spawns its delivery task.
    pub fn build(self) -> Result<RpcBus> {
        let mut registry = HandlerRegistryBuilder::new(self.mapping);
        for group in self.groups {
            registry = registry.register_group(group)?;
        }
        let registry = Arc::new(registry.build());

        let inbound = ExecutorChannel::new(self.config.inbound);
        let outbound = ExecutorChannel::new(self.config.outbound);
        let subscriptions = Arc::new(SubscriptionRegistry::default());
        let outbound_sender: Arc<dyn MessageChannel<JsonRpcMessage>> = Arc::new(outbound.clone());

        let dispatcher = Arc::new(
            Dispatcher::builder(registry.clone(), outbound_sender.clone())
                .with_subscriptions(subscriptions.clone())
                .with_argument_resolvers(self.argument_resolvers)
                .with_return_value_handlers(self.return_value_handlers)
                .build(),
        );
        let subscriber_id = inbound.subscribe(dispatcher.clone());

        info!(
            inbound = %inbound.name(),
            outbound = %outbound.name(),
            handlers = registry.len(),
            %subscriber_id,
            "RPC bus started"
        );

        Ok(RpcBus {
            template: JsonRpcSendingTemplate::new(outbound_sender, subscriptions.clone()),
            inbound,
            outbound,
            registry,
            dispatcher,
            subscriptions,
        })
    }
}

/// The assembled bus.
///
/// Transports feed requests in with [`RpcBus::receive`] and subscribe to [`RpcBus::outbound`] to
/// get responses and notifications back out; the `sessionId` header says which connection each
/// outbound message belongs to.
pub struct RpcBus {
    inbound: ExecutorChannel<JsonValue>,
    outbound: ExecutorChannel<JsonRpcMessage>,
    registry: Arc<HandlerRegistry>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionRegistry>,
    template: JsonRpcSendingTemplate,
}

impl RpcBus {
    pub fn builder() -> RpcBusBuilder {
        RpcBusBuilder {
            config: BusConfig::default(),
            groups: Vec::new(),
            mapping: Arc::new(JsonRpcDestinationMapping),
            argument_resolvers: Vec::new(),
            return_value_handlers: Vec::new(),
        }
    }

    pub fn inbound(&self) -> &ExecutorChannel<JsonValue> {
        &self.inbound
    }

    pub fn outbound(&self) -> &ExecutorChannel<JsonRpcMessage> {
        &self.outbound
    }

    /// Template for pushing notifications to sessions.
    pub fn template(&self) -> &JsonRpcSendingTemplate {
        &self.template
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Hand a raw JSON payload received on `session_id` to the inbound channel.
    ///
    /// Returns whether the channel accepted it.  Fails once the bus has been shut down.
    pub fn receive(&self, session_id: &str, payload: JsonValue) -> Result<bool> {
        if self.inbound.is_shutdown() {
            return Err(RpcBusError::ChannelClosed {
                channel: self.inbound.name().to_string(),
            });
        }

        let mut accessor = MessageHeaderAccessor::new();
        accessor.set_session_id(session_id)?;

        Ok(self.inbound.send(Message::new(payload, accessor.into_headers())))
    }

    /// Forget a session's subscriptions, once its connection is gone.
    pub fn end_session(&self, session_id: &str) -> usize {
        self.subscriptions.remove_session(session_id)
    }

    /// Drain and stop the inbound channel, then the outbound one, so responses to requests
    /// already received still go out.
    pub async fn shutdown(&self) {
        debug!("Shutting down RPC bus");
        self.inbound.shutdown().await;
        self.outbound.shutdown().await;
        info!("RPC bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FnMessageHandler;
    use crate::handler::{HandlerMethod, Params};
    use crate::testing::init_test_logging;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Calculator;

    async fn add(Params(x): Params<i64>, Params(y): Params<i64>) -> anyhow::Result<i64> {
        Ok(x + y)
    }

    fn calculator() -> HandlerGroup {
        HandlerGroup::new::<Calculator>().method(HandlerMethod::request("add", add).with_param_names(["x", "y"]))
    }

    #[test]
    fn config_from_yaml() {
        let config: BusConfig = serde_yaml::from_str(
            r#"
inbound:
  max_concurrency: 32
outbound:
  name: responses
  shutdown_timeout: 10s
"#,
        )
        .unwrap();

        assert_eq!(config.inbound.name, "clientInboundChannel");
        assert_eq!(config.inbound.max_concurrency, 32);
        assert_eq!(config.outbound.name, "responses");
        assert_eq!(config.outbound.max_concurrency, 16);
        assert_eq!(config.outbound.shutdown_timeout, Some(Duration::from_secs(10)));

        let defaults: BusConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaults.outbound.name, "clientOutboundChannel");
    }

    #[test]
    fn partial_channel_sections_keep_default_names() {
        let config: BusConfig = serde_yaml::from_str("inbound:\n  max_concurrency: 32\n").unwrap();
        assert_eq!(config.inbound.name, "clientInboundChannel");
        assert_eq!(config.inbound.max_concurrency, 32);
        assert_eq!(config.inbound.shutdown_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.outbound.name, "clientOutboundChannel");

        let config: BusConfig = serde_yaml::from_str("outbound:\n  shutdown_timeout: 1m\n").unwrap();
        assert_eq!(config.outbound.name, "clientOutboundChannel");
        assert_eq!(config.outbound.shutdown_timeout, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn request_round_trips_through_both_channels() {
        init_test_logging();

        let bus = RpcBus::builder().with_group(calculator()).build().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.outbound().subscribe(Arc::new(FnMessageHandler::new(move |message: Arc<Message<JsonRpcMessage>>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok(())
            }
        })));

        assert!(
            bus.receive("session-1", json!({"id": 4, "method": "add", "params": {"x": 1, "y": 2}}))
                .unwrap()
        );

        let response = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.headers().session_id(), Some("session-1"));
        assert_eq!(serde_json::to_value(response.payload()).unwrap(), json!({"id": 4, "result": 3}));

        bus.shutdown().await;
        assert_matches!(
            bus.receive("session-1", json!({"id": 5, "method": "add"})),
            Err(RpcBusError::ChannelClosed { channel }) if channel == "clientInboundChannel"
        );
    }

    #[tokio::test]
    async fn ambiguous_mappings_abort_build() {
        struct Other;

        let result = RpcBus::builder()
            .with_group(calculator())
            .with_group(HandlerGroup::new::<Other>().method(HandlerMethod::request("add", add)))
            .build();

        assert_matches!(result.err(), Some(RpcBusError::AmbiguousMapping { .. }));
    }
}
