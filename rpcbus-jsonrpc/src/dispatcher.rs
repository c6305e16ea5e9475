//! The dispatcher takes inbound messages off the inbound channel and runs them through the
//! pipeline: locate the handler, resolve its arguments, invoke it, and hand whatever comes out
//! to the return value handlers.  Failures anywhere along the way take a parallel path through
//! the exception handlers declared next to the failed handler, and if that doesn't work out
//! either, a plain JSON-RPC error response.
//!
//! Nothing that goes wrong while handling one message escapes the dispatcher; every message ends
//! in one of the [`DispatchOutcome`] states.
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{Instrument, debug, debug_span, error, trace, warn};

use crate::channel::{MessageChannel, MessageHandler};
use crate::envelope::{JsonRpcEnvelope, RequestMessage};
use crate::error::panic_err_to_string;
use crate::exception::{ErrorKind, HandlerError};
use crate::exception_resolver::{ExceptionHandlerMethodResolver, ExceptionResolverCache};
use crate::handler::{Argument, HandlerMethod, Invocable, ParamDescriptor, ReturnType};
use crate::message::Message;
use crate::registry::HandlerRegistry;
use crate::resolver::{ArgumentResolver, ResolverComposite, default_argument_resolvers};
use crate::return_value::{ResponseReturnValueHandler, ReturnValueHandler, SubscribeReturnValueHandler};
use crate::template::SubscriptionRegistry;
use crate::types::{ErrorDetails, JsonRpcMessage, JsonValue};
use crate::{Result, RpcBusError};

/// How handling of a message ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum DispatchOutcome {
    /// The message had no destination, so it wasn't meant for the dispatcher
    Ignored,
    /// The handler ran and its return value was handled
    Responded,
    /// The handler failed and an exception handler dealt with it
    ExceptionHandled,
    /// No handler is mapped to the destination
    NotFound,
    /// Something failed and nothing handled it; an error response was sent
    DefaultError,
}

pub struct DispatcherBuilder {
    registry: Arc<HandlerRegistry>,
    outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
    subscriptions: Arc<SubscriptionRegistry>,
    argument_resolvers: Vec<Arc<dyn ArgumentResolver>>,
    return_value_handlers: Vec<Arc<dyn ReturnValueHandler>>,
}

impl DispatcherBuilder {
    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Add a resolver, consulted after the built-in ones.
    pub fn with_argument_resolver(mut self, resolver: Arc<dyn ArgumentResolver>) -> Self {
        self.argument_resolvers.push(resolver);
        self
    }

    pub fn with_argument_resolvers(mut self, resolvers: impl IntoIterator<Item = Arc<dyn ArgumentResolver>>) -> Self {
        self.argument_resolvers.extend(resolvers);
        self
    }

    /// Add a return value handler, consulted after the subscription handler but before the
    /// catch-all response handler.
    pub fn with_return_value_handler(mut self, handler: Arc<dyn ReturnValueHandler>) -> Self {
        self.return_value_handlers.push(handler);
        self
    }

    pub fn with_return_value_handlers(
        mut self,
        handlers: impl IntoIterator<Item = Arc<dyn ReturnValueHandler>>,
    ) -> Self {
        self.return_value_handlers.extend(handlers);
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut arguments = ResolverComposite::new();
        arguments
            .add_resolvers(default_argument_resolvers())
            .add_resolvers(self.argument_resolvers);

        let mut return_values = ResolverComposite::<dyn ReturnValueHandler>::new();
        return_values
            .add_resolver(Arc::new(SubscribeReturnValueHandler::new(
                self.outbound.clone(),
                self.subscriptions,
            )))
            .add_resolvers(self.return_value_handlers)
            .add_resolver(Arc::new(ResponseReturnValueHandler::new(self.outbound.clone())));

        Dispatcher {
            registry: self.registry,
            envelope: JsonRpcEnvelope,
            arguments,
            return_values,
            exception_resolvers: ExceptionResolverCache::default(),
            outbound: self.outbound,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    envelope: JsonRpcEnvelope,
    arguments: ResolverComposite<dyn ArgumentResolver>,
    return_values: ResolverComposite<dyn ReturnValueHandler>,
    exception_resolvers: ExceptionResolverCache,
    outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
}

impl Dispatcher {
    pub fn builder(
        registry: Arc<HandlerRegistry>,
        outbound: Arc<dyn MessageChannel<JsonRpcMessage>>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            outbound,
            subscriptions: Arc::new(SubscriptionRegistry::default()),
            argument_resolvers: Vec::new(),
            return_value_handlers: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn argument_resolvers(&self) -> &ResolverComposite<dyn ArgumentResolver> {
        &self.arguments
    }

    pub fn return_value_handlers(&self) -> &ResolverComposite<dyn ReturnValueHandler> {
        &self.return_values
    }

    /// Handle one inbound message from start to finish.
    pub async fn dispatch(&self, message: &Message<JsonValue>) -> DispatchOutcome {
        let Some(destination) = self.envelope.destination(message) else {
            trace!(message_id = ?message.headers().message_id(), "Message has no destination; ignoring");
            return DispatchOutcome::Ignored;
        };

        let span = debug_span!(
            "dispatch",
            %destination,
            session_id = ?message.headers().session_id(),
            request_id = tracing::field::Empty,
        );

        async move {
            let outcome = self.dispatch_to(&destination, message).await;
            debug!(%outcome, "Dispatched");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch_to(&self, destination: &str, message: &Message<JsonValue>) -> DispatchOutcome {
        let handler = self.registry.get(destination);

        let request = match self.envelope.decode_request(message, handler.map(Arc::as_ref)) {
            Ok(request) => request,
            Err(err) => {
                warn!(err = %err, "Message is not a valid JSON-RPC request");
                let details = ErrorDetails::invalid_request(err.to_string(), None);
                match self.envelope.invalid_request(message, details) {
                    Ok(response) => self.send(response),
                    Err(err) => error!(err = %err, "Failed to build invalid request response"),
                }
                return DispatchOutcome::DefaultError;
            }
        };

        if let Some(id) = &request.payload().id {
            tracing::Span::current().record("request_id", tracing::field::display(id));
        }

        match handler {
            Some(handler) => self.handle_match(handler.clone(), &request).await,
            None => self.handle_no_match(destination, &request),
        }
    }

    fn handle_no_match(&self, destination: &str, request: &RequestMessage) -> DispatchOutcome {
        let err = RpcBusError::UnmappedDestination {
            destination: destination.to_string(),
        };
        debug!(err = %err, "Answering with method not found");
        let details = ErrorDetails::method_not_found(format!("Unknown method '{destination}'"), None);
        self.send_error(request, details);

        DispatchOutcome::NotFound
    }

    async fn handle_match(&self, handler: Arc<HandlerMethod>, request: &RequestMessage) -> DispatchOutcome {
        trace!(handler = %handler.short_log_message(), "Invoking handler");

        let result = match self.invoke(handler.invocable(), request, &[]).await {
            Ok(value) => self
                .handle_return_value(value, handler.return_type(), request)
                .map_err(HandlerError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => DispatchOutcome::Responded,
            Err(err) => self.process_handler_exception(handler, request, err).await,
        }
    }

    /// Try the exception handlers declared alongside `handler`, falling back to an error
    /// response.
    async fn process_handler_exception(
        &self,
        handler: Arc<HandlerMethod>,
        request: &RequestMessage,
        err: HandlerError,
    ) -> DispatchOutcome {
        debug!(err = %err, handler = %handler.short_log_message(), "Handler failed");

        let Some(owner) = handler.owner() else {
            return self.default_error(request, &err);
        };

        let resolver = self.exception_resolvers.get_or_create(owner, || {
            ExceptionHandlerMethodResolver::new(self.registry.exception_handlers_for(owner))
        });
        let Some(exception_handler) = resolver.resolve(&err) else {
            debug!(kind = %err.kind(), "No exception handler for failure");
            return self.default_error(request, &err);
        };

        trace!(exception_handler = %exception_handler.name(), "Invoking exception handler");
        let provided = [
            Argument::Failure(err.clone()),
            Argument::Cause(err.cause().cloned()),
            Argument::Handler(handler.clone()),
        ];

        let result = match self.invoke(exception_handler.invocable(), request, &provided).await {
            Ok(value) => self
                .handle_return_value(value, exception_handler.return_type(), request)
                .map_err(HandlerError::from),
            Err(handler_err) => Err(handler_err),
        };

        match result {
            Ok(()) => DispatchOutcome::ExceptionHandled,
            Err(handler_err) => {
                error!(
                    err = %handler_err,
                    exception_handler = %exception_handler.name(),
                    "Exception handler failed"
                );
                self.default_error(request, &err)
            }
        }
    }

    fn default_error(&self, request: &RequestMessage, err: &HandlerError) -> DispatchOutcome {
        if err.is_a(&ErrorKind::PANIC) {
            error!(err = %err, "Handler panicked");
        }

        self.send_error(request, err.to_error_details());
        DispatchOutcome::DefaultError
    }

    async fn invoke(
        &self,
        invocable: &Invocable,
        request: &RequestMessage,
        provided: &[Argument],
    ) -> Result<JsonValue, HandlerError> {
        // Argument resolvers run inside the unwind guard along with the handler
        let call = async {
            let arguments = self.resolve_arguments(invocable.params(), request, provided)?;
            invocable.invoke(arguments).await
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::new(ErrorKind::PANIC, panic_err_to_string(panic))),
        }
    }

    /// Arguments supplied by the caller take precedence; everything else goes through the
    /// resolver chain.
    fn resolve_arguments(
        &self,
        params: &[ParamDescriptor],
        request: &RequestMessage,
        provided: &[Argument],
    ) -> Result<Vec<Argument>> {
        params
            .iter()
            .map(|param| match provided.iter().find(|arg| arg.matches(param.param_type)) {
                Some(argument) => Ok(argument.clone()),
                None => self.arguments.resolve_argument(param, request),
            })
            .collect()
    }

    fn handle_return_value(&self, value: JsonValue, return_type: &ReturnType, request: &RequestMessage) -> Result<()> {
        self.return_values.handle_return_value(value, return_type, request)
    }

    fn send_error(&self, request: &RequestMessage, details: ErrorDetails) {
        match self.envelope.error_response(request, details) {
            Ok(Some(response)) => self.send(response),
            Ok(None) => debug!("Request has no id; not sending error response"),
            Err(err) => error!(err = %err, "Failed to build error response"),
        }
    }

    fn send(&self, message: Message<JsonRpcMessage>) {
        if !self.outbound.send(message) {
            warn!("Outbound channel dropped the error response");
        }
    }
}

#[async_trait]
impl MessageHandler<JsonValue> for Dispatcher {
    async fn handle_message(&self, message: Arc<Message<JsonValue>>) -> anyhow::Result<()> {
        self.dispatch(&message).await;
        Ok(())
    }
}
