//! JSON-RPC 2.0 dispatch over an asynchronous in-process message bus.
//!
//! Transports push raw JSON payloads onto an inbound channel.  A dispatcher subscribed to that
//! channel maps each request's `method` to a registered handler, binds the handler's arguments
//! from the request through a chain of argument resolvers, invokes it, and routes the result
//! through a chain of return value handlers onto an outbound channel, from which transports pick
//! up responses and notifications.  Handler failures are routed to exception handlers declared
//! alongside the failed handler, choosing the one registered for the most specific error kind.
//!
//! ```
//! use rpcbus_jsonrpc::{HandlerGroup, HandlerMethod, Params, RpcBus};
//!
//! struct Calculator;
//!
//! async fn add(Params(x): Params<i64>, Params(y): Params<i64>) -> anyhow::Result<i64> {
//!     Ok(x + y)
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rpcbus_jsonrpc::Result<()> {
//! let bus = RpcBus::builder()
//!     .with_group(
//!         HandlerGroup::new::<Calculator>()
//!             .method(HandlerMethod::request("add", add).with_param_names(["x", "y"])),
//!     )
//!     .build()?;
//!
//! assert_eq!(bus.registry().len(), 1);
//! bus.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! The transport itself (sockets, sessions, framing) is outside the scope of this crate.

/// Re-export the exact async-trait macro we use, for compatibility
#[doc(hidden)]
pub use async_trait::async_trait;

mod bus;
mod channel;
mod dispatcher;
mod envelope;
mod error;
mod exception;
mod exception_resolver;
mod handler;
mod message;
mod registry;
mod resolver;
mod return_value;
mod template;
#[cfg(test)]
pub mod testing;
mod types;

pub use bus::{BusConfig, RpcBus, RpcBusBuilder};
pub use channel::{
    ChannelConfig, ExecutorChannel, FnMessageHandler, MessageChannel, MessageHandler, SubscribableChannel, SubscriberId,
};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherBuilder};
pub use envelope::{JsonRpcEnvelope, RequestMessage};
pub use error::{Result, RpcBusError};
pub use exception::{ErrorKind, HandlerError};
pub use exception_resolver::{ExceptionHandlerMethodResolver, ExceptionResolverCache};
pub use handler::{
    Argument, Cause, ExceptionHandlerMethod, Failure, FromArgument, Handler, HandlerFuture, HandlerGroup,
    HandlerMethod, Headers, IntoReturnValue, Json, MappingKind, MatchedHandler, OwnerType, ParamDescriptor, ParamType,
    Params, RequestId, ReturnType, SessionId, SubscribeMethod,
};
pub use message::{Message, MessageHeaderAccessor, MessageHeaders, MessageType, keys};
pub use registry::{DestinationMapping, HandlerRegistry, HandlerRegistryBuilder, JsonRpcDestinationMapping};
pub use resolver::{
    ArgumentResolver, HeadersArgumentResolver, ParamsArgumentResolver, RequestIdArgumentResolver, ResolverComposite,
    default_argument_resolvers,
};
pub use return_value::{ResponseReturnValueHandler, ReturnValueHandler, SubscribeReturnValueHandler};
pub use template::{JsonRpcSendingTemplate, SubscriptionRegistry};
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, Id, JsonRpcMessage, JsonValue, Notification, Request, Response,
    ResponsePayload, SuccessResponse, TwoPointZero,
};
