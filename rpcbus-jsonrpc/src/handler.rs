//! Handlers are the application code that runs when a message arrives for a destination.
//!
//! A handler is an ordinary `async fn` (or closure returning a future) whose parameters are all
//! extractors implementing [`FromArgument`], and whose return type implements
//! [`IntoReturnValue`].  Wrapping it in a [`HandlerMethod`] captures a description of each
//! parameter (a [`ParamDescriptor`]) and of the return type (a [`ReturnType`]), which is what the
//! argument resolvers and return value handlers are matched against at dispatch time.
//!
//! Handlers belong to a [`HandlerGroup`], which plays the part of the type that declares them:
//! exception handlers declared on a group only handle failures of that group's handlers.
use std::any::{Any, TypeId};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::RpcBusError;
use crate::exception::{ErrorKind, HandlerError};
use crate::message::MessageHeaders;
use crate::types::{Id, JsonValue};

/// The semantic type of a handler parameter, which decides which argument resolver can supply
/// it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Bound from the request's JSON `params`.
    Params,
    Headers,
    SessionId,
    RequestId,
    SubscribeMethod,
    /// The error being handled; only available to exception handlers.
    Failure,
    /// The cause of the error being handled; only available to exception handlers.
    Cause,
    /// The handler whose failure is being handled; only available to exception handlers.
    Handler,
    /// Supplied by an application-provided [`ArgumentResolver`](crate::ArgumentResolver).
    Custom(&'static str),
}

/// Describes one parameter of a handler.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamDescriptor {
    /// Position in the handler's parameter list
    pub index: usize,
    /// Name used to look the value up in a JSON object of params.  `None` binds the whole params
    /// value.
    pub name: Option<String>,
    /// Position among the handler's JSON-bound parameters, used when params are an array
    pub position: Option<usize>,
    pub param_type: ParamType,
    pub type_name: &'static str,
    pub required: bool,
}

/// Describes what a handler returns, and where that return value should go.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnType {
    pub type_name: &'static str,
    /// Method name stamped on the response, if not the request's own method
    pub response_method: Option<String>,
    /// For subscribe handlers, the method used for later notifications to the subscriber
    pub subscribe_method: Option<String>,
}

/// A value produced by an argument resolver, not yet converted to the extractor type.
#[derive(Clone)]
pub enum Argument {
    Json(JsonValue),
    Headers(MessageHeaders),
    SessionId(Option<String>),
    SubscribeMethod(Option<String>),
    RequestId(Option<Id>),
    Failure(HandlerError),
    Cause(Option<HandlerError>),
    Handler(Arc<HandlerMethod>),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Argument {
    /// True if this argument can be bound to a parameter of the given type.
    pub fn matches(&self, param_type: ParamType) -> bool {
        matches!(
            (self, param_type),
            (Argument::Json(_), ParamType::Params)
                | (Argument::Headers(_), ParamType::Headers)
                | (Argument::SessionId(_), ParamType::SessionId)
                | (Argument::SubscribeMethod(_), ParamType::SubscribeMethod)
                | (Argument::RequestId(_), ParamType::RequestId)
                | (Argument::Failure(_), ParamType::Failure)
                | (Argument::Cause(_), ParamType::Cause)
                | (Argument::Handler(_), ParamType::Handler)
                | (Argument::Custom(_), ParamType::Custom(_))
        )
    }

    /// For custom extractors: the value supplied by a custom resolver, if it has type `T`.
    pub fn downcast_custom<T: Any + Send + Sync>(self) -> Option<Arc<T>> {
        match self {
            Argument::Custom(value) => value.downcast::<T>().ok(),
            _ => None,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Argument::Json(_) => "Json",
            Argument::Headers(_) => "Headers",
            Argument::SessionId(_) => "SessionId",
            Argument::SubscribeMethod(_) => "SubscribeMethod",
            Argument::RequestId(_) => "RequestId",
            Argument::Failure(_) => "Failure",
            Argument::Cause(_) => "Cause",
            Argument::Handler(_) => "Handler",
            Argument::Custom(_) => "Custom",
        }
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Argument::Custom(_) => f.write_str("Custom(..)"),
            other => f.write_str(other.variant_name()),
        }
    }
}

fn mismatch(argument: &Argument, param: &ParamDescriptor) -> HandlerError {
    HandlerError::invalid_state(format!(
        "Resolved a {} argument for parameter {} of type {}",
        argument.variant_name(),
        param.index,
        param.type_name
    ))
}

/// Inspired by axum's `FromRequest` trait, but split differently.
///
/// Extraction happens in two steps: an argument resolver, chosen by the parameter's
/// [`ParamType`], produces an [`Argument`] from the message, and then the extractor converts that
/// argument into itself.  That split is what lets applications plug in their own resolvers
/// without the handler machinery knowing about them.
pub trait FromArgument: Sized + Send + 'static {
    const PARAM_TYPE: ParamType;

    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError>;
}

/// Deserialize the request's params, or one named/positional member of them, into `T`.
pub struct Params<T>(pub T);

impl<T: DeserializeOwned + Send + 'static> FromArgument for Params<T> {
    const PARAM_TYPE: ParamType = ParamType::Params;

    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Json(value) => serde_json::from_value(value.clone())
                .map(Params)
                .map_err(|source| {
                    RpcBusError::DeserParam {
                        source,
                        name: param.name.clone().unwrap_or_else(|| "params".to_string()),
                        type_name: std::any::type_name::<T>(),
                        value,
                    }
                    .into()
                }),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// The raw JSON params (or member of them), without deserializing.
impl FromArgument for JsonValue {
    const PARAM_TYPE: ParamType = ParamType::Params;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Json(value) => Ok(value),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// All headers of the inbound message.
pub struct Headers(pub MessageHeaders);

impl FromArgument for Headers {
    const PARAM_TYPE: ParamType = ParamType::Headers;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Headers(headers) => Ok(Headers(headers)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// The session the inbound message arrived on, if the transport set one.
pub struct SessionId(pub Option<String>);

impl FromArgument for SessionId {
    const PARAM_TYPE: ParamType = ParamType::SessionId;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::SessionId(session_id) => Ok(SessionId(session_id)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// The request's `id`.  `None` for requests that don't expect a response.
pub struct RequestId(pub Option<Id>);

impl FromArgument for RequestId {
    const PARAM_TYPE: ParamType = ParamType::RequestId;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::RequestId(id) => Ok(RequestId(id)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// The notification method bound to the inbound message, if any.
pub struct SubscribeMethod(pub Option<String>);

impl FromArgument for SubscribeMethod {
    const PARAM_TYPE: ParamType = ParamType::SubscribeMethod;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::SubscribeMethod(method) => Ok(SubscribeMethod(method)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// In an exception handler, the error being handled.
pub struct Failure(pub HandlerError);

impl FromArgument for Failure {
    const PARAM_TYPE: ParamType = ParamType::Failure;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Failure(error) => Ok(Failure(error)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// In an exception handler, the cause of the error being handled.
pub struct Cause(pub Option<HandlerError>);

impl FromArgument for Cause {
    const PARAM_TYPE: ParamType = ParamType::Cause;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Cause(cause) => Ok(Cause(cause)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// In an exception handler, the handler that failed.
pub struct MatchedHandler(pub Arc<HandlerMethod>);

impl FromArgument for MatchedHandler {
    const PARAM_TYPE: ParamType = ParamType::Handler;

    fn from_argument(argument: Argument, param: &ParamDescriptor) -> Result<Self, HandlerError> {
        match argument {
            Argument::Handler(handler) => Ok(MatchedHandler(handler)),
            other => Err(mismatch(&other, param)),
        }
    }
}

/// A Rust struct serialized to JSON when returned from a handler.
pub struct Json<T>(pub T);

/// Type implemented by anything a handler can return.
pub trait IntoReturnValue: Send + 'static {
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Convert to the JSON value handed to the return value handlers, or to the failure that
    /// takes the exception path instead.
    fn into_return_value(self) -> Result<JsonValue, HandlerError>;
}

fn to_json<T: Serialize>(value: T) -> Result<JsonValue, HandlerError> {
    serde_json::to_value(value).map_err(|source| {
        RpcBusError::SerResult {
            source,
            type_name: std::any::type_name::<T>(),
        }
        .into()
    })
}

/// Handlers that return a result succeed if the success type serializes; the error type just
/// needs to convert into [`HandlerError`], which `anyhow::Error` and this crate's errors do.
impl<T, E> IntoReturnValue for Result<T, E>
where
    T: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
{
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn into_return_value(self) -> Result<JsonValue, HandlerError> {
        match self {
            Ok(value) => to_json(value),
            Err(e) => Err(e.into()),
        }
    }
}

impl IntoReturnValue for JsonValue {
    fn into_return_value(self) -> Result<JsonValue, HandlerError> {
        Ok(self)
    }
}

/// Handlers with nothing to say respond with `null`.
impl IntoReturnValue for () {
    fn into_return_value(self) -> Result<JsonValue, HandlerError> {
        Ok(JsonValue::Null)
    }
}

impl IntoReturnValue for String {
    fn into_return_value(self) -> Result<JsonValue, HandlerError> {
        Ok(JsonValue::String(self))
    }
}

impl<T: Serialize + Send + 'static> IntoReturnValue for Json<T> {
    fn type_name() -> &'static str {
        std::any::type_name::<T>()
    }

    fn into_return_value(self) -> Result<JsonValue, HandlerError> {
        to_json(self.0)
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<JsonValue, HandlerError>> + Send + 'static>>;

/// A handler function, as seen by the dispatcher.
///
/// This trait is implemented for async functions of up to six [`FromArgument`] parameters; it's
/// not expected that applications implement it themselves.
///
/// ## Type Parameters
///
/// - `HackT`: This is a hack to get around Rust's rules for trait implementation.  To `impl Trait`
///   with type parameters, those type parameters have to be constrained to the trait itself or
///   the implementing type.  When we make blanket impls for all async functions that take certain
///   types of args, those arg types need to be part of the trait signature.  This type parameter
///   is erased once the handler is wrapped in a [`HandlerMethod`], so try to ignore it mentally.
pub trait Handler<HackT>: Clone + Send + Sync + Sized + 'static {
    /// The semantic type and Rust type name of each parameter, in order.
    fn param_types() -> Vec<(ParamType, &'static str)>;

    fn return_type_name() -> &'static str;

    /// Convert resolved arguments into the function's parameters and call it.
    fn call(self, arguments: Vec<Argument>, params: Arc<[ParamDescriptor]>) -> HandlerFuture;
}

/// Heavily influenced by axum (see <https://github.com/tokio-rs/axum/blob/170d7d4dcc8a1368e7bea68f517a7791aff89422/axum/src/handler/mod.rs#L206C1-L244C2>)
/// This macro generates the [`Handler`] impl for async functions taking the given parameters.
macro_rules! impl_handler {
    (
        [$($ty:ident),*]
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoReturnValue,
            $( $ty: FromArgument, )*
        {
            fn param_types() -> Vec<(ParamType, &'static str)> {
                vec![$(($ty::PARAM_TYPE, $ty::type_name()),)*]
            }

            fn return_type_name() -> &'static str {
                Res::type_name()
            }

            fn call(self, arguments: Vec<Argument>, params: Arc<[ParamDescriptor]>) -> HandlerFuture {
                async move {
                    let mut arguments = arguments.into_iter().zip(params.iter());

                    $(
                        let $ty = match arguments.next() {
                            Some((argument, param)) => $ty::from_argument(argument, param)?,
                            None => return Err(HandlerError::invalid_state(
                                "Handler invoked with fewer arguments than parameters",
                            )),
                        };
                    )*

                    self($($ty,)*).await.into_return_value()
                }
                .boxed()
            }
        }
    };
}

impl_handler!([]);
impl_handler!([T1]);
impl_handler!([T1, T2]);
impl_handler!([T1, T2, T3]);
impl_handler!([T1, T2, T3, T4]);
impl_handler!([T1, T2, T3, T4, T5]);
impl_handler!([T1, T2, T3, T4, T5, T6]);

type Invoker = Arc<dyn Fn(Vec<Argument>, Arc<[ParamDescriptor]>) -> HandlerFuture + Send + Sync>;

/// A type-erased handler function along with the description of its signature.
#[derive(Clone)]
pub(crate) struct Invocable {
    name: String,
    /// Every function and closure has its own type, so this identifies the handler itself
    handler_id: TypeId,
    params: Arc<[ParamDescriptor]>,
    return_type: ReturnType,
    invoker: Invoker,
}

impl Invocable {
    fn new<H, HackT>(handler: H) -> Self
    where
        H: Handler<HackT>,
    {
        let mut json_params = 0;
        let params = H::param_types()
            .into_iter()
            .enumerate()
            .map(|(index, (param_type, type_name))| {
                let position = (param_type == ParamType::Params).then(|| {
                    json_params += 1;
                    json_params - 1
                });

                ParamDescriptor {
                    index,
                    name: None,
                    position,
                    param_type,
                    type_name,
                    required: true,
                }
            })
            .collect::<Vec<_>>();

        Self {
            name: std::any::type_name::<H>().to_string(),
            handler_id: TypeId::of::<H>(),
            params: params.into(),
            return_type: ReturnType {
                type_name: H::return_type_name(),
                response_method: None,
                subscribe_method: None,
            },
            invoker: Arc::new(move |arguments: Vec<Argument>, params: Arc<[ParamDescriptor]>| {
                handler.clone().call(arguments, params)
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub(crate) fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    pub(crate) fn invoke(&self, arguments: Vec<Argument>) -> HandlerFuture {
        (self.invoker)(arguments, self.params.clone())
    }

    fn with_param_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut params = self.params.to_vec();
        for (param, name) in params
            .iter_mut()
            .filter(|param| param.param_type == ParamType::Params)
            .zip(names)
        {
            param.name = Some(name.into());
        }
        self.params = params.into();
    }

    fn with_optional_params(&mut self, names: &[&str]) {
        let mut params = self.params.to_vec();
        for param in params.iter_mut() {
            if param.name.as_deref().is_some_and(|name| names.contains(&name)) {
                param.required = false;
            }
        }
        self.params = params.into();
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocable")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

/// Identifies the type that declares a group of handlers.
#[derive(Clone, Copy)]
pub struct OwnerType {
    id: TypeId,
    type_name: &'static str,
}

impl OwnerType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for OwnerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerType {}

impl std::hash::Hash for OwnerType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Whether a handler answers ordinary requests or registers subscriptions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MappingKind {
    Request,
    Subscribe,
}

/// A handler function bound to a destination, plus everything known about its signature.
#[derive(Clone)]
pub struct HandlerMethod {
    invocable: Invocable,
    kind: MappingKind,
    destination: String,
    mapped_destination: Option<String>,
    owner: Option<OwnerType>,
}

impl HandlerMethod {
    /// A handler for requests sent to `destination`, answered with a response.
    pub fn request<H, HackT>(destination: impl Into<String>, handler: H) -> Self
    where
        H: Handler<HackT>,
    {
        Self {
            invocable: Invocable::new(handler),
            kind: MappingKind::Request,
            destination: destination.into(),
            mapped_destination: None,
            owner: None,
        }
    }

    /// A handler for subscription requests sent to `destination`.
    ///
    /// The handler's return value acknowledges the subscription.  Afterwards the session can be
    /// sent notifications with the method `notification_method`.
    pub fn subscribe<H, HackT>(
        destination: impl Into<String>,
        notification_method: impl Into<String>,
        handler: H,
    ) -> Self
    where
        H: Handler<HackT>,
    {
        let mut method = Self::request(destination, handler);
        method.kind = MappingKind::Subscribe;
        method.invocable.return_type.subscribe_method = Some(notification_method.into());
        method
    }

    /// Name the handler's JSON-bound parameters, in order.  Named parameters are looked up by
    /// name when params are an object, and by position when they are an array.
    ///
    /// Unnamed parameters bind the whole params value, so a handler with more than one
    /// JSON-bound parameter needs names for all of them.
    pub fn with_param_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invocable.with_param_names(names);
        self
    }

    /// Mark named parameters as optional.  Missing optional parameters bind `null`.
    pub fn with_optional_params(mut self, names: &[&str]) -> Self {
        self.invocable.with_optional_params(names);
        self
    }

    /// Stamp responses with this method name instead of the request's.
    pub fn with_response_method(mut self, method: impl Into<String>) -> Self {
        self.invocable.return_type.response_method = Some(method.into());
        self
    }

    /// Override the name used in logs.  Defaults to the handler's Rust type name, which isn't
    /// very readable for closures.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.invocable.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        self.invocable.name()
    }

    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    /// The destination this handler is registered under, including any group prefix.
    pub fn destination(&self) -> &str {
        self.mapped_destination.as_deref().unwrap_or(&self.destination)
    }

    /// The destination as declared, without any group prefix.
    pub fn declared_destination(&self) -> &str {
        &self.destination
    }

    pub fn owner(&self) -> Option<&OwnerType> {
        self.owner.as_ref()
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        self.invocable.params()
    }

    pub fn return_type(&self) -> &ReturnType {
        self.invocable.return_type()
    }

    pub(crate) fn invocable(&self) -> &Invocable {
        &self.invocable
    }

    pub(crate) fn with_mapped_destination(mut self, destination: String) -> Self {
        self.mapped_destination = Some(destination);
        self
    }

    /// True if `other` is the same handler, re-registered, rather than a different handler
    /// competing for the same destination.
    pub fn is_same_handler(&self, other: &HandlerMethod) -> bool {
        self.owner == other.owner
            && self.kind == other.kind
            && self.invocable.handler_id == other.invocable.handler_id
            && self.invocable.params == other.invocable.params
            && self.invocable.return_type == other.invocable.return_type
    }

    pub fn short_log_message(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}::{}", owner.type_name(), self.name()),
            None => self.name().to_string(),
        }
    }
}

impl fmt::Debug for HandlerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerMethod")
            .field("destination", &self.destination())
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("invocable", &self.invocable)
            .finish()
    }
}

/// A function that handles failures of the handlers declared alongside it.
#[derive(Clone, Debug)]
pub struct ExceptionHandlerMethod {
    invocable: Invocable,
    kinds: Vec<ErrorKind>,
}

impl ExceptionHandlerMethod {
    /// Handle failures of any kind.
    pub fn new<H, HackT>(handler: H) -> Self
    where
        H: Handler<HackT>,
    {
        Self::for_kinds([ErrorKind::ERROR], handler)
    }

    /// Handle failures of the given kinds and their descendants.
    pub fn for_kinds<H, HackT>(kinds: impl IntoIterator<Item = ErrorKind>, handler: H) -> Self
    where
        H: Handler<HackT>,
    {
        Self {
            invocable: Invocable::new(handler),
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn with_response_method(mut self, method: impl Into<String>) -> Self {
        self.invocable.return_type.response_method = Some(method.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.invocable.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        self.invocable.name()
    }

    pub fn kinds(&self) -> &[ErrorKind] {
        &self.kinds
    }

    pub fn return_type(&self) -> &ReturnType {
        self.invocable.return_type()
    }

    pub(crate) fn invocable(&self) -> &Invocable {
        &self.invocable
    }
}

/// A set of handlers and exception handlers declared together, playing the part of a class.
///
/// ```
/// use rpcbus_jsonrpc::{HandlerGroup, HandlerMethod, Params};
///
/// struct Calculator;
///
/// async fn negate(Params(x): Params<i64>) -> Result<i64, anyhow::Error> {
///     Ok(-x)
/// }
///
/// let group = HandlerGroup::new::<Calculator>()
///     .with_prefix("calc.")
///     .method(HandlerMethod::request("negate", negate));
/// assert_eq!(group.methods().len(), 1);
/// ```
#[derive(Debug)]
pub struct HandlerGroup {
    owner: OwnerType,
    prefix: Option<String>,
    methods: Vec<HandlerMethod>,
    exception_handlers: Vec<ExceptionHandlerMethod>,
}

impl HandlerGroup {
    pub fn new<T: ?Sized + 'static>() -> Self {
        Self {
            owner: OwnerType::of::<T>(),
            prefix: None,
            methods: Vec::new(),
            exception_handlers: Vec::new(),
        }
    }

    /// Prepend `prefix` to the destination of every handler in the group.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn method(mut self, mut method: HandlerMethod) -> Self {
        method.owner = Some(self.owner);
        self.methods.push(method);
        self
    }

    /// Exception handlers are tried in declaration order when two are equally specific.
    pub fn exception_handler(mut self, handler: ExceptionHandlerMethod) -> Self {
        self.exception_handlers.push(handler);
        self
    }

    pub fn owner(&self) -> &OwnerType {
        &self.owner
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn methods(&self) -> &[HandlerMethod] {
        &self.methods
    }

    pub fn exception_handlers(&self) -> &[ExceptionHandlerMethod] {
        &self.exception_handlers
    }

    pub(crate) fn into_parts(self) -> (OwnerType, Option<String>, Vec<HandlerMethod>, Vec<ExceptionHandlerMethod>) {
        (self.owner, self.prefix, self.methods, self.exception_handlers)
    }
}
