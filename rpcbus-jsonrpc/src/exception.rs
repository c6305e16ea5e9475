//! Failures raised by handlers, and the hierarchy of kinds used to route them to exception
//! handlers.
//!
//! Rust has no class hierarchy to match errors against, so every [`HandlerError`] carries an
//! [`ErrorKind`], and every kind except the root names its parent.  Exception handlers are
//! declared against kinds, and the most specific declared kind wins when an error is raised.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::RpcBusError;
use crate::types::{ErrorCode, ErrorDetails, JsonValue};

/// A node in the error kind hierarchy.
///
/// Kinds are compared by name, so applications declaring their own kinds should pick names that
/// don't collide with the built-in ones.
///
/// ```
/// use rpcbus_jsonrpc::ErrorKind;
///
/// const OVERDRAWN: ErrorKind = ErrorKind::new("Overdrawn", &ErrorKind::INVALID_STATE);
///
/// assert!(OVERDRAWN.is_a(&ErrorKind::RUNTIME));
/// assert_eq!(OVERDRAWN.depth_to(&ErrorKind::INVALID_STATE), Some(1));
/// ```
#[derive(Clone, Copy)]
pub struct ErrorKind {
    name: &'static str,
    parent: Option<&'static ErrorKind>,
}

impl ErrorKind {
    /// Root of the hierarchy; an exception handler declared for this kind handles everything.
    pub const ERROR: ErrorKind = ErrorKind::root("Error");
    pub const RUNTIME: ErrorKind = ErrorKind::new("Runtime", &ErrorKind::ERROR);
    pub const INVALID_ARGUMENT: ErrorKind = ErrorKind::new("InvalidArgument", &ErrorKind::RUNTIME);
    pub const INVALID_STATE: ErrorKind = ErrorKind::new("InvalidState", &ErrorKind::RUNTIME);
    /// Request params could not be bound to the handler's parameters.
    pub const INVALID_PARAMS: ErrorKind = ErrorKind::new("InvalidParams", &ErrorKind::INVALID_ARGUMENT);
    /// No argument resolver supports one of the handler's parameters.
    pub const UNSUPPORTED_PARAMETER: ErrorKind = ErrorKind::new("UnsupportedParameter", &ErrorKind::INVALID_STATE);
    /// No return value handler supports the handler's return type.
    pub const UNSUPPORTED_RETURN_TYPE: ErrorKind =
        ErrorKind::new("UnsupportedReturnType", &ErrorKind::INVALID_STATE);
    /// The handler panicked.
    pub const PANIC: ErrorKind = ErrorKind::new("Panic", &ErrorKind::RUNTIME);

    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn new(name: &'static str, parent: &'static ErrorKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ErrorKind> {
        self.parent
    }

    /// Number of steps up the hierarchy from `self` to `ancestor`; zero if they are the same kind,
    /// `None` if `ancestor` is not an ancestor at all.
    pub fn depth_to(&self, ancestor: &ErrorKind) -> Option<usize> {
        self.ancestors().position(|kind| kind == *ancestor)
    }

    /// True if `self` is `other` or one of its descendants.
    pub fn is_a(&self, other: &ErrorKind) -> bool {
        self.depth_to(other).is_some()
    }

    /// Iterate over this kind and its ancestors, most specific first.
    pub fn ancestors(&self) -> impl Iterator<Item = ErrorKind> {
        std::iter::successors(Some(*self), |kind| kind.parent.copied())
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ErrorKind {}

impl Hash for ErrorKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// An error raised while binding arguments for, invoking, or handling the result of a handler.
///
/// Unlike [`RpcBusError`], this is a plain value: it's cheap to clone, so the same failure can be
/// handed to an exception handler as an argument and still be reported afterwards.
#[derive(Clone, Debug)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
    code: Option<ErrorCode>,
    data: Option<JsonValue>,
    cause: Option<Arc<HandlerError>>,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            data: None,
            cause: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RUNTIME, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::INVALID_ARGUMENT, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::INVALID_STATE, message)
    }

    /// Build a runtime error from any std error, carrying its `source` chain as causes.
    pub fn from_std_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut error = Self::runtime(err.to_string());
        error.cause = err.source().map(|source| Arc::new(Self::from_std_error(source)));
        error
    }

    pub fn with_cause(mut self, cause: HandlerError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Report this error with an explicit JSON-RPC error code, overriding the kind's default.
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    pub fn data(&self) -> Option<&JsonValue> {
        self.data.as_ref()
    }

    pub fn cause(&self) -> Option<&HandlerError> {
        self.cause.as_deref()
    }

    pub fn is_a(&self, kind: &ErrorKind) -> bool {
        self.kind.is_a(kind)
    }

    /// The JSON-RPC error object reported to the caller when nothing handled this error.
    pub fn to_error_details(&self) -> ErrorDetails {
        let code = self.code.unwrap_or_else(|| {
            if self.is_a(&ErrorKind::INVALID_PARAMS) || self.is_a(&ErrorKind::UNSUPPORTED_PARAMETER) {
                ErrorCode::InvalidParams
            } else {
                ErrorCode::InternalError
            }
        });

        ErrorDetails::new(code, self.message.clone(), self.data.clone())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<RpcBusError> for HandlerError {
    fn from(err: RpcBusError) -> Self {
        let kind = match &err {
            RpcBusError::MissingParameter { .. } | RpcBusError::DeserParam { .. } => ErrorKind::INVALID_PARAMS,
            RpcBusError::UnsupportedParameter { .. } => ErrorKind::UNSUPPORTED_PARAMETER,
            RpcBusError::UnsupportedReturnType { .. } => ErrorKind::UNSUPPORTED_RETURN_TYPE,
            RpcBusError::InvalidRequest { .. } => ErrorKind::INVALID_ARGUMENT,
            _ => ErrorKind::RUNTIME,
        };

        Self {
            kind,
            ..Self::from_std_error(&err)
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::INVALID_ARGUMENT,
            ..Self::from_std_error(&err)
        }
    }
}

/// Handlers written against `anyhow` can use `?` freely.  A `HandlerError` that was wrapped in
/// an `anyhow::Error` comes back out intact; anything else becomes a runtime error whose causes
/// mirror the `anyhow` chain.
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<HandlerError>() {
            Ok(handler_error) => handler_error,
            Err(err) => {
                let messages = err.chain().map(|e| e.to_string()).collect::<Vec<_>>();
                let mut cause = None;
                for message in messages.into_iter().rev() {
                    let mut error = HandlerError::runtime(message);
                    error.cause = cause.map(Arc::new);
                    cause = Some(error);
                }

                cause.unwrap_or_else(|| HandlerError::runtime("unknown error"))
            }
        }
    }
}
