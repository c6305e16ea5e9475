//! Argument resolvers supply the values of handler parameters from an inbound request.
//!
//! Resolvers are consulted through a [`ResolverComposite`], which always picks the first
//! resolver that supports a parameter, never the best one.
use std::sync::Arc;

use crate::envelope::RequestMessage;
use crate::handler::{Argument, ParamDescriptor, ParamType};
use crate::types::JsonValue;
use crate::{Result, RpcBusError};

/// An ordered chain of strategies.  Shared by argument resolvers and return value handlers.
pub struct ResolverComposite<R: ?Sized> {
    resolvers: Vec<Arc<R>>,
}

impl<R: ?Sized> Default for ResolverComposite<R> {
    fn default() -> Self {
        Self { resolvers: Vec::new() }
    }
}

impl<R: ?Sized> Clone for ResolverComposite<R> {
    fn clone(&self) -> Self {
        Self {
            resolvers: self.resolvers.clone(),
        }
    }
}

impl<R: ?Sized> ResolverComposite<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resolver(&mut self, resolver: Arc<R>) -> &mut Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn add_resolvers(&mut self, resolvers: impl IntoIterator<Item = Arc<R>>) -> &mut Self {
        self.resolvers.extend(resolvers);
        self
    }

    pub fn resolvers(&self) -> &[Arc<R>] {
        &self.resolvers
    }

    pub fn clear(&mut self) {
        self.resolvers.clear();
    }

    /// The first resolver matching `supports`.  Later resolvers are not even asked.
    pub fn find(&self, supports: impl Fn(&R) -> bool) -> Option<&Arc<R>> {
        self.resolvers.iter().find(|resolver| supports(resolver))
    }
}

/// Supplies one kind of handler parameter.
pub trait ArgumentResolver: Send + Sync + 'static {
    fn supports_parameter(&self, param: &ParamDescriptor) -> bool;

    fn resolve_argument(&self, param: &ParamDescriptor, message: &RequestMessage) -> Result<Argument>;
}

impl ResolverComposite<dyn ArgumentResolver> {
    pub fn supports_parameter(&self, param: &ParamDescriptor) -> bool {
        self.find(|resolver| resolver.supports_parameter(param)).is_some()
    }

    pub fn resolve_argument(&self, param: &ParamDescriptor, message: &RequestMessage) -> Result<Argument> {
        match self.find(|resolver| resolver.supports_parameter(param)) {
            Some(resolver) => resolver.resolve_argument(param, message),
            None => Err(RpcBusError::UnsupportedParameter {
                index: param.index,
                type_name: param.type_name,
            }),
        }
    }
}

/// Binds [`ParamType::Params`] parameters from the request's `params`.
///
/// An unnamed parameter gets the whole value, or `null` if the request has no params.  A named
/// parameter gets the field of that name if params are an object, or the element at the
/// parameter's position if they are an array.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParamsArgumentResolver;

impl ArgumentResolver for ParamsArgumentResolver {
    fn supports_parameter(&self, param: &ParamDescriptor) -> bool {
        param.param_type == ParamType::Params
    }

    fn resolve_argument(&self, param: &ParamDescriptor, message: &RequestMessage) -> Result<Argument> {
        let params = message.payload().params.as_ref();

        let Some(name) = &param.name else {
            return Ok(Argument::Json(params.cloned().unwrap_or(JsonValue::Null)));
        };

        let value = match params {
            Some(JsonValue::Object(fields)) => fields.get(name),
            Some(JsonValue::Array(items)) => param.position.and_then(|position| items.get(position)),
            _ => None,
        };

        match value {
            Some(value) => Ok(Argument::Json(value.clone())),
            None if param.required => Err(RpcBusError::MissingParameter { name: name.clone() }),
            None => Ok(Argument::Json(JsonValue::Null)),
        }
    }
}

/// Supplies headers, or individual well-known headers.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadersArgumentResolver;

impl ArgumentResolver for HeadersArgumentResolver {
    fn supports_parameter(&self, param: &ParamDescriptor) -> bool {
        matches!(
            param.param_type,
            ParamType::Headers | ParamType::SessionId | ParamType::SubscribeMethod
        )
    }

    fn resolve_argument(&self, param: &ParamDescriptor, message: &RequestMessage) -> Result<Argument> {
        let headers = message.headers();
        match param.param_type {
            ParamType::SessionId => Ok(Argument::SessionId(headers.session_id().map(str::to_owned))),
            ParamType::SubscribeMethod => Ok(Argument::SubscribeMethod(
                headers.subscribe_method().map(str::to_owned),
            )),
            _ => Ok(Argument::Headers(headers.clone())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RequestIdArgumentResolver;

impl ArgumentResolver for RequestIdArgumentResolver {
    fn supports_parameter(&self, param: &ParamDescriptor) -> bool {
        param.param_type == ParamType::RequestId
    }

    fn resolve_argument(&self, _param: &ParamDescriptor, message: &RequestMessage) -> Result<Argument> {
        Ok(Argument::RequestId(message.payload().id.clone()))
    }
}

/// The resolvers every dispatcher starts with, in order.
pub fn default_argument_resolvers() -> Vec<Arc<dyn ArgumentResolver>> {
    vec![
        Arc::new(HeadersArgumentResolver),
        Arc::new(RequestIdArgumentResolver),
        Arc::new(ParamsArgumentResolver),
    ]
}
