//! Finding the exception handler for a failed handler.
//!
//! Exception handlers are only considered if they were declared in the same [`HandlerGroup`] as
//! the handler that failed.  Resolvers are built lazily, once per owning type, and cached.
//!
//! [`HandlerGroup`]: crate::HandlerGroup
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::exception::{ErrorKind, HandlerError};
use crate::handler::{ExceptionHandlerMethod, OwnerType};

/// Maps error kinds to the exception handlers of one owning type.
pub struct ExceptionHandlerMethodResolver {
    methods: Vec<ExceptionHandlerMethod>,
    /// Every (kind, method index) pair, in declaration order
    mappings: Vec<(ErrorKind, usize)>,
    lookup_cache: RwLock<HashMap<ErrorKind, Option<usize>>>,
}

impl ExceptionHandlerMethodResolver {
    pub fn new(methods: &[ExceptionHandlerMethod]) -> Self {
        let mappings = methods
            .iter()
            .enumerate()
            .flat_map(|(index, method)| method.kinds().iter().map(move |kind| (*kind, index)))
            .collect();

        Self {
            methods: methods.to_vec(),
            mappings,
            lookup_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn has_exception_mappings(&self) -> bool {
        !self.mappings.is_empty()
    }

    /// The exception handler for `error`: the one declared for the most specific ancestor of its
    /// kind, or failing that the one for its cause, and so on down the cause chain.
    pub fn resolve(&self, error: &HandlerError) -> Option<ExceptionHandlerMethod> {
        let mut current = Some(error);
        while let Some(error) = current {
            if let Some(index) = self.resolve_kind(error.kind()) {
                return Some(self.methods[index].clone());
            }
            current = error.cause();
        }

        None
    }

    /// Index of the method handling `kind`.  Closest ancestor wins; ties go to whichever was
    /// declared first.
    fn resolve_kind(&self, kind: ErrorKind) -> Option<usize> {
        if let Some(cached) = self
            .lookup_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
        {
            return *cached;
        }

        let matched = self
            .mappings
            .iter()
            .filter_map(|(declared, index)| kind.depth_to(declared).map(|depth| (depth, *index)))
            .min_by_key(|(depth, _)| *depth)
            .map(|(_, index)| index);

        trace!(%kind, ?matched, "Resolved exception handler");
        self.lookup_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, matched);

        matched
    }
}

/// Exception resolvers by owning type.
#[derive(Default)]
pub struct ExceptionResolverCache {
    resolvers: RwLock<HashMap<OwnerType, Arc<ExceptionHandlerMethodResolver>>>,
}

impl ExceptionResolverCache {
    /// The resolver for `owner`, built with `create` if this is the first time it's needed.
    ///
    /// If two threads miss at once both may run `create`, but only the first result is kept and
    /// both get that one.
    pub fn get_or_create(
        &self,
        owner: &OwnerType,
        create: impl FnOnce() -> ExceptionHandlerMethodResolver,
    ) -> Arc<ExceptionHandlerMethodResolver> {
        if let Some(resolver) = self
            .resolvers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(owner)
        {
            return resolver.clone();
        }

        let resolver = Arc::new(create());
        self.resolvers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(*owner)
            .or_insert(resolver)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.resolvers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERDRAWN: ErrorKind = ErrorKind::new("Overdrawn", &ErrorKind::INVALID_STATE);

    async fn handle() -> String {
        String::new()
    }

    fn resolver(declared: Vec<(&str, Vec<ErrorKind>)>) -> ExceptionHandlerMethodResolver {
        let methods = declared
            .into_iter()
            .map(|(name, kinds)| ExceptionHandlerMethod::for_kinds(kinds, handle).with_name(name))
            .collect::<Vec<_>>();
        ExceptionHandlerMethodResolver::new(&methods)
    }

    #[test]
    fn most_specific_kind_wins() {
        let resolver = resolver(vec![
            ("on_error", vec![ErrorKind::ERROR]),
            ("on_invalid_argument", vec![ErrorKind::INVALID_ARGUMENT]),
            ("on_runtime", vec![ErrorKind::RUNTIME]),
        ]);

        let resolve = |kind| resolver.resolve(&HandlerError::new(kind, "x")).map(|m| m.name().to_string());
        assert_eq!(resolve(ErrorKind::INVALID_ARGUMENT).as_deref(), Some("on_invalid_argument"));
        assert_eq!(resolve(ErrorKind::INVALID_PARAMS).as_deref(), Some("on_invalid_argument"));
        assert_eq!(resolve(OVERDRAWN).as_deref(), Some("on_runtime"));
        assert_eq!(resolve(ErrorKind::ERROR).as_deref(), Some("on_error"));

        // Answered from the cache the second time
        assert_eq!(resolve(OVERDRAWN).as_deref(), Some("on_runtime"));
    }

    #[test]
    fn ties_go_to_declaration_order() {
        let resolver = resolver(vec![
            ("first", vec![ErrorKind::INVALID_STATE, ErrorKind::RUNTIME]),
            ("second", vec![ErrorKind::INVALID_STATE]),
        ]);

        let method = resolver.resolve(&HandlerError::new(OVERDRAWN, "x")).unwrap();
        assert_eq!(method.name(), "first");
    }

    #[test]
    fn falls_back_to_the_cause() {
        let resolver = resolver(vec![("on_overdrawn", vec![OVERDRAWN])]);

        let error = HandlerError::runtime("transfer failed").with_cause(HandlerError::new(OVERDRAWN, "no money"));
        assert_eq!(resolver.resolve(&error).map(|m| m.name().to_string()).as_deref(), Some("on_overdrawn"));

        assert!(resolver.resolve(&HandlerError::runtime("other")).is_none());
        assert!(resolver.has_exception_mappings());
        assert!(!ExceptionHandlerMethodResolver::new(&[]).has_exception_mappings());
    }

    #[test]
    fn cache_builds_once_per_owner() {
        struct Owner;

        let cache = ExceptionResolverCache::default();
        let owner = OwnerType::of::<Owner>();

        let first = cache.get_or_create(&owner, || resolver(Vec::new()));
        let second = cache.get_or_create(&owner, || panic!("already cached"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
