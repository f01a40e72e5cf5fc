//! Service provision and lookup.

use super::{Effect, Op, Shareable, Step};
use crate::context::{Context, ContextPatch};
use crate::types::{Cause, Defect};
use std::any::type_name;
use std::sync::Arc;

impl<A: Send + 'static, E: Shareable> Effect<A, E> {
    /// Runs the effect with its context transformed by `patch`. The previous
    /// context is restored afterwards.
    #[must_use]
    pub fn provide(self, patch: ContextPatch) -> Self {
        Self::from_op(Arc::new(Op::Provide {
            patch,
            effect: self.op,
        }))
    }

    /// Runs the effect with `service` added to its context.
    #[must_use]
    pub fn provide_service<T: Clone + Send + Sync + 'static>(self, service: T) -> Self {
        self.provide(ContextPatch::add(service))
    }

    /// Runs the effect with exactly `context`.
    #[must_use]
    pub fn provide_context(self, context: Context) -> Self {
        self.provide(ContextPatch::replace(context))
    }

    /// Runs the effect with `context` merged over the current one.
    #[must_use]
    pub fn provide_some(self, context: Context) -> Self {
        self.provide(ContextPatch::merge(context))
    }

    /// Looks up a service and continues with it. Dies if it is missing.
    #[must_use]
    pub fn with_service<T: Clone + Send + Sync + 'static>(
        f: impl Fn(T) -> Self + Send + Sync + 'static,
    ) -> Self {
        Effect::<T, E>::service().flat_map(f)
    }
}

impl<T: Clone + Send + Sync + 'static, E: Shareable> Effect<T, E> {
    /// The service of type `T`. Dies if the context does not hold one.
    #[must_use]
    pub fn service() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            match ctx.context().get::<T>() {
                Some(service) => Step::Value(Box::new(service)),
                None => Step::Failure(Cause::Die(Defect::new(format!(
                    "service not found: {}",
                    type_name::<T>()
                )))),
            }
        }))))
    }
}

impl<T: Clone + Send + Sync + 'static, E: Shareable> Effect<Option<T>, E> {
    /// The service of type `T`, if present.
    #[must_use]
    pub fn service_option() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            Step::Value(Box::new(ctx.context().get::<T>()))
        }))))
    }
}

impl<E: Shareable> Effect<Context, E> {
    /// The current fiber's whole context.
    #[must_use]
    pub fn context() -> Self {
        Self::from_op(Arc::new(Op::WithFiber(Arc::new(|ctx| {
            Step::Value(Box::new(ctx.context().clone()))
        }))))
    }
}
