//! The service context carried by every fiber.
//!
//! A [`Context`] maps service types to values. It is persistent: adding a
//! service returns a new context and leaves the original untouched, so a
//! fiber can hand its context to a child without copying.

use hashbrown::HashMap;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Service {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// An immutable map from service type to service value.
#[derive(Clone, Default)]
pub struct Context {
    services: Arc<HashMap<TypeId, Service>>,
}

impl Context {
    /// The empty context.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a context that also holds `value`, replacing any previous
    /// service of the same type.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut services = Arc::clone(&self.services);
        Arc::make_mut(&mut services).insert(
            TypeId::of::<T>(),
            Service {
                name: type_name::<T>(),
                value: Arc::new(value),
            },
        );
        Self { services }
    }

    /// Returns a clone of the service of type `T`.
    #[must_use]
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.get_ref::<T>().cloned()
    }

    /// Borrows the service of type `T`.
    #[must_use]
    pub fn get_ref<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| s.value.downcast_ref::<T>())
    }

    /// Returns true if a service of type `T` is present.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Returns a context holding the services of both, preferring `other`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut services = Arc::clone(&self.services);
        let map = Arc::make_mut(&mut services);
        for (key, service) in other.services.iter() {
            map.insert(*key, service.clone());
        }
        Self { services }
    }

    /// Number of services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no services are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.values().map(|s| s.name).collect();
        names.sort_unstable();
        f.debug_struct("Context").field("services", &names).finish()
    }
}

/// A transformation of a fiber's context, applied for the duration of an
/// effect by [`Effect::provide`](crate::Effect::provide).
#[derive(Clone)]
pub struct ContextPatch(Arc<dyn Fn(&Context) -> Context + Send + Sync>);

impl ContextPatch {
    /// Adds (or replaces) a single service.
    #[must_use]
    pub fn add<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self(Arc::new(move |ctx| ctx.with(value.clone())))
    }

    /// Replaces the whole context.
    #[must_use]
    pub fn replace(context: Context) -> Self {
        Self(Arc::new(move |_| context.clone()))
    }

    /// Merges services into the current context.
    #[must_use]
    pub fn merge(context: Context) -> Self {
        Self(Arc::new(move |ctx| ctx.merge(&context)))
    }

    /// An arbitrary transformation.
    #[must_use]
    pub fn from_fn(f: impl Fn(&Context) -> Context + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Applies the patch.
    #[must_use]
    pub fn apply(&self, context: &Context) -> Context {
        (self.0)(context)
    }
}

impl fmt::Debug for ContextPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextPatch(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Db(&'static str);

    #[derive(Clone, Debug, PartialEq)]
    struct Port(u16);

    #[test]
    fn with_is_persistent() {
        let base = Context::empty().with(Db("primary"));
        let extended = base.with(Port(80));
        assert!(!base.contains::<Port>());
        assert_eq!(extended.get::<Port>(), Some(Port(80)));
        assert_eq!(extended.get::<Db>(), Some(Db("primary")));
    }

    #[test]
    fn merge_prefers_right() {
        let left = Context::empty().with(Db("left")).with(Port(1));
        let right = Context::empty().with(Db("right"));
        let merged = left.merge(&right);
        assert_eq!(merged.get::<Db>(), Some(Db("right")));
        assert_eq!(merged.get::<Port>(), Some(Port(1)));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn patches_compose_with_apply() {
        let ctx = Context::empty().with(Port(1));
        let patched = ContextPatch::add(Db("x")).apply(&ctx);
        assert!(patched.contains::<Db>() && patched.contains::<Port>());
        let replaced = ContextPatch::replace(Context::empty()).apply(&patched);
        assert!(replaced.is_empty());
    }
}
