//! Task resources.
//!
//! A Task state's `Resource` string is looked up in a [`ResourceRegistry`].
//! Handlers are plain async functions from the effective input to a
//! result or a [`Failure`].

use crate::core::Failure;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

/// Work performed by a Task state.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value, Failure>;
}

/// Adapts a synchronous closure into a [`TaskHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(Value) -> Result<Value, Failure> + Send + Sync,
{
    async fn invoke(&self, input: Value) -> Result<Value, Failure> {
        (self.0)(input)
    }
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct AsyncFnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for AsyncFnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Failure>> + Send,
{
    async fn invoke(&self, input: Value) -> Result<Value, Failure> {
        (self.0)(input).await
    }
}

/// Handlers keyed by resource identifier. Cloning shares the registry.
///
/// # Example
///
/// ```rust
/// use stepwise::execution::ResourceRegistry;
/// use serde_json::json;
///
/// let registry = ResourceRegistry::new();
/// registry.register_fn("double", |input| {
///     Ok(json!(input.as_i64().unwrap_or(0) * 2))
/// });
/// assert!(registry.contains("double"));
/// assert!(registry.get("triple").is_none());
/// ```
#[derive(Clone, Default)]
pub struct ResourceRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `resource`.
    pub fn register(&self, resource: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource.into(), Arc::new(handler));
    }

    pub fn register_fn<F>(&self, resource: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Result<Value, Failure> + Send + Sync + 'static,
    {
        self.register(resource, FnHandler(handler));
    }

    pub fn register_async<F, Fut>(&self, resource: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Failure>> + Send + 'static,
    {
        self.register(resource, AsyncFnHandler(handler));
    }

    pub fn get(&self, resource: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.get(resource).is_some()
    }

    pub fn remove(&self, resource: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource)
            .is_some()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = handlers.keys().collect();
        names.sort();
        f.debug_struct("ResourceRegistry")
            .field("resources", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorName;
    use serde_json::json;

    #[tokio::test]
    async fn sync_and_async_handlers() {
        let registry = ResourceRegistry::new();
        registry.register_fn("inc", |v| Ok(json!(v.as_i64().unwrap_or(0) + 1)));
        registry.register_async("shout", |v: Value| async move {
            Ok::<_, Failure>(json!(v.as_str().unwrap_or_default().to_uppercase()))
        });

        let inc = registry.get("inc").unwrap();
        assert_eq!(inc.invoke(json!(1)).await.unwrap(), json!(2));

        let shout = registry.get("shout").unwrap();
        assert_eq!(shout.invoke(json!("hi")).await.unwrap(), json!("HI"));
    }

    #[tokio::test]
    async fn failures_pass_through() {
        let registry = ResourceRegistry::new();
        registry.register_fn("boom", |_| {
            Err(Failure::new(ErrorName::Custom("Boom".into()), "always"))
        });
        let err = registry.get("boom").unwrap().invoke(json!({})).await.unwrap_err();
        assert_eq!(err.error, ErrorName::Custom("Boom".into()));
    }

    #[test]
    fn clones_share_handlers() {
        let registry = ResourceRegistry::new();
        let clone = registry.clone();
        clone.register_fn("x", Ok);
        assert!(registry.contains("x"));
        assert!(registry.remove("x"));
        assert!(!clone.contains("x"));
    }
}
