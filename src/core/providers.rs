//! Named dependency providers.
//!
//! A provider is a factory registered under a name with either an app scope
//! (one value shared by every request, created at startup) or a request scope
//! (created lazily and cached for the lifetime of one request). Views resolve
//! them through [`Context::provider`](crate::core::context::Context::provider).
use std::{any::Any, collections::HashMap, future::Future, sync::Arc};

use eyre::{Result, WrapErr};
use futures_util::future::BoxFuture;
use scc::HashMap as ConcurrentMap;
use thiserror::Error;

/// A type-erased provided value.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderScope {
    Request,
    App,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("no provider named '{name}' is registered")]
    Unknown { name: String },

    #[error("provider '{name}' does not provide a value of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },
}

struct ProviderEntry {
    scope: ProviderScope,
    factory: Factory,
}

/// Factory table keyed by provider name.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
    instances: ConcurrentMap<String, Instance>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider shared by the whole application.
    pub fn app<T, F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.register(name.into(), ProviderScope::App, factory);
    }

    /// Register a provider instantiated once per request.
    pub fn request<T, F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.register(name.into(), ProviderScope::Request, factory);
    }

    fn register<T, F, Fut>(&mut self, name: String, scope: ProviderScope, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let factory: Factory = Arc::new(move || {
            let fut = factory();
            Box::pin(async move { Ok(Arc::new(fut.await?) as Instance) })
        });
        if self
            .entries
            .insert(name.clone(), ProviderEntry { scope, factory })
            .is_some()
        {
            tracing::warn!("Provider '{}' was registered twice, keeping the latest", name);
        }
    }

    pub fn scope(&self, name: &str) -> Option<ProviderScope> {
        self.entries.get(name).map(|entry| entry.scope)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate every app-scoped provider.
    pub(crate) async fn startup(&self) -> Result<()> {
        for (name, entry) in &self.entries {
            if entry.scope == ProviderScope::App {
                self.app_instance(name, entry).await?;
            }
        }
        tracing::debug!("Instantiated app-scoped providers");
        Ok(())
    }

    /// Drop every app-scoped value.
    pub(crate) async fn shutdown(&self) {
        self.instances.retain_async(|_, _| false).await;
    }

    /// Resolve `name`, caching request-scoped values in `request_cache`.
    pub(crate) async fn resolve(
        &self,
        name: &str,
        request_cache: &mut HashMap<String, Instance>,
    ) -> Result<Instance> {
        let entry = self.entries.get(name).ok_or_else(|| ProviderError::Unknown {
            name: name.to_string(),
        })?;

        match entry.scope {
            ProviderScope::App => self.app_instance(name, entry).await,
            ProviderScope::Request => {
                if let Some(instance) = request_cache.get(name) {
                    return Ok(instance.clone());
                }
                let instance = (entry.factory)()
                    .await
                    .wrap_err_with(|| format!("Provider '{name}' failed to initialize"))?;
                request_cache.insert(name.to_string(), instance.clone());
                Ok(instance)
            }
        }
    }

    async fn app_instance(&self, name: &str, entry: &ProviderEntry) -> Result<Instance> {
        let key = name.to_string();
        if let Some(instance) = self
            .instances
            .get_async(&key)
            .await
            .map(|entry| entry.get().clone())
        {
            return Ok(instance);
        }

        let instance = (entry.factory)()
            .await
            .wrap_err_with(|| format!("Provider '{name}' failed to initialize"))?;
        if let Err((key, _)) = self.instances.insert_async(key, instance.clone()).await {
            // Another request created it first; share that one.
            if let Some(existing) = self
                .instances
                .get_async(&key)
                .await
                .map(|entry| entry.get().clone())
            {
                return Ok(existing);
            }
        }
        Ok(instance)
    }
}

/// Downcast a provided value to the type the caller expects.
pub(crate) fn downcast<T: Send + Sync + 'static>(name: &str, instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        ProviderError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_app_scope_is_shared_and_request_scope_is_cached_per_request() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();
        registry.app("config", || async { Ok(String::from("shared")) });
        let counter = created.clone();
        registry.request("token", move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        registry.startup().await.unwrap();

        let mut first_request = HashMap::new();
        let a = registry.resolve("token", &mut first_request).await.unwrap();
        let b = registry.resolve("token", &mut first_request).await.unwrap();
        assert_eq!(*downcast::<usize>("token", a).unwrap(), 0);
        assert_eq!(*downcast::<usize>("token", b).unwrap(), 0);

        let mut second_request = HashMap::new();
        let c = registry.resolve("token", &mut second_request).await.unwrap();
        assert_eq!(*downcast::<usize>("token", c).unwrap(), 1);

        let x = registry.resolve("config", &mut first_request).await.unwrap();
        let y = registry.resolve("config", &mut second_request).await.unwrap();
        assert!(Arc::ptr_eq(&x, &y));
    }

    #[tokio::test]
    async fn test_errors() {
        let mut registry = ProviderRegistry::new();
        registry.request("number", || async { Ok(42u32) });
        registry.request("broken", || async {
            Err::<u32, _>(eyre::eyre!("database unreachable"))
        });

        let mut cache = HashMap::new();
        let err = registry.resolve("missing", &mut cache).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProviderError>(),
            Some(&ProviderError::Unknown {
                name: "missing".to_string()
            })
        );

        let instance = registry.resolve("number", &mut cache).await.unwrap();
        let err = downcast::<String>("number", instance).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::TypeMismatch { .. })
        ));

        let err = registry.resolve("broken", &mut cache).await.unwrap_err();
        assert_eq!(err.to_string(), "Provider 'broken' failed to initialize");
    }

    #[tokio::test]
    async fn test_shutdown_drops_app_instances() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut registry = ProviderRegistry::new();
        registry.app("pool", move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });

        let mut cache = HashMap::new();
        registry.resolve("pool", &mut cache).await.unwrap();
        registry.shutdown().await;
        registry.resolve("pool", &mut cache).await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
