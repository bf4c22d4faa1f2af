//! The asynchronous callable shared by views, hooks and error handlers.
//!
//! Anything implementing [`Handler`] can be routed. Closures are accepted in
//! the shape `|ctx| Box::pin(async move { ... })`, which keeps every handler
//! asynchronous by construction.
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::core::context::Context;

/// Result of every view, hook and middleware step.
pub type HandlerResult = eyre::Result<()>;

/// An asynchronous request handler operating on the request [`Context`].
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &mut Context) -> HandlerResult;
}

#[async_trait]
impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Shared, type-erased handler.
pub type Endpoint = Arc<dyn Handler>;

/// Box a closure into an [`Endpoint`].
pub fn endpoint<F>(f: F) -> Endpoint
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}
