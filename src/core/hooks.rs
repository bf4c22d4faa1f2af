//! Before/after hooks attached to views.
//!
//! `before(hook)` and `after(hook)` build a [`HookAttachment`] that can be applied
//! to a function view, to one method of a class view, or to every method a class
//! view declares at the time the hook is applied. Each application wraps the
//! endpoint, so the hook applied last runs outermost.
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::core::{
    context::Context,
    handler::{Endpoint, Handler, HandlerResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Before,
    After,
}

/// A hook waiting to be attached to a view.
#[derive(Clone)]
pub struct HookAttachment {
    kind: HookKind,
    hook: Endpoint,
}

impl HookAttachment {
    pub fn new(kind: HookKind, hook: Endpoint) -> Self {
        Self { kind, hook }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Wrap `inner` so the hook runs before or after it.
    pub fn wrap(&self, inner: Endpoint) -> Endpoint {
        Arc::new(Hooked {
            kind: self.kind,
            hook: self.hook.clone(),
            inner,
        })
    }
}

impl std::fmt::Debug for HookAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookAttachment")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Run `hook` before the view. An error skips the view and every after-hook.
pub fn before<F>(hook: F) -> HookAttachment
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HookAttachment::new(HookKind::Before, Arc::new(hook))
}

/// Run `hook` after the view, only when the view succeeded.
pub fn after<F>(hook: F) -> HookAttachment
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HookAttachment::new(HookKind::After, Arc::new(hook))
}

/// Like [`before`], with extra arguments bound at registration time.
pub fn before_with<A, F>(hook: F, args: A) -> HookAttachment
where
    A: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context, &'a A) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HookAttachment::new(HookKind::Before, Arc::new(BoundHook { hook, args }))
}

/// Like [`after`], with extra arguments bound at registration time.
pub fn after_with<A, F>(hook: F, args: A) -> HookAttachment
where
    A: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context, &'a A) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    HookAttachment::new(HookKind::After, Arc::new(BoundHook { hook, args }))
}

struct BoundHook<A, F> {
    hook: F,
    args: A,
}

#[async_trait]
impl<A, F> Handler for BoundHook<A, F>
where
    A: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context, &'a A) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        (self.hook)(ctx, &self.args).await
    }
}

struct Hooked {
    kind: HookKind,
    hook: Endpoint,
    inner: Endpoint,
}

#[async_trait]
impl Handler for Hooked {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        match self.kind {
            HookKind::Before => {
                self.hook.call(ctx).await?;
                self.inner.call(ctx).await
            }
            HookKind::After => {
                self.inner.call(ctx).await?;
                self.hook.call(ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::{app::App, context::Context, handler::endpoint};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, label: &'static str) -> Endpoint {
        let log = log.clone();
        endpoint(move |_ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push(label.to_string());
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_last_applied_hook_runs_outermost() {
        let log: Log = Arc::default();
        let view = recorder(&log, "view");
        let inner = HookAttachment::new(HookKind::Before, recorder(&log, "inner"));
        let outer = HookAttachment::new(HookKind::Before, recorder(&log, "outer"));
        let after_hook = HookAttachment::new(HookKind::After, recorder(&log, "after"));

        let wrapped = after_hook.wrap(outer.wrap(inner.wrap(view)));
        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        wrapped.call(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer", "inner", "view", "after"]
        );
    }

    #[tokio::test]
    async fn test_failing_view_skips_after_hook() {
        let log: Log = Arc::default();
        let failing = endpoint(|_ctx| Box::pin(async { Err(eyre::eyre!("boom")) }));
        let wrapped =
            HookAttachment::new(HookKind::After, recorder(&log, "after")).wrap(failing);

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        assert!(wrapped.call(&mut ctx).await.is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bound_arguments_reach_the_hook() {
        let attachment = before_with::<&'static str, _>(
            |ctx, header| {
                Box::pin(async move {
                    ctx.res.headers.insert(*header, "yes".parse()?);
                    Ok(())
                })
            },
            "x-hooked",
        );
        let wrapped = attachment.wrap(endpoint(|_ctx| Box::pin(async { Ok(()) })));

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        wrapped.call(&mut ctx).await.unwrap();
        assert_eq!(ctx.res.headers.get("x-hooked").unwrap(), "yes");
    }
}
