//! User middleware wrapped around the router.
//!
//! Middleware added last runs outermost. `before_dispatch` may return a
//! response to short-circuit: the inner layers, the view and this layer's own
//! `after_dispatch` are skipped, while the layers already entered still run
//! their `after_dispatch`.
use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::core::{
    context::Context,
    handler::{Handler, HandlerResult},
    request::Response,
};

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Runs before routing. Returning a response skips everything inside.
    async fn before_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
        Ok(None)
    }

    /// Runs after the inner layers. Returning a response replaces `ctx.res`.
    async fn after_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
        Ok(None)
    }
}

#[derive(Clone, Default)]
pub struct MiddlewareStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: impl Middleware) {
        self.layers.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run `inner` through every layer, outermost first.
    pub(crate) async fn run(&self, ctx: &mut Context, inner: &dyn Handler) -> HandlerResult {
        let mut entered = Vec::with_capacity(self.layers.len());
        let mut short_circuited = false;

        for layer in self.layers.iter().rev() {
            if let Some(response) = layer.before_dispatch(ctx).await? {
                ctx.res = response;
                short_circuited = true;
                break;
            }
            entered.push(layer);
        }

        if !short_circuited {
            inner.call(ctx).await?;
        }

        for layer in entered.into_iter().rev() {
            if let Some(response) = layer.after_dispatch(ctx).await? {
                ctx.res = response;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("layers", &self.layers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::StatusCode;

    use super::*;
    use crate::core::{app::App, handler::endpoint};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        log: Log,
        short_circuit: bool,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn before_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
            self.log.lock().unwrap().push(format!("{}:before", self.label));
            if self.short_circuit {
                let mut response = Response::default();
                response.set_status(StatusCode::ACCEPTED).text("intercepted");
                return Ok(Some(response));
            }
            Ok(None)
        }

        async fn after_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
            self.log.lock().unwrap().push(format!("{}:after", self.label));
            Ok(None)
        }
    }

    fn view(log: &Log) -> crate::core::handler::Endpoint {
        let log = log.clone();
        endpoint(move |ctx| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().unwrap().push("view".to_string());
                ctx.res.text("view");
                Ok(())
            })
        })
    }

    fn layer(label: &'static str, log: &Log, short_circuit: bool) -> Recording {
        Recording {
            label,
            log: log.clone(),
            short_circuit,
        }
    }

    #[tokio::test]
    async fn test_last_added_runs_outermost() {
        let log: Log = Arc::default();
        let mut stack = MiddlewareStack::new();
        stack.push(layer("first", &log, false));
        stack.push(layer("second", &log, false));

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        stack.run(&mut ctx, view(&log).as_ref()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "second:before",
                "first:before",
                "view",
                "first:after",
                "second:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_view_and_own_after_dispatch() {
        let log: Log = Arc::default();
        let mut stack = MiddlewareStack::new();
        stack.push(layer("inner", &log, false));
        stack.push(layer("guard", &log, true));
        stack.push(layer("outer", &log, false));

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        stack.run(&mut ctx, view(&log).as_ref()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "guard:before", "outer:after"]
        );
        assert_eq!(ctx.res.status, StatusCode::ACCEPTED);
        assert_eq!(ctx.res.body().as_ref(), b"intercepted");
    }

    #[tokio::test]
    async fn test_after_dispatch_response_replaces_inner_response() {
        struct Replace;

        #[async_trait]
        impl Middleware for Replace {
            async fn after_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
                let mut response = Response::default();
                response.text("replaced");
                Ok(Some(response))
            }
        }

        let log: Log = Arc::default();
        let mut stack = MiddlewareStack::new();
        stack.push(Replace);

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        stack.run(&mut ctx, view(&log).as_ref()).await.unwrap();
        assert_eq!(ctx.res.body().as_ref(), b"replaced");
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        struct Failing;

        #[async_trait]
        impl Middleware for Failing {
            async fn before_dispatch(&self, _ctx: &mut Context) -> Result<Option<Response>> {
                Err(eyre::eyre!("rejected"))
            }
        }

        let log: Log = Arc::default();
        let mut stack = MiddlewareStack::new();
        stack.push(Failing);

        let mut ctx = Context::for_path(Arc::new(App::new()), "/");
        let err = stack.run(&mut ctx, view(&log).as_ref()).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert!(log.lock().unwrap().is_empty());
    }
}
