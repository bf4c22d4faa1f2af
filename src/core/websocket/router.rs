//! Routing for WebSocket connections.
//!
//! Patterns compile exactly like HTTP patterns and match first-registered
//! first. An unmatched path is closed with 403. A view that finishes normally
//! closes with 1000; a view that fails closes with 1011, unless the failure is
//! a client disconnect whose code the route catches.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::Instrument;

use crate::{
    core::{
        app::App,
        converter::Converter,
        error::RouteDeclarationError,
        error_handlers::{catch_panics, find_error},
        handler::HandlerResult,
        pattern::CompiledPattern,
        request::Request,
        websocket::{
            codes,
            connection::{ConnectionState, WebSocket, WebSocketError, WebSocketOptions},
        },
    },
    metrics,
    ports::websocket::WebSocketTransport,
};

/// An asynchronous WebSocket view.
#[async_trait]
pub trait WebSocketHandler: Send + Sync + 'static {
    async fn call(&self, ws: &mut WebSocket) -> HandlerResult;
}

#[async_trait]
impl<F> WebSocketHandler for F
where
    F: for<'a> Fn(&'a mut WebSocket) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn call(&self, ws: &mut WebSocket) -> HandlerResult {
        (self)(ws).await
    }
}

#[derive(Clone)]
pub struct WebSocketRoute {
    pattern: CompiledPattern,
    view: Arc<dyn WebSocketHandler>,
    options: WebSocketOptions,
    converter: Arc<Converter>,
}

impl WebSocketRoute {
    pub fn new<F>(
        pattern: &str,
        view: F,
        options: WebSocketOptions,
    ) -> Result<Self, RouteDeclarationError>
    where
        F: for<'a> Fn(&'a mut WebSocket) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        Ok(Self::build(CompiledPattern::new(pattern)?, Arc::new(view), options))
    }

    fn build(
        pattern: CompiledPattern,
        view: Arc<dyn WebSocketHandler>,
        options: WebSocketOptions,
    ) -> Self {
        let converter = Arc::new(Converter::for_pattern(&pattern));
        Self {
            pattern,
            view,
            options,
            converter,
        }
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    pub fn options(&self) -> &WebSocketOptions {
        &self.options
    }
}

impl std::fmt::Debug for WebSocketRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketRoute")
            .field("pattern", &self.pattern.source())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WebSocketRouter {
    routes: Vec<WebSocketRoute>,
    by_pattern: HashMap<String, usize>,
}

impl WebSocketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(
        &mut self,
        pattern: &str,
        view: F,
        options: WebSocketOptions,
    ) -> Result<&WebSocketRoute, RouteDeclarationError>
    where
        F: for<'a> Fn(&'a mut WebSocket) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let route = WebSocketRoute::new(pattern, view, options)?;
        Ok(self.add_route(route))
    }

    /// Register a route, replacing any route with the same pattern.
    pub fn add_route(&mut self, route: WebSocketRoute) -> &WebSocketRoute {
        let source = route.pattern.source().to_string();
        let index = match self.by_pattern.get(&source) {
            Some(&index) => {
                self.routes[index] = route;
                index
            }
            None => {
                self.routes.push(route);
                self.routes.len() - 1
            }
        };
        self.by_pattern.insert(source, index);
        &self.routes[index]
    }

    /// Copy every route of `other` under `prefix`.
    pub fn include(&mut self, other: &WebSocketRouter, prefix: &str) -> Result<(), RouteDeclarationError> {
        for route in &other.routes {
            let pattern = route.pattern.with_prefix(prefix)?;
            self.add_route(WebSocketRoute::build(
                pattern,
                route.view.clone(),
                route.options.clone(),
            ));
        }
        Ok(())
    }

    pub fn routes(&self) -> &[WebSocketRoute] {
        &self.routes
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run the view matching the request path over `transport`.
    ///
    /// Returns the error that forced a 1011 close, for logging.
    pub async fn dispatch(
        &self,
        app: Arc<App>,
        req: Request,
        mut transport: Box<dyn WebSocketTransport>,
    ) -> HandlerResult {
        let span = tracing::info_span!("websocket", path = %req.path());
        async move {
            metrics::increment_websocket_connections();

            let matched = self.routes.iter().find_map(|route| {
                route
                    .pattern
                    .match_path(req.path())
                    .map(|raw| (route, raw))
            });
            let Some((route, raw)) = matched else {
                tracing::debug!("No WebSocket route matches, closing with 403");
                close_transport(transport.as_mut(), codes::FORBIDDEN).await;
                return Ok(());
            };
            let params = match route.converter.convert(&raw, &HashMap::new()) {
                Ok(params) => params,
                Err(e) => {
                    tracing::debug!("Rejecting WebSocket: {}", e);
                    close_transport(transport.as_mut(), codes::FORBIDDEN).await;
                    return Ok(());
                }
            };

            let mut ws = WebSocket::new(app, req, transport, route.options.clone());
            ws.params = params;
            if route.options.auto_accept {
                ws.accept().await?;
            }

            let result = catch_panics(route.view.call(&mut ws)).await;
            match result {
                Ok(()) => {
                    ws.ensure_closed(codes::NORMAL_CLOSURE).await;
                    record_close(&ws);
                    Ok(())
                }
                Err(report) => {
                    let caught = find_error::<WebSocketError>(&report)
                        .and_then(WebSocketError::disconnect_code)
                        .filter(|&code| route.options.caught_close_codes.contains(code));
                    if let Some(code) = caught {
                        tracing::debug!("Client disconnected with close code {}", code);
                        record_close(&ws);
                        return Ok(());
                    }
                    ws.ensure_closed(codes::INTERNAL_ERROR).await;
                    record_close(&ws);
                    Err(report)
                }
            }
        }
        .instrument(span)
        .await
    }
}

async fn close_transport(transport: &mut dyn WebSocketTransport, code: u16) {
    if let Err(e) = transport.close(code).await {
        tracing::debug!("Failed to close WebSocket with code {}: {}", code, e);
    }
    metrics::record_websocket_close(code);
}

fn record_close(ws: &WebSocket) {
    if let ConnectionState::Closed(code) = ws.state() {
        metrics::record_websocket_close(code);
    }
}
