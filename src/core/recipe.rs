//! Recipes: reusable groups of routes applied to an application under a prefix.
use futures_util::future::BoxFuture;

use crate::core::{
    error::RouteDeclarationError,
    handler::HandlerResult,
    route::RouteOptions,
    router::HttpRouter,
    view::View,
    websocket::{WebSocket, WebSocketOptions, WebSocketRouter},
};

/// A named bundle of HTTP and WebSocket routes.
///
/// Applying a recipe named `blog` serves its routes under `/blog` and names
/// them `blog:<route>`.
#[derive(Debug, Clone)]
pub struct Recipe {
    name: String,
    prefix: String,
    router: HttpRouter,
    websockets: WebSocketRouter,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let prefix = format!("/{name}");
        Self::with_prefix(name, prefix)
    }

    pub fn with_prefix(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            router: HttpRouter::new(),
            websockets: WebSocketRouter::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn route(
        &mut self,
        pattern: &str,
        view: impl Into<View>,
        options: RouteOptions,
    ) -> Result<&mut Self, RouteDeclarationError> {
        self.router.route(pattern, view, options)?;
        Ok(self)
    }

    pub fn websocket_route<F>(
        &mut self,
        pattern: &str,
        view: F,
        options: WebSocketOptions,
    ) -> Result<&mut Self, RouteDeclarationError>
    where
        F: for<'a> Fn(&'a mut WebSocket) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.websockets.route(pattern, view, options)?;
        Ok(self)
    }

    pub fn router(&self) -> &HttpRouter {
        &self.router
    }

    pub fn websocket_router(&self) -> &WebSocketRouter {
        &self.websockets
    }
}
