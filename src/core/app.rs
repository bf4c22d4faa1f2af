//! The application: route tables, middleware, error handlers, providers and
//! mounted sub-applications, plus the top-level dispatch of HTTP, WebSocket
//! and lifespan scopes.
//!
//! An [`App`] is configured through `&mut self` methods and then frozen behind
//! an `Arc` for serving; nothing on the request path takes a lock.
use std::{
    collections::HashMap,
    convert::Infallible,
    future::Future,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};

use async_trait::async_trait;
use axum::body::Body;
use eyre::{Report, Result, WrapErr};
use futures_util::future::BoxFuture;
use http::{Method, StatusCode, Uri};
use tower::{Service, ServiceExt};
use tracing::Instrument;

use crate::{
    config::{AppConfig, AppConfigValidator},
    core::{
        context::Context,
        error::{HttpError, RouteDeclarationError},
        error_handlers::{ErrorHandlers, catch_panics, server_error_response},
        handler::{Handler, HandlerResult},
        media::MediaHandler,
        middleware::{Middleware, MiddlewareStack},
        providers::ProviderRegistry,
        recipe::Recipe,
        request::{Request, Response},
        route::RouteOptions,
        router::{HttpRouter, Resolution},
        view::View,
        websocket::{WebSocket, WebSocketOptions, WebSocketRouter, codes},
    },
    metrics::RequestTimer,
    ports::websocket::WebSocketTransport,
    tracing_setup::create_request_span,
};

type LifespanHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type Forward = Arc<dyn Fn(http::Request<Body>) -> BoxFuture<'static, http::Response<Body>> + Send + Sync>;

/// Something served underneath a path prefix.
#[derive(Clone)]
pub enum Mount {
    /// A child application. Its routes resolve as `"child:route"` when it is named.
    App(Arc<App>),
    /// Any tower service answering HTTP requests.
    Service(Forward),
}

impl Mount {
    pub fn app(app: App) -> Self {
        Self::App(Arc::new(app))
    }

    pub fn service<S>(service: S) -> Self
    where
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        Self::Service(Arc::new(move |req: http::Request<Body>| {
            let service = service.clone();
            Box::pin(async move {
                match service.oneshot(req).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }) as BoxFuture<'static, http::Response<Body>>
        }))
    }
}

impl From<App> for Mount {
    fn from(app: App) -> Self {
        Self::app(app)
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::App(app) => f.debug_tuple("App").field(&app.config.name).finish(),
            Self::Service(_) => f.write_str("Service"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifespanEvent {
    Startup,
    Shutdown,
}

/// A unit of work handed to the application by the transport.
pub enum Scope {
    Http(http::Request<Body>),
    WebSocket {
        req: Request,
        transport: Box<dyn WebSocketTransport>,
    },
    Lifespan(LifespanEvent),
}

pub struct App {
    config: AppConfig,
    media: MediaHandler,
    router: HttpRouter,
    websockets: WebSocketRouter,
    middleware: MiddlewareStack,
    error_handlers: ErrorHandlers,
    providers: ProviderRegistry,
    mounts: Vec<(String, Mount)>,
    on_startup: Vec<LifespanHandler>,
    on_shutdown: Vec<LifespanHandler>,
}

impl App {
    /// An application with the default configuration.
    pub fn new() -> Self {
        Self::build(AppConfig::default(), MediaHandler::default())
    }

    /// An application for a validated configuration.
    pub fn with_config(config: AppConfig) -> Result<Self> {
        AppConfigValidator::validate(&config).wrap_err("Invalid application configuration")?;
        let media = MediaHandler::for_media_type(&config.media_type)?;
        Ok(Self::build(config, media))
    }

    fn build(config: AppConfig, media: MediaHandler) -> Self {
        Self {
            config,
            media,
            router: HttpRouter::new(),
            websockets: WebSocketRouter::new(),
            middleware: MiddlewareStack::new(),
            error_handlers: ErrorHandlers::default(),
            providers: ProviderRegistry::new(),
            mounts: Vec::new(),
            on_startup: Vec::new(),
            on_shutdown: Vec::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn media(&self) -> MediaHandler {
        self.media
    }

    pub fn router(&self) -> &HttpRouter {
        &self.router
    }

    pub fn websocket_router(&self) -> &WebSocketRouter {
        &self.websockets
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn providers_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.providers
    }

    pub fn error_handlers(&self) -> &ErrorHandlers {
        &self.error_handlers
    }

    /// Register an HTTP route.
    pub fn route(
        &mut self,
        pattern: &str,
        view: impl Into<View>,
        options: RouteOptions,
    ) -> Result<&mut Self, RouteDeclarationError> {
        self.router.route(pattern, view, options)?;
        Ok(self)
    }

    /// Register a WebSocket route.
    pub fn websocket_route<F>(
        &mut self,
        pattern: &str,
        view: F,
        options: WebSocketOptions,
    ) -> Result<&mut Self, RouteDeclarationError>
    where
        F: for<'a> Fn(&'a mut WebSocket) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let route = self.websockets.route(pattern, view, options)?;
        tracing::debug!("Registered WebSocket route {}", route.pattern().source());
        Ok(self)
    }

    /// Copy the routes of `router` under `prefix`.
    pub fn include_router(
        &mut self,
        router: &HttpRouter,
        prefix: &str,
    ) -> Result<&mut Self, RouteDeclarationError> {
        self.router.include(router, prefix, None)?;
        Ok(self)
    }

    /// Apply a recipe: its routes are served under its prefix and named
    /// `"recipe:route"`.
    pub fn recipe(&mut self, recipe: &Recipe) -> Result<&mut Self, RouteDeclarationError> {
        self.router
            .include(recipe.router(), recipe.prefix(), Some(recipe.name()))?;
        self.websockets
            .include(recipe.websocket_router(), recipe.prefix())?;
        tracing::debug!("Applied recipe '{}' at {}", recipe.name(), recipe.prefix());
        Ok(self)
    }

    /// Serve `mount` for every path under `prefix`. Mounts are checked before
    /// the application's own routes.
    pub fn mount(
        &mut self,
        prefix: &str,
        mount: impl Into<Mount>,
    ) -> Result<&mut Self, RouteDeclarationError> {
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            return Err(RouteDeclarationError::InvalidMountPrefix {
                prefix: prefix.to_string(),
            });
        }
        let mount = mount.into();
        match self.mounts.iter_mut().find(|(existing, _)| existing == prefix) {
            Some((_, existing)) => *existing = mount,
            None => self.mounts.push((prefix.to_string(), mount)),
        }
        Ok(self)
    }

    /// Wrap the router with `middleware`; the last one added runs first.
    pub fn add_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Handle errors of type `E` (or wrapping one) with `handler`.
    pub fn add_error_handler<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: std::error::Error + Send + Sync + 'static,
        F: for<'a> Fn(&'a mut Context, &'a E) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.error_handlers.add::<E, F>(handler);
        self
    }

    /// Render every [`HttpError`] with `renderer`, e.g.
    /// [`error_to_html`](crate::core::error_handlers::error_to_html).
    pub fn error_handler_fn<F>(&mut self, renderer: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context, &'a HttpError) -> BoxFuture<'a, HandlerResult>
            + Send
            + Sync
            + 'static,
    {
        self.add_error_handler::<HttpError, F>(renderer)
    }

    pub fn on_startup<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_startup
            .push(Arc::new(move || Box::pin(handler()) as BoxFuture<'static, Result<()>>));
        self
    }

    pub fn on_shutdown<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_shutdown
            .push(Arc::new(move || Box::pin(handler()) as BoxFuture<'static, Result<()>>));
        self
    }

    /// Instantiate app-scoped providers, run startup handlers, then start
    /// mounted applications.
    pub async fn startup(&self) -> Result<()> {
        self.providers
            .startup()
            .await
            .wrap_err("Failed to instantiate providers")?;
        for handler in &self.on_startup {
            handler().await.wrap_err("Startup handler failed")?;
        }
        for (prefix, mount) in &self.mounts {
            if let Mount::App(child) = mount {
                Box::pin(child.startup())
                    .await
                    .wrap_err_with(|| format!("Application mounted at {prefix} failed to start"))?;
            }
        }
        tracing::info!("Application startup complete");
        Ok(())
    }

    /// Stop mounted applications, run shutdown handlers, then drop app-scoped
    /// providers. Every step runs even if an earlier one fails.
    pub async fn shutdown(&self) -> Result<()> {
        let mut failure = None;
        for (prefix, mount) in &self.mounts {
            if let Mount::App(child) = mount {
                if let Err(e) = Box::pin(child.shutdown()).await {
                    tracing::error!("Application mounted at {} failed to shut down: {:?}", prefix, e);
                    failure.get_or_insert(e);
                }
            }
        }
        for handler in &self.on_shutdown {
            if let Err(e) = handler().await {
                tracing::error!("Shutdown handler failed: {:?}", e);
                failure.get_or_insert(e);
            }
        }
        self.providers.shutdown().await;
        tracing::info!("Application shutdown complete");
        match failure {
            Some(e) => Err(e.wrap_err("Shutdown handler failed")),
            None => Ok(()),
        }
    }

    /// Build the URL of a named route. `"child:route"` names that are not
    /// registered here resolve through the mounted application named `child`.
    pub fn url_for<I, K, V>(&self, name: &str, params: I) -> Result<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: ToString,
    {
        let params = params
            .into_iter()
            .map(|(key, value)| (key.as_ref().to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        self.url_for_map(name, &params)
    }

    fn url_for_map(&self, name: &str, params: &HashMap<String, String>) -> Result<String> {
        if self.router.get_route_or_404(name).is_ok() {
            return self.router.url_for(name, params);
        }
        if let Some((app_name, rest)) = name.split_once(':') {
            for (prefix, mount) in &self.mounts {
                if let Mount::App(child) = mount {
                    if child.name() == Some(app_name) {
                        return Ok(format!("{prefix}{}", child.url_for_map(rest, params)?));
                    }
                }
            }
        }
        Err(HttpError::not_found().into())
    }

    fn find_mount(&self, path: &str) -> Option<(&str, &Mount)> {
        self.mounts.iter().find_map(|(prefix, mount)| {
            let rest = path.strip_prefix(prefix.as_str())?;
            (rest.is_empty() || rest.starts_with('/')).then_some((prefix.as_str(), mount))
        })
    }

    /// Dispatch one scope. HTTP scopes produce a response; WebSocket and
    /// lifespan scopes produce none.
    pub async fn dispatch(self: Arc<Self>, scope: Scope) -> Result<Option<http::Response<Body>>> {
        match scope {
            Scope::Http(req) => Ok(Some(self.handle(req).await)),
            Scope::WebSocket { req, transport } => {
                self.handle_websocket(req, transport).await?;
                Ok(None)
            }
            Scope::Lifespan(LifespanEvent::Startup) => {
                self.startup().await?;
                Ok(None)
            }
            Scope::Lifespan(LifespanEvent::Shutdown) => {
                self.shutdown().await?;
                Ok(None)
            }
        }
    }

    /// Answer an HTTP request. Never fails: unhandled errors become a 500
    /// response and are logged here.
    pub fn handle(self: Arc<Self>, req: http::Request<Body>) -> BoxFuture<'static, http::Response<Body>> {
        Box::pin(async move {
            if let Some((prefix, mount)) = self.find_mount(req.uri().path()) {
                let Some(req) = strip_mount_prefix(req, prefix) else {
                    return plain_response(StatusCode::BAD_REQUEST);
                };
                return match mount {
                    Mount::App(child) => child.clone().handle(req).await,
                    Mount::Service(forward) => forward(req).await,
                };
            }

            let request_id = req
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
            let timer = RequestTimer::new(req.method().as_str());

            async move {
                let req = match Request::from_http(req).await {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::warn!("Failed to read request: {:?}", e);
                        return plain_response(StatusCode::BAD_REQUEST);
                    }
                };
                let outcome = self.dispatch_http(req).await;
                if let Some(report) = &outcome.error {
                    tracing::error!("Unhandled error while serving request: {:?}", report);
                }

                let status = outcome.response.status;
                let route = outcome.route.as_deref().unwrap_or("<unmatched>");
                let span = tracing::Span::current();
                span.record("http.route", route);
                span.record("http.status_code", status.as_u16());
                span.record("duration_ms", timer.elapsed().as_millis() as u64);
                tracing::debug!("Responded with {}", status);
                timer.finish(route, status.as_u16());
                outcome.response.into_http()
            }
            .instrument(span)
            .await
        })
    }

    /// Run the request through the server-error layer, the exception layer,
    /// the user middleware and the router.
    pub(crate) async fn dispatch_http(self: &Arc<Self>, req: Request) -> Outcome {
        let is_head = req.method() == Method::HEAD;
        let mut ctx = Context::new(self.clone(), req);

        let result = {
            let ctx = &mut ctx;
            catch_panics(Box::pin(async move {
                match self.middleware.run(ctx, &Routing).await {
                    Ok(()) => Ok(()),
                    Err(report) => self.error_handlers.handle(ctx, report).await,
                }
            }))
            .await
        };

        let error = match result {
            Ok(()) => None,
            Err(report) => {
                server_error_response(&mut ctx, &self.error_handlers, &report, self.config.debug)
                    .await;
                Some(report)
            }
        };

        let route = ctx.extensions.remove::<MatchedRoute>().map(|matched| matched.0);
        let mut response = ctx.res;
        if is_head {
            response.clear_body();
        }
        Outcome {
            response,
            error,
            route,
        }
    }

    async fn route_request(&self, ctx: &mut Context) -> HandlerResult {
        let resolution = self
            .router
            .resolve(&ctx.req, self.config.redirect_trailing_slash);
        match resolution {
            Resolution::Matched(route, raw) => {
                ctx.extensions
                    .insert(MatchedRoute(route.pattern().source().to_string()));
                ctx.set_raw_params(raw);
                route.dispatch(ctx).await
            }
            Resolution::Redirect(url) => {
                tracing::debug!("Redirecting to {}", url);
                ctx.res.redirect(&url, self.config.trailing_slash_permanent)?;
                Ok(())
            }
            Resolution::NotFound => Err(HttpError::not_found().into()),
        }
    }

    /// Serve a WebSocket connection, through a mounted application if the
    /// path falls under one.
    pub fn handle_websocket(
        self: Arc<Self>,
        req: Request,
        mut transport: Box<dyn WebSocketTransport>,
    ) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            if let Some((prefix, mount)) = self.find_mount(req.uri().path()) {
                if let (Mount::App(child), Some(req)) = (mount, req.strip_prefix(prefix)) {
                    return child.clone().handle_websocket(req, transport).await;
                }
                tracing::debug!("No WebSocket handler under mount {}, closing with 403", prefix);
                if let Err(e) = transport.close(codes::FORBIDDEN).await {
                    tracing::debug!("Failed to close WebSocket: {}", e);
                }
                return Ok(());
            }
            let result = self
                .websockets
                .dispatch(self.clone(), req, transport)
                .await;
            if let Err(report) = &result {
                tracing::error!("Unhandled error in WebSocket view: {:?}", report);
            }
            result
        })
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("name", &self.config.name)
            .field("routes", &self.router.len())
            .field("middleware", &self.middleware)
            .field("error_handlers", &self.error_handlers)
            .field("mounts", &self.mounts)
            .finish_non_exhaustive()
    }
}

/// Result of dispatching one HTTP request.
pub(crate) struct Outcome {
    pub(crate) response: Response,
    /// Error that reached the server-error layer.
    pub(crate) error: Option<Report>,
    /// Pattern of the matched route.
    pub(crate) route: Option<String>,
}

#[derive(Clone)]
struct MatchedRoute(String);

/// Innermost handler of the middleware chain.
struct Routing;

#[async_trait]
impl Handler for Routing {
    async fn call(&self, ctx: &mut Context) -> HandlerResult {
        let app = ctx.app().clone();
        app.route_request(ctx).await
    }
}

fn strip_mount_prefix(req: http::Request<Body>, prefix: &str) -> Option<http::Request<Body>> {
    let (mut parts, body) = req.into_parts();
    let rest = parts.uri.path().strip_prefix(prefix)?;
    let rest = if rest.is_empty() { "/" } else { rest };
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };
    parts.uri = path_and_query.parse::<Uri>().ok()?;
    Some(http::Request::from_parts(parts, body))
}

fn plain_response(status: StatusCode) -> http::Response<Body> {
    let mut response = Response::default();
    response
        .set_status(status)
        .text(HttpError::new(status).title());
    response.into_http()
}

/// Tower service over a frozen [`App`].
#[derive(Clone)]
pub struct AppService {
    app: Arc<App>,
}

impl AppService {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }
}

impl Service<http::Request<Body>> for AppService {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        let app = self.app.clone();
        Box::pin(async move { Ok(app.handle(req).await) })
    }
}
