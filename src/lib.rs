//! Panino - an async web framework with ordered routing, typed path converters,
//! hooks and WebSocket views.
//!
//! Panino sits on top of the hyper/axum transport stack. Applications declare
//! routes against views, wrap them in middleware and error handlers, and hand
//! the frozen [`App`] to the axum adapter (or drive it in-process with
//! [`testing::TestClient`]).
//!
//! # Features
//! - Route patterns with typed placeholders (`/add/{x:d}/{y:d}`, `{path:path}`, `{}`)
//! - Function and class views, `HEAD` falling back to `GET`, 405 with `Allow`
//! - First-match routing with an optional trailing-slash redirect
//! - Reverse URL building (`url_for`), including across named mounted apps
//! - Before/after hooks, user middleware, typed error handlers
//! - WebSocket views with typed messages and close-code handling
//! - Streamed bodies, server-sent events, file attachments and background tasks
//! - App- and request-scoped providers, lifespan handlers, recipes and mounts
//! - Allowed hosts, CORS, gzip, HSTS and request id as outer tower layers
//! - Structured tracing via `tracing`, metrics via the `metrics` facade
//!
//! # Quick Example
//! ```no_run
//! use panino::{App, FunctionView, RouteOptions, Signature};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let mut app = App::new();
//! app.route(
//!     "/greet/{person}",
//!     FunctionView::new("greet", |ctx| {
//!         Box::pin(async move {
//!             let person = ctx.params.str("person").unwrap_or("stranger").to_string();
//!             ctx.res.text(format!("Hello, {person}!"));
//!             Ok(())
//!         })
//!     })
//!     .signature(Signature::new().param("person")),
//!     RouteOptions::new(),
//! )?;
//! panino::adapters::run(app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The routing and dispatch engine lives in `core`. The WebSocket transport is
//! a port (`ports::websocket`) implemented by the axum adapter and by the
//! in-memory channel transport in `testing`.
//!
//! # Error Handling
//! Views, hooks and middleware return [`HandlerResult`] (`eyre::Result<()>`).
//! Errors are matched against registered handlers by type, anywhere in their
//! source chain; whatever is left becomes a 500.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod testing;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    config::AppConfig,
    core::{
        App, AppService, ClassView, Context, FunctionView, HandlerResult, HttpError, Middleware,
        Recipe, Request, Response, RouteOptions, ServerSentEvent, Signature, ValidationError,
        hooks,
        websocket::{WebSocket, WebSocketOptions},
    },
    utils::GracefulShutdown,
};
