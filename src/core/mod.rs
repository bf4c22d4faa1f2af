pub mod app;
pub mod context;
pub mod converter;
pub mod error;
pub mod error_handlers;
pub mod handler;
pub mod hooks;
pub mod media;
pub mod middleware;
pub mod pattern;
pub mod providers;
pub mod recipe;
pub mod request;
pub mod route;
pub mod router;
pub mod sse;
pub mod view;
pub mod websocket;

pub use app::{App, AppService, LifespanEvent, Mount, Scope};
pub use context::Context;
pub use converter::{ParamKind, Params, Signature, ValidationError, Value};
pub use error::{HttpError, RouteDeclarationError, UrlBuildError};
pub use handler::{Endpoint, Handler, HandlerResult, endpoint};
pub use middleware::{Middleware, MiddlewareStack};
pub use providers::{ProviderError, ProviderRegistry, ProviderScope};
pub use recipe::Recipe;
pub use request::{Request, Response};
pub use route::{Route, RouteOptions};
pub use router::HttpRouter;
pub use sse::ServerSentEvent;
pub use view::{ClassView, FunctionView, View};
