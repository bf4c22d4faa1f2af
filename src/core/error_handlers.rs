//! Error-to-response translation.
//!
//! Two layers wrap the middleware chain. The exception layer looks up a
//! handler for the error type, first registration wins, matching the error
//! itself or anything in its source chain. Whatever it cannot handle reaches
//! the server-error layer, which always produces a response (500, or a
//! traceback page in debug mode) and hands the error back for logging.
use std::{any::TypeId, marker::PhantomData, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use eyre::Report;
use futures_util::{FutureExt, future::BoxFuture};
use http::StatusCode;
use serde_json::json;

use crate::core::{
    context::Context,
    converter::ValidationError,
    error::HttpError,
    handler::HandlerResult,
    request::Response,
};

/// Find the first error of type `E` in the report's chain.
pub fn find_error<E>(report: &Report) -> Option<&E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    report.chain().find_map(|error| error.downcast_ref::<E>())
}

#[async_trait]
trait ErasedErrorHandler: Send + Sync {
    fn matches(&self, report: &Report) -> bool;
    async fn handle(&self, ctx: &mut Context, report: &Report) -> HandlerResult;
}

struct TypedErrorHandler<E, F> {
    handler: F,
    _error: PhantomData<fn(&E)>,
}

#[async_trait]
impl<E, F> ErasedErrorHandler for TypedErrorHandler<E, F>
where
    E: std::error::Error + Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context, &'a E) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn matches(&self, report: &Report) -> bool {
        find_error::<E>(report).is_some()
    }

    async fn handle(&self, ctx: &mut Context, report: &Report) -> HandlerResult {
        match find_error::<E>(report) {
            Some(error) => (self.handler)(ctx, error).await,
            None => Err(eyre::eyre!("{report}")),
        }
    }
}

struct ErrorHandlerEntry {
    type_id: TypeId,
    type_name: &'static str,
    handler: Arc<dyn ErasedErrorHandler>,
}

/// Ordered table of error handlers.
#[derive(Clone)]
pub struct ErrorHandlers {
    entries: Vec<Arc<ErrorHandlerEntry>>,
}

impl Default for ErrorHandlers {
    /// `HttpError` rendered as plain text, `ValidationError` turned into a 400.
    fn default() -> Self {
        let mut handlers = Self::empty();
        handlers.add::<HttpError, _>(error_to_text);
        handlers.add::<ValidationError, _>(validation_error_to_http);
        handlers
    }
}

impl ErrorHandlers {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `handler` for errors of type `E`. Registering a type again
    /// replaces its handler and keeps its position.
    pub fn add<E, F>(&mut self, handler: F)
    where
        E: std::error::Error + Send + Sync + 'static,
        F: for<'a> Fn(&'a mut Context, &'a E) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let entry = Arc::new(ErrorHandlerEntry {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            handler: Arc::new(TypedErrorHandler {
                handler,
                _error: PhantomData,
            }),
        });
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.type_id == entry.type_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, report: &Report) -> Option<&ErrorHandlerEntry> {
        self.entries
            .iter()
            .map(Arc::as_ref)
            .find(|entry| entry.handler.matches(report))
    }

    /// Handle `report`, or give it back when no handler matches. An error
    /// raised by a handler is looked up once more before giving up.
    pub(crate) async fn handle(&self, ctx: &mut Context, report: Report) -> HandlerResult {
        let Some(entry) = self.lookup(&report) else {
            return Err(report);
        };
        tracing::debug!("Handling {} with registered handler", entry.type_name);
        let raised = match entry.handler.handle(ctx, &report).await {
            Ok(()) => return Ok(()),
            Err(raised) => raised,
        };
        match self.lookup(&raised) {
            Some(entry) => entry.handler.handle(ctx, &raised).await,
            None => Err(raised),
        }
    }
}

impl std::fmt::Debug for ErrorHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| entry.type_name))
            .finish()
    }
}

/// Render `title\ndetail` as plain text.
pub fn error_to_text<'a>(ctx: &'a mut Context, error: &'a HttpError) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let body = match error.detail_text() {
            Some(detail) => format!("{}\n{}", error.title(), detail),
            None => error.title(),
        };
        ctx.res.set_status(error.status()).text(body);
        Ok(())
    })
}

/// Render the error as a small HTML page.
pub fn error_to_html<'a>(ctx: &'a mut Context, error: &'a HttpError) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let mut body = format!("<h1>{}</h1>", escape_html(&error.title()));
        if let Some(detail) = error.detail_text() {
            body.push_str(&format!("\n<p>{}</p>", escape_html(&detail)));
        }
        ctx.res.set_status(error.status()).html(body);
        Ok(())
    })
}

/// Render `{"error", "status", "detail"}` through the media handler.
pub fn error_to_media<'a>(ctx: &'a mut Context, error: &'a HttpError) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move {
        let mut body = json!({
            "error": error.title(),
            "status": error.status().as_u16(),
        });
        if let Some(detail) = error.detail() {
            body["detail"] = detail.clone();
        }
        ctx.res.set_status(error.status()).media(&body)?;
        Ok(())
    })
}

fn validation_error_to_http<'a>(
    _ctx: &'a mut Context,
    error: &'a ValidationError,
) -> BoxFuture<'a, HandlerResult> {
    Box::pin(async move { Err(HttpError::bad_request(error.detail()).into()) })
}

/// Run `pipeline`, turning panics into errors.
pub(crate) async fn catch_panics<'a>(pipeline: BoxFuture<'a, HandlerResult>) -> HandlerResult {
    match AssertUnwindSafe(pipeline).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(eyre::eyre!("handler panicked: {message}"))
        }
    }
}

/// Build the response of the server-error layer for an unhandled error.
pub(crate) async fn server_error_response(
    ctx: &mut Context,
    handlers: &ErrorHandlers,
    report: &Report,
    debug: bool,
) {
    ctx.res = Response::new(ctx.app().media());
    if debug {
        let page = traceback_page(ctx, report);
        ctx.res
            .set_status(StatusCode::INTERNAL_SERVER_ERROR)
            .html(page);
        return;
    }
    let error = HttpError::new(StatusCode::INTERNAL_SERVER_ERROR);
    if handlers.handle(ctx, error.clone().into()).await.is_err() {
        ctx.res = Response::new(ctx.app().media());
        ctx.res.set_status(error.status()).text(error.title());
    }
}

fn traceback_page(ctx: &Context, report: &Report) -> String {
    let causes = report
        .chain()
        .map(|cause| format!("<li>{}</li>", escape_html(&cause.to_string())))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>500 Internal Server Error</title></head>\n<body>\n\
         <h1>500 Internal Server Error</h1>\n<p>{} {}</p>\n<ol>\n{}\n</ol>\n<pre>{}</pre>\n</body>\n</html>",
        escape_html(ctx.req.method().as_str()),
        escape_html(ctx.req.path()),
        causes,
        escape_html(&format!("{report:?}")),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use eyre::WrapErr;
    use thiserror::Error;

    use super::*;
    use crate::core::app::App;

    #[derive(Error, Debug)]
    #[error("teapot")]
    struct Teapot;

    fn context() -> Context {
        Context::for_path(Arc::new(App::new()), "/brew")
    }

    async fn explode() -> HandlerResult {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_http_error_rendered_as_text_by_default() {
        let handlers = ErrorHandlers::default();
        let mut ctx = context();
        let error = HttpError::with_detail(StatusCode::NOT_FOUND, "nothing here");
        handlers.handle(&mut ctx, error.into()).await.unwrap();

        assert_eq!(ctx.res.status, StatusCode::NOT_FOUND);
        assert_eq!(ctx.res.body().as_ref(), b"404 Not Found\nnothing here");
    }

    #[tokio::test]
    async fn test_validation_error_becomes_400_with_detail() {
        let handlers = ErrorHandlers::default();
        let mut ctx = context();
        let error = ValidationError {
            errors: BTreeMap::from([("x".to_string(), "'a' is not a valid integer".to_string())]),
        };
        handlers.handle(&mut ctx, error.into()).await.unwrap();

        assert_eq!(ctx.res.status, StatusCode::BAD_REQUEST);
        let body = std::str::from_utf8(ctx.res.body()).unwrap();
        assert!(body.starts_with("400 Bad Request\n"));
        assert!(body.contains("not a valid integer"));
    }

    #[tokio::test]
    async fn test_matches_through_the_source_chain() {
        let mut handlers = ErrorHandlers::empty();
        handlers.add::<Teapot, _>(|ctx, _error| {
            Box::pin(async move {
                ctx.res.set_status(StatusCode::IM_A_TEAPOT);
                Ok(())
            })
        });

        let mut ctx = context();
        let report = Err::<(), _>(Teapot).wrap_err("brewing failed").unwrap_err();
        handlers.handle(&mut ctx, report).await.unwrap();
        assert_eq!(ctx.res.status, StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_unhandled_errors_are_given_back() {
        let handlers = ErrorHandlers::default();
        let mut ctx = context();
        let err = handlers
            .handle(&mut ctx, eyre::eyre!("database is down"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "database is down");
    }

    #[tokio::test]
    async fn test_re_registration_replaces_in_place() {
        let mut handlers = ErrorHandlers::default();
        handlers.add::<HttpError, _>(error_to_html);
        assert_eq!(handlers.len(), 2);

        let mut ctx = context();
        handlers
            .handle(&mut ctx, HttpError::new(StatusCode::FORBIDDEN).into())
            .await
            .unwrap();
        assert_eq!(ctx.res.body().as_ref(), b"<h1>403 Forbidden</h1>");
    }

    #[tokio::test]
    async fn test_media_renderer() {
        let mut handlers = ErrorHandlers::empty();
        handlers.add::<HttpError, _>(error_to_media);

        let mut ctx = context();
        handlers
            .handle(&mut ctx, HttpError::bad_request(json!({"x": "bad"})).into())
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(ctx.res.body()).unwrap();
        assert_eq!(
            body,
            json!({"error": "400 Bad Request", "status": 400, "detail": {"x": "bad"}})
        );
    }

    #[tokio::test]
    async fn test_panics_become_errors() {
        let result = catch_panics(Box::pin(explode())).await;
        assert_eq!(result.unwrap_err().to_string(), "handler panicked: kaboom");
    }

    #[tokio::test]
    async fn test_server_error_response() {
        let handlers = ErrorHandlers::default();
        let report = eyre::eyre!("<script>");

        let mut ctx = context();
        server_error_response(&mut ctx, &handlers, &report, false).await;
        assert_eq!(ctx.res.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ctx.res.body().as_ref(), b"500 Internal Server Error");

        let mut ctx = context();
        server_error_response(&mut ctx, &handlers, &report, true).await;
        let body = std::str::from_utf8(ctx.res.body()).unwrap();
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("/brew"));
    }
}
