//! Error types shared by the routing and dispatch engine.
//!
//! Declaration errors are raised while routes are registered and never at request
//! time. [`HttpError`] is the only error that carries an HTTP status; everything
//! else reaches the client through the exception layer or the server-error layer.
use std::fmt;

use http::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Raised while registering a route, a view or a WebSocket route.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteDeclarationError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown converter '{tag}' for parameter '{param}' in route pattern '{pattern}'")]
    UnknownConverter {
        pattern: String,
        param: String,
        tag: String,
    },

    #[error("parameter '{param}' is declared more than once in route pattern '{pattern}'")]
    DuplicateParameter { pattern: String, param: String },

    #[error("route parameter '{param}' of '{pattern}' is not declared by view '{view}'")]
    MissingHandlerParameter {
        pattern: String,
        param: String,
        view: String,
    },

    #[error("view '{view}' declares path parameter '{param}' which is absent from '{pattern}'")]
    UndeclaredPathParameter {
        pattern: String,
        param: String,
        view: String,
    },

    #[error("view '{view}' declares '{param}' both as a path and as a query parameter")]
    ConflictingParameter { view: String, param: String },

    #[error("view '{view}' declares unknown HTTP method '{method}'")]
    UnknownMethod { view: String, method: String },

    #[error("view '{view}' does not handle any HTTP method")]
    EmptyView { view: String },

    #[error("a route named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("mount prefix '{prefix}' must start with '/' and must not end with '/'")]
    InvalidMountPrefix { prefix: String },
}

/// Raised by reverse URL generation when the pattern cannot be formatted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UrlBuildError {
    #[error("missing parameter '{param}' to build a URL for route '{route}'")]
    MissingParameter { route: String, param: String },

    #[error("route '{route}' contains an anonymous placeholder and cannot be reversed")]
    UnnamedPlaceholder { route: String },
}

/// An error that maps directly onto an HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpError {
    status: StatusCode,
    detail: Option<JsonValue>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn with_detail(status: StatusCode, detail: impl Into<JsonValue>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    pub fn bad_request(detail: impl Into<JsonValue>) -> Self {
        Self::with_detail(StatusCode::BAD_REQUEST, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> Option<&JsonValue> {
        self.detail.as_ref()
    }

    /// Status code followed by its canonical reason, e.g. `404 Not Found`.
    pub fn title(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {}", self.status.as_u16(), reason),
            None => self.status.as_u16().to_string(),
        }
    }

    /// Detail rendered for humans: strings are shown as-is, anything else as JSON.
    pub fn detail_text(&self) -> Option<String> {
        self.detail.as_ref().map(|detail| match detail {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        })
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail_text() {
            Some(detail) => write!(f, "{}: {}", self.title(), detail),
            None => f.write_str(&self.title()),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<StatusCode> for HttpError {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

/// Raised when the configured media type has no registered handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported media type '{media_type}', expected one of: {}", .available.join(", "))]
pub struct UnsupportedMediaType {
    pub media_type: String,
    pub available: Vec<String>,
}
