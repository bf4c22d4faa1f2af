//! Request and response types seen by views, hooks and middleware.
use std::{
    collections::HashMap, convert::Infallible, fmt, future::Future, io::ErrorKind, path::Path,
};

use axum::{body::Body, extract::Query};
use bytes::Bytes;
use eyre::{Result, WrapErr};
use futures_util::{
    Stream, StreamExt, future,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use http_body_util::BodyExt;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::core::{error::HttpError, media::MediaHandler};

/// An inbound HTTP request with its body fully buffered.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    path: String,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let path = decode_path(uri.path());
        let query = Query::<HashMap<String, String>>::try_from_uri(&uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        Self {
            method,
            uri,
            path,
            headers,
            query,
            body,
        }
    }

    /// Buffer the body of a transport request.
    pub async fn from_http(req: http::Request<Body>) -> Result<Self> {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .wrap_err("Failed to read request body")?
            .to_bytes();
        Ok(Self::new(parts.method, parts.uri, parts.headers, body))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Percent-decoded path, used for route matching.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).wrap_err("Request body is not valid UTF-8")
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).wrap_err("Failed to decode JSON request body")
    }

    /// Strip a mount prefix from the path, keeping the query string.
    pub(crate) fn strip_prefix(&self, prefix: &str) -> Option<Self> {
        let rest = self.uri.path().strip_prefix(prefix)?;
        let rest = if rest.is_empty() { "/" } else { rest };
        if !rest.starts_with('/') {
            return None;
        }
        let path_and_query = match self.uri.query() {
            Some(query) => format!("{rest}?{query}"),
            None => rest.to_string(),
        };
        let uri = path_and_query.parse::<Uri>().ok()?;
        Some(Self::new(
            self.method.clone(),
            uri,
            self.headers.clone(),
            self.body.clone(),
        ))
    }
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;
type BackgroundTask = BoxFuture<'static, Result<()>>;

/// The response being built for the current request.
///
/// The body is either buffered or a stream of chunks sent as they are
/// produced. A background task runs once the body has been sent.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Bytes,
    stream: Option<BodyStream>,
    background: Option<BackgroundTask>,
    media: MediaHandler,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(MediaHandler::default())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("streaming", &self.stream.is_some())
            .field("background", &self.background.is_some())
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn new(media: MediaHandler) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            stream: None,
            background: None,
            media,
        }
    }

    /// Buffered body; empty while the body is streamed.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.set_body(
            Bytes::from(text.into()),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        )
    }

    pub fn html(&mut self, html: impl Into<String>) -> &mut Self {
        self.set_body(
            Bytes::from(html.into()),
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
    }

    pub fn bytes(&mut self, body: impl Into<Bytes>, content_type: HeaderValue) -> &mut Self {
        self.set_body(body.into(), content_type)
    }

    /// Serialize `value` with the application's media handler.
    pub fn media<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let value = serde_json::to_value(value).wrap_err("Failed to serialize response media")?;
        let encoded = self.media.encode(&value);
        let content_type = HeaderValue::from_str(&self.media.content_type())
            .wrap_err("Invalid media content type")?;
        Ok(self.set_body(Bytes::from(encoded), content_type))
    }

    /// Send the body chunk by chunk as `chunks` yields them.
    pub fn stream<S, T>(&mut self, chunks: S) -> &mut Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<Bytes> + 'static,
    {
        self.try_stream(chunks.map(Ok::<T, Infallible>))
    }

    /// Like [`Response::stream`]; an error aborts the response mid-body.
    pub fn try_stream<S, T, E>(&mut self, chunks: S) -> &mut Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
        T: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        let chunks = chunks.map(|chunk| -> Result<Bytes, BoxError> {
            match chunk {
                Ok(chunk) => Ok(chunk.into()),
                Err(e) => Err(e.into()),
            }
        });
        self.body = Bytes::new();
        self.stream = Some(chunks.boxed());
        self.headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("text/plain; charset=utf-8"));
        self
    }

    /// Stream server-sent events, e.g. [`ServerSentEvent`](crate::core::sse::ServerSentEvent)s.
    pub fn event_stream<S, T>(&mut self, events: S) -> &mut Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<Bytes> + 'static,
    {
        self.headers
            .entry(header::CACHE_CONTROL)
            .or_insert(HeaderValue::from_static("no-cache"));
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        self.stream(events)
    }

    /// Stream the file at `path`, as an attachment named after the file when
    /// `attach` is set. A missing file is a 404.
    pub async fn file(&mut self, path: impl AsRef<Path>, attach: bool) -> Result<&mut Self> {
        let path = path.as_ref();
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(HttpError::not_found().into()),
            Err(e) => {
                let context = format!("Failed to open {}", path.display());
                return Err(eyre::Report::new(e).wrap_err(context));
            }
        };
        if attach && let Some(name) = path.file_name().and_then(|name| name.to_str()) {
            let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
                .wrap_err("Invalid attachment file name")?;
            self.headers
                .entry(header::CONTENT_DISPOSITION)
                .or_insert(disposition);
        }
        self.headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/octet-stream"));
        Ok(self.try_stream(ReaderStream::new(file)))
    }

    /// Run `task` once the response body has been sent. Replaces any task
    /// set earlier.
    pub fn background<F>(&mut self, task: F) -> &mut Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.background = Some(Box::pin(task));
        self
    }

    /// Redirect to `url`, permanently (301) or temporarily (302).
    pub fn redirect(&mut self, url: &str, permanent: bool) -> Result<&mut Self> {
        let location = HeaderValue::from_str(url)
            .wrap_err_with(|| format!("Invalid redirect location: {url}"))?;
        self.status = if permanent {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::FOUND
        };
        self.headers.insert(header::LOCATION, location);
        Ok(self)
    }

    pub(crate) fn clear_body(&mut self) {
        self.body = Bytes::new();
        self.stream = None;
    }

    fn set_body(&mut self, body: Bytes, content_type: HeaderValue) -> &mut Self {
        self.body = body;
        self.stream = None;
        self.headers.insert(header::CONTENT_TYPE, content_type);
        self
    }

    pub fn into_http(self) -> http::Response<Body> {
        let Self {
            status,
            headers,
            body,
            stream: chunks,
            background,
            ..
        } = self;
        let body = match (chunks, background) {
            (None, None) => Body::from(body),
            (Some(chunks), None) => Body::from_stream(chunks),
            (chunks, Some(task)) => {
                let chunks =
                    chunks.unwrap_or_else(|| stream::once(future::ready(Ok(body))).boxed());
                Body::from_stream(chunks.chain(spawn_when_polled(task)))
            }
        };
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

/// An empty stream that spawns `task` when polled, i.e. once every chunk
/// before it has been sent.
fn spawn_when_polled(task: BackgroundTask) -> impl Stream<Item = Result<Bytes, BoxError>> + Send {
    stream::once(async move {
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!("Background task failed: {:?}", e);
            }
        });
        None::<Result<Bytes, BoxError>>
    })
    .filter_map(future::ready)
}
