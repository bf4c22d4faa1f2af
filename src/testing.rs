//! In-process test helpers.
//!
//! [`TestClient`] drives an [`App`] through its tower service without opening
//! a socket. [`ws_pair`] connects a WebSocket view to an in-memory client.
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use eyre::{Result, WrapErr};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use tokio::{sync::mpsc, task::JoinHandle};
use tower::ServiceExt;

use crate::{
    core::{
        app::{App, AppService},
        handler::HandlerResult,
        request::Request,
    },
    ports::websocket::{TransportError, WebSocketTransport, WsMessage},
};

/// What the server did, as seen by the client end of [`ws_pair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Accepted,
    Message(WsMessage),
    Closed(u16),
}

/// Server end of an in-memory WebSocket.
pub struct ChannelTransport {
    incoming: mpsc::UnboundedReceiver<WsMessage>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

/// Client end of an in-memory WebSocket.
pub struct WsClient {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// A connected transport and client. Messages sent by the client are queued
/// until the server receives them.
pub fn ws_pair() -> (ChannelTransport, WsClient) {
    let (outgoing, incoming) = mpsc::unbounded_channel();
    let (server_events, client_events) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            incoming,
            events: server_events,
        },
        WsClient {
            outgoing,
            events: client_events,
        },
    )
}

impl ChannelTransport {
    fn emit(&self, event: ServerEvent) -> Result<(), TransportError> {
        self.events
            .send(event)
            .map_err(|_| TransportError::ConnectionLost)
    }
}

#[async_trait]
impl WebSocketTransport for ChannelTransport {
    async fn accept(&mut self) -> Result<(), TransportError> {
        self.emit(ServerEvent::Accepted)
    }

    async fn receive(&mut self) -> Result<WsMessage, TransportError> {
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ConnectionLost)
    }

    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError> {
        self.emit(ServerEvent::Message(message))
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        self.emit(ServerEvent::Closed(code))
    }
}

impl WsClient {
    pub fn send_text(&self, text: &str) {
        self.send(WsMessage::Text(text.to_string()));
    }

    pub fn send_bytes(&self, bytes: impl Into<Bytes>) {
        self.send(WsMessage::Binary(bytes.into()));
    }

    pub fn close(&self, code: u16) {
        self.send(WsMessage::Close(Some(code)));
    }

    pub fn send(&self, message: WsMessage) {
        // The server may already be gone; tests observe that through events.
        let _ = self.outgoing.send(message);
    }

    /// Next server event, or `None` once the server dropped the connection.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }
}

/// A buffered response.
#[derive(Debug, Clone)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).wrap_err("Response body is not valid JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Sends requests straight to an application's tower service.
#[derive(Clone)]
pub struct TestClient {
    service: AppService,
}

impl TestClient {
    pub fn new(app: App) -> Self {
        Self::from_arc(Arc::new(app))
    }

    pub fn from_arc(app: Arc<App>) -> Self {
        Self {
            service: AppService::new(app),
        }
    }

    pub fn app(&self) -> &Arc<App> {
        self.service.app()
    }

    pub async fn startup(&self) -> Result<()> {
        self.app().startup().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.app().shutdown().await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, Bytes::new()).await
    }

    pub async fn head(&self, uri: &str) -> TestResponse {
        self.send(Method::HEAD, uri, Bytes::new()).await
    }

    pub async fn post(&self, uri: &str, body: impl Into<Bytes>) -> TestResponse {
        self.send(Method::POST, uri, body.into()).await
    }

    pub async fn send(&self, method: Method, uri: &str, body: Bytes) -> TestResponse {
        let mut req = http::Request::new(Body::from(body));
        *req.method_mut() = method;
        *req.uri_mut() = uri.parse().unwrap_or_default();
        self.request(req).await
    }

    pub async fn request(&self, req: http::Request<Body>) -> TestResponse {
        let response = match self.service.clone().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    /// Open an in-memory WebSocket to `uri`. The connection runs on its own
    /// task, whose result is the error that forced a 1011 close, if any.
    pub fn websocket(&self, uri: &str) -> (JoinHandle<HandlerResult>, WsClient) {
        let (transport, client) = ws_pair();
        let req = Request::new(
            Method::GET,
            uri.parse().unwrap_or_default(),
            HeaderMap::new(),
            Bytes::new(),
        );
        let app = self.app().clone();
        let task = tokio::spawn(app.handle_websocket(req, Box::new(transport)));
        (task, client)
    }
}
