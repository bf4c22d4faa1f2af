//! Server side of one WebSocket connection.
use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;
use http::HeaderMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::{
    core::{
        app::App,
        converter::Params,
        providers::{self, Instance},
        request::Request,
        websocket::codes::{self, CloseCodes},
    },
    ports::websocket::{TransportError, WebSocketTransport, WsMessage},
};

/// Lifecycle of a connection: Pending, then Accepted, then Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Accepted,
    Closed(u16),
}

/// How messages are decoded on receive and encoded on send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    #[default]
    Text,
    Bytes,
    Json,
    /// Raw transport events, undecoded.
    Event,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Json => "json",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "bytes" => Ok(Self::Bytes),
            "json" => Ok(Self::Json),
            "event" => Ok(Self::Event),
            other => Err(format!(
                "unknown value type '{other}', expected text, bytes, json or event"
            )),
        }
    }
}

/// A decoded WebSocket message.
#[derive(Debug, Clone, PartialEq)]
pub enum WsValue {
    Text(String),
    Bytes(Bytes),
    Json(JsonValue),
    Event(WsMessage),
}

impl WsValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Text(_) => ValueType::Text,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Json(_) => ValueType::Json,
            Self::Event(_) => ValueType::Event,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for WsValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for WsValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for WsValue {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<JsonValue> for WsValue {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WebSocketError {
    #[error("client disconnected with close code {code}")]
    Disconnect { code: u16 },

    #[error("expected a {expected} message, got {received}")]
    UnexpectedMessageType {
        expected: ValueType,
        received: &'static str,
    },

    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("connection has not been accepted")]
    NotAccepted,

    #[error("connection is already closed with code {code}")]
    AlreadyClosed { code: u16 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WebSocketError {
    /// Close code carried by a disconnect.
    pub fn disconnect_code(&self) -> Option<u16> {
        match self {
            Self::Disconnect { code } => Some(*code),
            _ => None,
        }
    }
}

/// Per-route connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    /// Accept before the view runs. Disable to `reject()` inside the view.
    pub auto_accept: bool,
    pub receive_type: ValueType,
    pub send_type: ValueType,
    pub caught_close_codes: CloseCodes,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            auto_accept: true,
            receive_type: ValueType::Text,
            send_type: ValueType::Text,
            caught_close_codes: CloseCodes::default(),
        }
    }
}

impl WebSocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_accept(mut self, auto_accept: bool) -> Self {
        self.auto_accept = auto_accept;
        self
    }

    /// Set both the receive and the send type.
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.receive_type = value_type;
        self.send_type = value_type;
        self
    }

    pub fn receive_type(mut self, value_type: ValueType) -> Self {
        self.receive_type = value_type;
        self
    }

    pub fn send_type(mut self, value_type: ValueType) -> Self {
        self.send_type = value_type;
        self
    }

    pub fn caught_close_codes(mut self, codes: CloseCodes) -> Self {
        self.caught_close_codes = codes;
        self
    }
}

pub struct WebSocket {
    /// Path parameters, typed by their pattern tags.
    pub params: Params,
    req: Request,
    transport: Box<dyn WebSocketTransport>,
    state: ConnectionState,
    options: WebSocketOptions,
    app: Arc<App>,
    providers: HashMap<String, Instance>,
}

impl WebSocket {
    pub fn new(
        app: Arc<App>,
        req: Request,
        transport: Box<dyn WebSocketTransport>,
        options: WebSocketOptions,
    ) -> Self {
        Self {
            params: Params::new(),
            req,
            transport,
            state: ConnectionState::Pending,
            options,
            app,
            providers: HashMap::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn path(&self) -> &str {
        self.req.path()
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        self.req.query_params()
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.req.query(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        self.req.headers()
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn options(&self) -> &WebSocketOptions {
        &self.options
    }

    /// Resolve a named provider, see [`Context::provider`](crate::core::context::Context::provider).
    pub async fn provider<T: Send + Sync + 'static>(&mut self, name: &str) -> eyre::Result<Arc<T>> {
        let instance = self
            .app
            .providers()
            .resolve(name, &mut self.providers)
            .await?;
        providers::downcast(name, instance)
    }

    /// Complete the handshake. Accepting twice is a no-op.
    pub async fn accept(&mut self) -> Result<(), WebSocketError> {
        match self.state {
            ConnectionState::Pending => {
                self.transport.accept().await?;
                self.state = ConnectionState::Accepted;
                Ok(())
            }
            ConnectionState::Accepted => Ok(()),
            ConnectionState::Closed(code) => Err(WebSocketError::AlreadyClosed { code }),
        }
    }

    /// Refuse the connection with close code 403.
    pub async fn reject(&mut self) -> Result<(), WebSocketError> {
        self.close(codes::FORBIDDEN).await
    }

    pub async fn close(&mut self, code: u16) -> Result<(), WebSocketError> {
        if let ConnectionState::Closed(code) = self.state {
            return Err(WebSocketError::AlreadyClosed { code });
        }
        self.state = ConnectionState::Closed(code);
        self.transport.close(code).await?;
        Ok(())
    }

    /// Close with `code` unless the connection is already closed.
    pub(crate) async fn ensure_closed(&mut self, code: u16) {
        if matches!(self.state, ConnectionState::Closed(_)) {
            return;
        }
        if let Err(e) = self.close(code).await {
            tracing::debug!("Failed to close WebSocket with code {}: {}", code, e);
        }
    }

    /// Receive a message decoded with the configured receive type.
    pub async fn receive(&mut self) -> Result<WsValue, WebSocketError> {
        self.receive_as(self.options.receive_type).await
    }

    pub async fn receive_text(&mut self) -> Result<String, WebSocketError> {
        match self.receive_as(ValueType::Text).await? {
            WsValue::Text(text) => Ok(text),
            other => Err(unexpected(ValueType::Text, &other)),
        }
    }

    pub async fn receive_bytes(&mut self) -> Result<Bytes, WebSocketError> {
        match self.receive_as(ValueType::Bytes).await? {
            WsValue::Bytes(bytes) => Ok(bytes),
            other => Err(unexpected(ValueType::Bytes, &other)),
        }
    }

    pub async fn receive_json<T: DeserializeOwned>(&mut self) -> Result<T, WebSocketError> {
        match self.receive_as(ValueType::Json).await? {
            WsValue::Json(value) => Ok(serde_json::from_value(value)?),
            other => Err(unexpected(ValueType::Json, &other)),
        }
    }

    /// Next message, or `None` once the client disconnects with a caught code.
    pub async fn next(&mut self) -> Result<Option<WsValue>, WebSocketError> {
        match self.receive().await {
            Ok(value) => Ok(Some(value)),
            Err(WebSocketError::Disconnect { code })
                if self.options.caught_close_codes.contains(code) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn receive_as(&mut self, value_type: ValueType) -> Result<WsValue, WebSocketError> {
        match self.state {
            ConnectionState::Pending => return Err(WebSocketError::NotAccepted),
            ConnectionState::Closed(code) => return Err(WebSocketError::Disconnect { code }),
            ConnectionState::Accepted => {}
        }

        let message = match self.transport.receive().await {
            Ok(message) => message,
            Err(TransportError::ConnectionLost) => {
                self.state = ConnectionState::Closed(codes::ABNORMAL_CLOSURE);
                return Err(WebSocketError::Disconnect {
                    code: codes::ABNORMAL_CLOSURE,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let WsMessage::Close(code) = message {
            let code = code.unwrap_or(codes::NO_STATUS);
            self.state = ConnectionState::Closed(code);
            return Err(WebSocketError::Disconnect { code });
        }

        match (value_type, message) {
            (ValueType::Event, message) => Ok(WsValue::Event(message)),
            (ValueType::Text, WsMessage::Text(text)) => Ok(WsValue::Text(text)),
            (ValueType::Bytes, WsMessage::Binary(bytes)) => Ok(WsValue::Bytes(bytes)),
            (ValueType::Json, WsMessage::Text(text)) => Ok(WsValue::Json(serde_json::from_str(&text)?)),
            (ValueType::Json, WsMessage::Binary(bytes)) => {
                Ok(WsValue::Json(serde_json::from_slice(&bytes)?))
            }
            (expected, message) => Err(WebSocketError::UnexpectedMessageType {
                expected,
                received: message_kind(&message),
            }),
        }
    }

    /// Send a value that must match the configured send type.
    pub async fn send(&mut self, value: impl Into<WsValue>) -> Result<(), WebSocketError> {
        let value = value.into();
        let expected = self.options.send_type;
        let message = match (expected, value) {
            (ValueType::Event, WsValue::Event(message)) => message,
            (ValueType::Text, WsValue::Text(text)) => WsMessage::Text(text),
            (ValueType::Bytes, WsValue::Bytes(bytes)) => WsMessage::Binary(bytes),
            (ValueType::Json, WsValue::Json(value)) => WsMessage::Text(value.to_string()),
            (expected, other) => return Err(unexpected(expected, &other)),
        };
        self.send_message(message).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WebSocketError> {
        self.send_message(WsMessage::Text(text.into())).await
    }

    pub async fn send_bytes(&mut self, bytes: impl Into<Bytes>) -> Result<(), WebSocketError> {
        self.send_message(WsMessage::Binary(bytes.into())).await
    }

    pub async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), WebSocketError> {
        let text = serde_json::to_string(value)?;
        self.send_message(WsMessage::Text(text)).await
    }

    async fn send_message(&mut self, message: WsMessage) -> Result<(), WebSocketError> {
        match self.state {
            ConnectionState::Pending => Err(WebSocketError::NotAccepted),
            ConnectionState::Closed(code) => Err(WebSocketError::AlreadyClosed { code }),
            ConnectionState::Accepted => Ok(self.transport.send(message).await?),
        }
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("path", &self.req.path())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn message_kind(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "bytes",
        WsMessage::Close(_) => "close",
    }
}

fn unexpected(expected: ValueType, value: &WsValue) -> WebSocketError {
    WebSocketError::UnexpectedMessageType {
        expected,
        received: value.value_type().as_str(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{ServerEvent, ws_pair};

    fn socket(options: WebSocketOptions) -> (WebSocket, crate::testing::WsClient) {
        let (transport, client) = ws_pair();
        let req = Request::new(
            http::Method::GET,
            "/chat?room=1".parse().unwrap(),
            HeaderMap::new(),
            Bytes::new(),
        );
        let ws = WebSocket::new(Arc::new(App::new()), req, Box::new(transport), options);
        (ws, client)
    }

    #[tokio::test]
    async fn test_accept_is_idempotent_and_receive_requires_it() {
        let (mut ws, mut client) = socket(WebSocketOptions::new());
        assert!(matches!(ws.receive().await, Err(WebSocketError::NotAccepted)));

        ws.accept().await.unwrap();
        ws.accept().await.unwrap();
        assert_eq!(ws.state(), ConnectionState::Accepted);
        assert_eq!(client.next_event().await, Some(ServerEvent::Accepted));
        assert_eq!(ws.query("room"), Some("1"));
    }

    #[tokio::test]
    async fn test_typed_receive_and_send() {
        let (mut ws, mut client) = socket(WebSocketOptions::new().value_type(ValueType::Json));
        ws.accept().await.unwrap();

        client.send_text(r#"{"n": 1}"#);
        assert_eq!(ws.receive().await.unwrap(), WsValue::Json(json!({"n": 1})));

        ws.send(json!({"n": 2})).await.unwrap();
        client.next_event().await;
        assert_eq!(
            client.next_event().await,
            Some(ServerEvent::Message(WsMessage::Text(r#"{"n":2}"#.to_string())))
        );

        let err = ws.send("plain").await.unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::UnexpectedMessageType {
                expected: ValueType::Json,
                received: "text"
            }
        ));
    }

    #[tokio::test]
    async fn test_mismatched_decode_is_a_type_error() {
        let (mut ws, client) = socket(WebSocketOptions::new());
        ws.accept().await.unwrap();

        client.send_bytes(&b"\x00\x01"[..]);
        let err = ws.receive().await.unwrap_err();
        assert_eq!(err.to_string(), "expected a text message, got bytes");
    }

    #[tokio::test]
    async fn test_disconnect_and_next() {
        let (mut ws, client) = socket(WebSocketOptions::new());
        ws.accept().await.unwrap();

        client.send_text("hello");
        client.close(1001);
        assert_eq!(ws.next().await.unwrap(), Some(WsValue::Text("hello".to_string())));
        assert_eq!(ws.next().await.unwrap(), None);
        assert_eq!(ws.state(), ConnectionState::Closed(1001));

        let (mut ws, client) = socket(WebSocketOptions::new());
        ws.accept().await.unwrap();
        client.close(4000);
        assert_eq!(ws.next().await.unwrap_err().disconnect_code(), Some(4000));
    }

    #[tokio::test]
    async fn test_reject_closes_with_403() {
        let (mut ws, mut client) = socket(WebSocketOptions::new().auto_accept(false));
        ws.reject().await.unwrap();
        assert_eq!(ws.state(), ConnectionState::Closed(403));
        assert_eq!(client.next_event().await, Some(ServerEvent::Closed(403)));
        assert!(ws.accept().await.is_err());
    }
}
