//! axum implementation of the WebSocket transport port.
//!
//! The application decides whether to accept a connection before the HTTP
//! handshake is answered: accepting completes the upgrade, closing first
//! answers the handshake with 403.
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{
    core::{app::App, request::Request},
    ports::websocket::{TransportError, WebSocketTransport, WsMessage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Accept,
    Reject(u16),
}

enum State {
    Pending {
        decision: oneshot::Sender<Decision>,
        socket: oneshot::Receiver<WebSocket>,
    },
    Open(WebSocket),
    Closed,
}

/// Server side of a WebSocket upgraded by axum.
pub struct AxumTransport {
    state: State,
}

impl AxumTransport {
    fn new(decision: oneshot::Sender<Decision>, socket: oneshot::Receiver<WebSocket>) -> Self {
        Self {
            state: State::Pending { decision, socket },
        }
    }

    fn socket(&mut self) -> Result<&mut WebSocket, TransportError> {
        match &mut self.state {
            State::Open(socket) => Ok(socket),
            State::Pending { .. } => Err(TransportError::Io("handshake not completed".to_string())),
            State::Closed => Err(TransportError::ConnectionLost),
        }
    }
}

#[async_trait]
impl WebSocketTransport for AxumTransport {
    async fn accept(&mut self) -> Result<(), TransportError> {
        let State::Pending { decision, socket } = std::mem::replace(&mut self.state, State::Closed) else {
            return Ok(());
        };
        decision
            .send(Decision::Accept)
            .map_err(|_| TransportError::ConnectionLost)?;
        let socket = socket.await.map_err(|_| TransportError::ConnectionLost)?;
        self.state = State::Open(socket);
        Ok(())
    }

    async fn receive(&mut self) -> Result<WsMessage, TransportError> {
        let socket = self.socket()?;
        loop {
            let message = match socket.recv().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                None => return Err(TransportError::ConnectionLost),
            };
            match message {
                Message::Text(text) => return Ok(WsMessage::Text(text.as_str().to_owned())),
                Message::Binary(bytes) => return Ok(WsMessage::Binary(bytes)),
                Message::Close(frame) => return Ok(WsMessage::Close(frame.map(|frame| frame.code))),
                // Pings are answered by the protocol layer.
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }

    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError> {
        let message = match message {
            WsMessage::Text(text) => Message::Text(text.into()),
            WsMessage::Binary(bytes) => Message::Binary(bytes),
            WsMessage::Close(code) => Message::Close(code.map(close_frame)),
        };
        self.socket()?
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Pending { decision, .. } => {
                // The handshake may already have been abandoned by the client.
                let _ = decision.send(Decision::Reject(code));
                Ok(())
            }
            State::Open(mut socket) => socket
                .send(Message::Close(Some(close_frame(code))))
                .await
                .map_err(|e| TransportError::Io(e.to_string())),
            State::Closed => Ok(()),
        }
    }
}

fn close_frame(code: u16) -> CloseFrame {
    CloseFrame {
        code,
        reason: "".into(),
    }
}

/// Run the application's WebSocket router for an upgrade request and answer
/// the handshake according to the view's decision.
pub async fn upgrade(app: Arc<App>, parts: Parts, upgrade: WebSocketUpgrade) -> Response {
    let req = Request::new(parts.method, parts.uri, parts.headers, Bytes::new());
    let (decision_tx, decision_rx) = oneshot::channel();
    let (socket_tx, socket_rx) = oneshot::channel();
    let transport = AxumTransport::new(decision_tx, socket_rx);

    tokio::spawn(app.handle_websocket(req, Box::new(transport)));

    match decision_rx.await {
        Ok(Decision::Accept) => upgrade.on_upgrade(move |socket| async move {
            if socket_tx.send(socket).is_err() {
                tracing::debug!("WebSocket view finished before the upgrade completed");
            }
        }),
        Ok(Decision::Reject(code)) => {
            tracing::debug!("WebSocket rejected with close code {}", code);
            StatusCode::FORBIDDEN.into_response()
        }
        Err(_) => StatusCode::FORBIDDEN.into_response(),
    }
}
