use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A single WebSocket event exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Bytes),
    /// Close frame with an optional close code.
    Close(Option<u16>),
}

/// Error type for WebSocket transport operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// The peer went away without a close frame
    #[error("Connection lost")]
    ConnectionLost,

    /// Error raised by the underlying socket
    #[error("Transport error: {0}")]
    Io(String),
}

/// WebSocketTransport defines the port for one server-side WebSocket
/// connection, before and after the handshake completes.
#[async_trait]
pub trait WebSocketTransport: Send + 'static {
    /// Complete the handshake.
    async fn accept(&mut self) -> Result<(), TransportError>;

    /// Receive the next event from the client.
    ///
    /// # Returns
    /// `WsMessage::Close` once the client closes; `ConnectionLost` if it
    /// vanished without a close frame.
    async fn receive(&mut self) -> Result<WsMessage, TransportError>;

    /// Send an event to the client.
    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError>;

    /// Close with `code`. Before `accept` this rejects the handshake.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}
