//! WebSocket routing and connections.
pub mod codes;
pub mod connection;
pub mod router;

pub use codes::CloseCodes;
pub use connection::{ConnectionState, ValueType, WebSocket, WebSocketError, WebSocketOptions, WsValue};
pub use router::{WebSocketHandler, WebSocketRoute, WebSocketRouter};
