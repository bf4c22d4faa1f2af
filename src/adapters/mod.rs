pub mod middleware;
pub mod server;
pub mod websocket;

/// Re-export commonly used types from adapters
pub use middleware::*;
pub use server::{build_router, run, serve};
pub use websocket::AxumTransport;
