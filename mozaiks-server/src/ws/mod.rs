//! WebSocket transport: connection registry and socket lifecycle.

mod connection;
mod registry;

pub use connection::{chat_socket, notification_socket};
pub use registry::ConnectionRegistry;
