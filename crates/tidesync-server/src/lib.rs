//! TideSync server: bucket subscriptions and the write/read command
//! handlers, served over a persistent WebSocket connection.

pub mod app;
pub mod auth;
pub mod registry;
pub mod subscribe;
pub mod websocket;

mod prelude;

pub use app::{App, AppState};
pub use auth::TokenVerifier;
pub use websocket::{Connection, handle_sync_command, handle_sync_connection, router};

// vim: ts=4
