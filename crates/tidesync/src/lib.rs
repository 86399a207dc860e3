//! TideSync: a real-time key-value data-sync layer.
//!
//! Clients subscribe to ordered buckets (whole-bucket range scans or single
//! keys) over a persistent connection and keep working while disconnected:
//! writes queue in a local op-log, offline observers see locally computed
//! effects immediately, and reconnecting replays the queue and re-issues
//! every subscription.
//!
//! This crate re-exports the workspace members; see `tidesync-server`,
//! `tidesync-client`, and `tidesync-types` for the individual layers.

pub use tidesync_client as client;
pub use tidesync_server as server;
pub use tidesync_types as types;

pub use tidesync_types::error::{Error, TsResult};

// vim: ts=4
