//! Client transport seam.
//!
//! The session never touches a socket directly; it talks to a
//! `SyncTransport` that delivers connectivity transitions and inbound
//! messages through one event channel. Production transports wrap a
//! WebSocket client; tests run an in-process loopback against the server's
//! command handler.

use async_trait::async_trait;
use std::fmt::Debug;
use tokio::sync::mpsc;

use tidesync_types::message::SyncMessage;

use crate::prelude::*;

/// One transport-level event, in delivery order.
#[derive(Debug)]
pub enum TransportEvent {
	/// First successful connection of this transport.
	Connected,
	/// A later connection after a drop. The session re-issues its
	/// subscriptions before anything else.
	Reconnected,
	Disconnected,
	/// An inbound protocol message (ack, pong, or subscription frame).
	Message(SyncMessage),
}

/// Message transport for one sync session.
#[async_trait]
pub trait SyncTransport: Debug + Send + Sync {
	/// Send a request to the server. Fails when the link is down.
	async fn send(&self, msg: &SyncMessage) -> TsResult<()>;

	/// Take the inbound event stream. The session driver calls this once;
	/// a second take is an error.
	fn take_events(&self) -> TsResult<mpsc::UnboundedReceiver<TransportEvent>>;

	/// Close the transport.
	async fn close(&self) -> TsResult<()>;
}

// vim: ts=4
