//! Shared integration-test harness.
//!
//! `LoopbackTransport` wires a client session to the server's command
//! handler in-process: outbound requests run `handle_sync_command` directly
//! and the server connection's aggregated frame channel is forwarded back
//! as inbound messages. Connectivity is toggled from tests to exercise the
//! offline and reconnect paths.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use tokio::sync::{Mutex, mpsc};

use tidesync::client::transport::{SyncTransport, TransportEvent};
use tidesync::client::{MemoryLocalStore, MemoryOpLog, SessionConfig, SocketSession};
use tidesync::server::app::AppState;
use tidesync::server::auth::StaticTokenVerifier;
use tidesync::server::websocket::{Connection, handle_sync_command};
use tidesync::server::App;
use tidesync::types::error::{Error, TsResult};
use tidesync::types::message::SyncMessage;
use tidesync_store_adapter_redb::StoreAdapterRedb;

struct LoopbackState {
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
	conn: Option<Arc<Connection>>,
	forwarder: Option<tokio::task::JoinHandle<()>>,
	online: bool,
	ever_connected: bool,
}

pub struct LoopbackTransport {
	app: App,
	state: Mutex<LoopbackState>,
	/// Deliver every ack twice, for single-fulfillment tests.
	pub duplicate_acks: AtomicBool,
	/// Swallow acks entirely, for timeout tests.
	pub drop_acks: AtomicBool,
}

impl std::fmt::Debug for LoopbackTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LoopbackTransport").finish_non_exhaustive()
	}
}

impl LoopbackTransport {
	pub fn new(app: App) -> Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			app,
			state: Mutex::new(LoopbackState {
				events_tx,
				events_rx: Some(events_rx),
				conn: None,
				forwarder: None,
				online: false,
				ever_connected: false,
			}),
			duplicate_acks: AtomicBool::new(false),
			drop_acks: AtomicBool::new(false),
		})
	}

	/// Bring the link up with a fresh server-side connection.
	pub async fn connect(&self) {
		let mut state = self.state.lock().await;
		let (conn, mut frame_rx) = Connection::new("test-user");
		let events_tx = state.events_tx.clone();
		let forwarder = tokio::spawn(async move {
			while let Some((sub_id, frame)) = frame_rx.recv().await {
				let msg = SyncMessage::frame(&sub_id, &frame);
				if events_tx.send(TransportEvent::Message(msg)).is_err() {
					return;
				}
			}
		});
		state.conn = Some(conn);
		state.forwarder = Some(forwarder);
		state.online = true;
		let event = if state.ever_connected {
			TransportEvent::Reconnected
		} else {
			TransportEvent::Connected
		};
		state.ever_connected = true;
		state.events_tx.send(event).ok();
	}

	/// Drop the link; the server side tears down its subscriptions.
	pub async fn disconnect(&self) {
		let mut state = self.state.lock().await;
		if let Some(conn) = state.conn.take() {
			conn.close();
		}
		if let Some(forwarder) = state.forwarder.take() {
			forwarder.abort();
		}
		state.online = false;
		state.events_tx.send(TransportEvent::Disconnected).ok();
	}

	/// The current server-side connection, for registry assertions.
	pub async fn server_conn(&self) -> Option<Arc<Connection>> {
		self.state.lock().await.conn.clone()
	}
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
	async fn send(&self, msg: &SyncMessage) -> TsResult<()> {
		let (conn, events_tx) = {
			let state = self.state.lock().await;
			if !state.online {
				return Err(Error::Closed);
			}
			match &state.conn {
				Some(conn) => (conn.clone(), state.events_tx.clone()),
				None => return Err(Error::Closed),
			}
		};
		let response = handle_sync_command(&conn, msg, &self.app).await;
		if self.drop_acks.load(Ordering::SeqCst) {
			return Ok(());
		}
		events_tx.send(TransportEvent::Message(response.clone())).ok();
		if self.duplicate_acks.load(Ordering::SeqCst) {
			events_tx.send(TransportEvent::Message(response)).ok();
		}
		Ok(())
	}

	fn take_events(&self) -> TsResult<mpsc::UnboundedReceiver<TransportEvent>> {
		self.state
			.try_lock()
			.map_err(|_| Error::Internal("transport state locked".into()))?
			.events_rx
			.take()
			.ok_or(Error::Closed)
	}

	async fn close(&self) -> TsResult<()> {
		self.disconnect().await;
		Ok(())
	}
}

/// A server app over a fresh redb store plus a client session wired to it.
pub struct Harness {
	pub app: App,
	pub transport: Arc<LoopbackTransport>,
	pub session: Arc<SocketSession>,
	_dir: TempDir,
}

pub async fn harness(config: SessionConfig) -> Harness {
	let dir = TempDir::new().expect("tempdir");
	let store =
		Arc::new(StoreAdapterRedb::new(dir.path().join("store.redb")).expect("open store"));
	let verifier = Arc::new(StaticTokenVerifier::new("secret", "test-user"));
	let app = AppState::new(store, verifier);
	let transport = LoopbackTransport::new(app.clone());
	let session = SocketSession::new(
		transport.clone(),
		Arc::new(MemoryLocalStore::new()),
		Arc::new(MemoryOpLog::new()),
		config,
	)
	.expect("session");
	Harness { app, transport, session, _dir: dir }
}

/// Let spawned driver work settle.
pub async fn settle() {
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

// vim: ts=4
