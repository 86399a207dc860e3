//! Socket session state machine.
//!
//! One `SocketSession` owns the transport, the local cache, the op-log, and
//! the offline change bus. A driver task consumes transport events: connect
//! transitions trigger op-log replay (and, on reconnect, re-issuing every
//! active subscription under a fresh server id), acks are routed by message
//! id to one-shot slots, and subscription frames are routed by server
//! subscription id.
//!
//! Subscriptions are addressed by a stable client-side id; the
//! server-assigned id is a routing detail that changes across reconnects
//! without the caller noticing.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use tidesync_types::message::SyncMessage;
use tidesync_types::query::project;
use tidesync_types::types::{ChangeFrame, ConnectionState, SubscribeParams};
use tidesync_types::local_store::{LocalStore, OpLogStore};
use tidesync_types::utils::random_id;

use crate::emitter::{LocalChange, OfflineEmitter};
use crate::oplog::OpLog;
use crate::prelude::*;
use crate::transport::{SyncTransport, TransportEvent};

/// Internal buckets never mirrored into the local cache.
const BUCKETS_TO_IGNORE: [&str; 2] = ["_oplog", "_sessions"];

/// Frames buffered for a subscription id the session has not registered
/// yet (the server may start streaming before the subscribe ack is
/// processed).
const STRAY_FRAME_LIMIT: usize = 256;

/// Stray buffers whose subscription never registers (a failed resubscribe
/// after the server already streamed) are dropped after this long.
const STRAY_TTL: std::time::Duration = std::time::Duration::from_secs(30);

struct StrayBuffer {
	frames: Vec<ChangeFrame>,
	created: tokio::time::Instant,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Queue writes and serve reads locally while disconnected, and mirror
	/// subscription traffic into the local cache.
	pub enable_offline: bool,

	/// How long an online request waits for its ack. Not applied in
	/// offline mode.
	pub ack_timeout: std::time::Duration,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self { enable_offline: false, ack_timeout: std::time::Duration::from_secs(5) }
	}
}

impl SessionConfig {
	pub fn offline() -> Self {
		Self { enable_offline: true, ..Self::default() }
	}
}

/// A live subscription handle. Dropping the receiver cancels delivery.
pub struct Subscription {
	/// Stable client-side id, valid across reconnects.
	pub id: Box<str>,
	pub frames: mpsc::UnboundedReceiver<ChangeFrame>,
}

pub(crate) struct SubEntry {
	pub(crate) params: SubscribeParams,
	frame_tx: mpsc::UnboundedSender<ChangeFrame>,
	/// Server-assigned id of the current incarnation; `local-*` until the
	/// first successful subscribe round trip.
	server_id: RwLock<Box<str>>,
	/// Snapshot entries delivered so far, for client-side limit filtering
	/// of offline subscriptions.
	delivered: AtomicI64,
}

pub struct SocketSession {
	pub(crate) transport: Arc<dyn SyncTransport>,
	pub(crate) local: Arc<dyn LocalStore>,
	pub(crate) oplog: OpLog,
	pub(crate) emitter: Arc<OfflineEmitter>,
	pub(crate) config: SessionConfig,

	state: RwLock<ConnectionState>,
	/// Ack slots keyed by request message id. First delivery wins;
	/// duplicates find the slot gone and are dropped.
	pending: Mutex<HashMap<String, oneshot::Sender<SyncMessage>>>,
	/// Client id -> subscription.
	subs: Mutex<HashMap<Box<str>, Arc<SubEntry>>>,
	/// Server subscription id -> client id.
	routes: Mutex<HashMap<Box<str>, Box<str>>>,
	/// Frames that arrived before their subscription was registered.
	strays: Mutex<HashMap<Box<str>, StrayBuffer>>,
	driver: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SocketSession {
	/// Create a session and start its driver task.
	pub fn new(
		transport: Arc<dyn SyncTransport>,
		local: Arc<dyn LocalStore>,
		oplog_store: Arc<dyn OpLogStore>,
		config: SessionConfig,
	) -> TsResult<Arc<Self>> {
		let events = transport.take_events()?;
		let session = Arc::new(Self {
			transport,
			local,
			oplog: OpLog::new(oplog_store),
			emitter: Arc::new(OfflineEmitter::new()),
			config,
			state: RwLock::new(ConnectionState::Disconnected),
			pending: Mutex::new(HashMap::new()),
			subs: Mutex::new(HashMap::new()),
			routes: Mutex::new(HashMap::new()),
			strays: Mutex::new(HashMap::new()),
			driver: std::sync::Mutex::new(None),
		});
		let driver = tokio::spawn(Self::run_driver(session.clone(), events));
		if let Ok(mut slot) = session.driver.lock() {
			*slot = Some(driver);
		}
		Ok(session)
	}

	pub async fn state(&self) -> ConnectionState {
		*self.state.read().await
	}

	pub async fn is_connected(&self) -> bool {
		self.state().await == ConnectionState::Connected
	}

	/// The offline change bus, for observers outside the subscription API.
	pub fn emitter(&self) -> Arc<OfflineEmitter> {
		self.emitter.clone()
	}

	/// Number of queued offline mutations awaiting replay.
	pub async fn pending_ops(&self) -> usize {
		self.oplog.entries().await.map(|entries| entries.len()).unwrap_or(0)
	}

	/// Stop the driver and close the transport and local stores.
	pub async fn close(&self) -> TsResult<()> {
		let driver = self.driver.lock().ok().and_then(|mut slot| slot.take());
		if let Some(driver) = driver {
			driver.abort();
		}
		self.transport.close().await.ok();
		self.oplog.close().await.ok();
		self.local.close().await
	}

	async fn run_driver(session: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
		while let Some(event) = events.recv().await {
			match event {
				TransportEvent::Connected => {
					debug!("Transport connected");
					*session.state.write().await = ConnectionState::Connected;
					// Replay must not block frame routing
					let session = session.clone();
					tokio::spawn(async move {
						session.resubscribe(false).await;
						session.flush_and_sync_log().await;
					});
				}
				TransportEvent::Reconnected => {
					debug!("Transport reconnected");
					// Stay in Reconnecting until every subscription is
					// re-issued and the op-log replayed; writes during the
					// window queue like any other disconnected write
					*session.state.write().await = ConnectionState::Reconnecting;
					let session = session.clone();
					tokio::spawn(async move {
						session.resubscribe(true).await;
						session.flush_and_sync_log().await;
						{
							let mut state = session.state.write().await;
							if *state != ConnectionState::Reconnecting {
								// The link dropped again mid-window
								return;
							}
							*state = ConnectionState::Connected;
						}
						// Pick up subscriptions and writes issued during the
						// window
						session.resubscribe(false).await;
						session.flush_and_sync_log().await;
					});
				}
				TransportEvent::Disconnected => {
					debug!("Transport disconnected");
					*session.state.write().await = ConnectionState::Disconnected;
				}
				TransportEvent::Message(msg) => session.route_message(msg).await,
			}
		}
		debug!("Session driver ended");
	}

	async fn route_message(&self, msg: SyncMessage) {
		if msg.is_frame() {
			let Some(server_id) = msg.subscription_id().map(Box::<str>::from) else {
				warn!("Frame without subscription id");
				return;
			};
			let Some(frame) = msg.change_frame() else {
				warn!("Unparseable frame for subscription {}", server_id);
				return;
			};
			let entry = {
				let routes = self.routes.lock().await;
				let subs = self.subs.lock().await;
				routes.get(&server_id).and_then(|client_id| subs.get(client_id)).cloned()
			};
			match entry {
				Some(entry) => self.deliver_frame(&entry, frame).await,
				None => self.buffer_stray(server_id, frame).await,
			}
			return;
		}

		// Everything else resolves a pending request by id
		let key = id_key(&msg.id);
		let slot = self.pending.lock().await.remove(&key);
		match slot {
			Some(tx) => {
				tx.send(msg).ok();
			}
			// Late or duplicate delivery; the slot is single-use
			None => debug!("Dropping unroutable message: id={}", key),
		}
	}

	async fn buffer_stray(&self, server_id: Box<str>, frame: ChangeFrame) {
		let now = tokio::time::Instant::now();
		let mut strays = self.strays.lock().await;
		// Buffers whose subscription never registered expire here
		strays.retain(|id, buffer| {
			let live = now.duration_since(buffer.created) < STRAY_TTL;
			if !live {
				debug!("Dropping expired stray buffer for {}", id);
			}
			live
		});
		let buffer = strays
			.entry(server_id)
			.or_insert_with(|| StrayBuffer { frames: Vec::new(), created: now });
		if buffer.frames.len() >= STRAY_FRAME_LIMIT {
			warn!("Stray frame buffer full, dropping oldest");
			buffer.frames.remove(0);
		}
		buffer.frames.push(frame);
	}

	async fn drain_strays(&self, server_id: &str, entry: &Arc<SubEntry>) {
		let buffered = self.strays.lock().await.remove(server_id);
		if let Some(buffered) = buffered {
			for frame in buffered.frames {
				self.deliver_frame(entry, frame).await;
			}
		}
	}

	/// Apply client-side filtering/caching and forward a frame to the
	/// subscriber.
	async fn deliver_frame(&self, entry: &Arc<SubEntry>, frame: ChangeFrame) {
		let params = &entry.params;

		if frame.is_done() {
			entry.delivered.store(0, Ordering::SeqCst);
			entry.frame_tx.send(ChangeFrame::Done).ok();
			if params.once {
				self.remove_entry(entry).await;
			}
			return;
		}

		// Mirror the unfiltered stream before any delivery filtering, so
		// the local cache stays complete
		self.cache_frame(params, &frame).await;

		// Offline subscriptions receive the whole bucket and re-apply
		// limit and range locally
		if params.enable_offline && params.is_whole_bucket() {
			match &frame {
				ChangeFrame::Value { key, .. } => {
					if params.limit >= 0 && entry.delivered.load(Ordering::SeqCst) >= params.limit {
						return;
					}
					if let Some(key) = key {
						if !params.range.contains(key) {
							return;
						}
					}
					entry.delivered.fetch_add(1, Ordering::SeqCst);
				}
				ChangeFrame::Put { key, .. } | ChangeFrame::Delete { key } => {
					if !params.range.contains(key) {
						return;
					}
				}
				ChangeFrame::Done | ChangeFrame::Error { .. } => {}
			}
		}

		if entry.frame_tx.send(frame).is_err() {
			// Receiver dropped; tear the subscription down
			self.remove_entry(entry).await;
		}
	}

	/// Mirror subscription traffic into the local cache for offline
	/// subscriptions.
	async fn cache_frame(&self, params: &SubscribeParams, frame: &ChangeFrame) {
		if !params.enable_offline || BUCKETS_TO_IGNORE.contains(&params.bucket.as_str()) {
			return;
		}
		let result = match frame {
			ChangeFrame::Value { key: Some(key), value: Some(value) } => {
				self.local.put(&params.bucket, key, value.clone()).await
			}
			ChangeFrame::Value { .. } => {
				// Key subscriptions carry no key in the seed frame
				match (&params.key, frame) {
					(Some(key), ChangeFrame::Value { value: Some(value), .. }) => {
						self.local.put(&params.bucket, key, value.clone()).await
					}
					_ => Ok(()),
				}
			}
			ChangeFrame::Put { key, value } => {
				self.local.put(&params.bucket, key, value.clone()).await
			}
			ChangeFrame::Delete { key } => self.local.remove(&params.bucket, key).await,
			ChangeFrame::Done | ChangeFrame::Error { .. } => Ok(()),
		};
		if let Err(err) = result {
			warn!("Local cache update failed for bucket {}: {}", params.bucket, err);
		}
	}

	async fn remove_entry(&self, entry: &Arc<SubEntry>) {
		let server_id = entry.server_id.read().await.clone();
		let client_id = {
			let mut routes = self.routes.lock().await;
			routes.remove(&server_id)
		};
		if let Some(client_id) = client_id {
			self.subs.lock().await.remove(&client_id);
		}
	}

	/// Open a subscription. Connected sessions round-trip to the server;
	/// disconnected offline sessions serve a snapshot from the local cache
	/// and register for re-issue on the next connect.
	pub async fn subscribe(&self, mut params: SubscribeParams) -> TsResult<Subscription> {
		if self.config.enable_offline {
			params.enable_offline = true;
		}
		let client_id: Box<str> = format!("sub-{}", random_id()).into();
		let (frame_tx, frames) = mpsc::unbounded_channel();
		let entry = Arc::new(SubEntry {
			params: params.clone(),
			frame_tx,
			server_id: RwLock::new(format!("local-{}", random_id()).into()),
			delivered: AtomicI64::new(0),
		});

		self.spawn_emitter_listener(&entry).await;

		let server_id = if self.is_connected().await {
			self.request_subscription(&params).await?
		} else {
			if params.enable_offline {
				self.serve_local_snapshot(&entry).await;
				// A one-shot scan is complete once served locally
				if params.once {
					return Ok(Subscription { id: client_id, frames });
				}
			}
			entry.server_id.read().await.clone()
		};

		*entry.server_id.write().await = server_id.clone();
		self.subs.lock().await.insert(client_id.clone(), entry.clone());
		self.routes.lock().await.insert(server_id.clone(), client_id.clone());
		self.drain_strays(&server_id, &entry).await;

		Ok(Subscription { id: client_id, frames })
	}

	/// Cancel a subscription by its client id.
	pub async fn unsubscribe(&self, client_id: &str) -> TsResult<()> {
		let entry = self.subs.lock().await.remove(client_id);
		let Some(entry) = entry else { return Ok(()) };
		let server_id = entry.server_id.read().await.clone();
		self.routes.lock().await.remove(&server_id);
		if self.is_connected().await && !server_id.starts_with("local-") {
			let mut payload = Map::new();
			payload.insert("subscriptionId".to_string(), Value::String(server_id.into_string()));
			let msg = SyncMessage::new("unsubscribe", Value::Object(payload));
			// The ack resolves no slot and is dropped
			self.transport.send(&msg).await.ok();
		}
		Ok(())
	}

	/// Round-trip a subscribe request, returning the server-assigned id.
	async fn request_subscription(&self, params: &SubscribeParams) -> TsResult<Box<str>> {
		let payload = serde_json::to_value(params)?;
		let msg = SyncMessage::new("subscribeBucket", payload);
		let ack = self.await_ack(&msg).await?;
		ack.payload
			.get("subscriptionId")
			.and_then(Value::as_str)
			.map(Box::<str>::from)
			.ok_or_else(|| Error::Internal("subscribe ack without subscription id".into()))
	}

	/// Serve a subscription's initial data from the local cache while
	/// disconnected, applying range, reverse, limit, and query locally.
	async fn serve_local_snapshot(&self, entry: &Arc<SubEntry>) {
		let params = &entry.params;
		if let Some(key) = &params.key {
			match self.local.get(&params.bucket, key).await {
				Ok(Some(value)) => {
					let value = project(params.query.as_ref(), &value);
					entry
						.frame_tx
						.send(ChangeFrame::Value { key: None, value: Some(value) })
						.ok();
				}
				Ok(None) => debug!("No cached value for {}/{}", params.bucket, key),
				Err(err) => warn!("Local read failed for {}/{}: {}", params.bucket, key, err),
			}
			return;
		}

		let mut entries = match self.local.entries(&params.bucket).await {
			Ok(entries) => entries,
			Err(err) => {
				warn!("Local scan failed for bucket {}: {}", params.bucket, err);
				return;
			}
		};
		if params.reverse {
			entries.reverse();
		}
		let mut sent = 0_i64;
		for (key, value) in entries {
			if params.limit >= 0 && sent >= params.limit {
				break;
			}
			if !params.range.contains(&key) {
				continue;
			}
			sent += 1;
			let frame = ChangeFrame::Value {
				key: params.keys.then_some(key),
				value: params.values.then(|| project(params.query.as_ref(), &value)),
			};
			if entry.frame_tx.send(frame).is_err() {
				return;
			}
		}
		if params.once {
			entry.frame_tx.send(ChangeFrame::Done).ok();
		}
	}

	/// Forward offline-bus changes for this subscription's scope into its
	/// frame stream.
	async fn spawn_emitter_listener(&self, entry: &Arc<SubEntry>) {
		let params = &entry.params;
		let mut rx = match &params.key {
			Some(key) => self.emitter.on_key(&params.bucket, key).await,
			None => self.emitter.on_bucket(&params.bucket).await,
		};
		let entry = entry.clone();
		tokio::spawn(async move {
			loop {
				let change = match rx.recv().await {
					Ok(change) => change,
					Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
					Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
				};
				if entry.params.is_whole_bucket() && !entry.params.range.contains(change.key()) {
					continue;
				}
				let frame = match change {
					LocalChange::Put { key, value } | LocalChange::Patch { key, value } => {
						ChangeFrame::Put { key, value }
					}
					LocalChange::Delete { key } => ChangeFrame::Delete { key },
				};
				if entry.frame_tx.send(frame).is_err() {
					return;
				}
			}
		});
	}

	/// Re-issue subscriptions after a connect. `include_server_ids` also
	/// re-issues subscriptions that already completed a round trip (the
	/// reconnect case); otherwise only locally registered ones are sent.
	async fn resubscribe(&self, include_server_ids: bool) {
		let snapshot: Vec<(Box<str>, Arc<SubEntry>)> = {
			let subs = self.subs.lock().await;
			subs.iter().map(|(id, entry)| (id.clone(), entry.clone())).collect()
		};
		for (client_id, entry) in snapshot {
			let old_server_id = entry.server_id.read().await.clone();
			if !include_server_ids && !old_server_id.starts_with("local-") {
				continue;
			}
			entry.delivered.store(0, Ordering::SeqCst);
			match self.request_subscription(&entry.params).await {
				Ok(new_server_id) => {
					debug!(
						"Resubscribed {}: {} -> {}",
						client_id, old_server_id, new_server_id
					);
					*entry.server_id.write().await = new_server_id.clone();
					let mut routes = self.routes.lock().await;
					routes.remove(&old_server_id);
					routes.insert(new_server_id.clone(), client_id.clone());
					drop(routes);
					self.drain_strays(&new_server_id, &entry).await;
				}
				Err(err) => {
					warn!("Resubscribe failed for {}: {}", client_id, err);
				}
			}
		}
	}

	/// Register an ack slot, send the request, and await the single
	/// resolution. Error acks become `Error::DbError`; a missing ack times
	/// out unless the session runs in offline mode.
	pub(crate) async fn await_ack(&self, msg: &SyncMessage) -> TsResult<SyncMessage> {
		let key = id_key(&msg.id);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().await.insert(key.clone(), tx);

		if let Err(err) = self.transport.send(msg).await {
			self.pending.lock().await.remove(&key);
			return Err(err);
		}

		let ack = if self.config.enable_offline {
			rx.await.map_err(|_| Error::Closed)?
		} else {
			match tokio::time::timeout(self.config.ack_timeout, rx).await {
				Ok(Ok(ack)) => ack,
				Ok(Err(_)) => return Err(Error::Closed),
				Err(_) => {
					self.pending.lock().await.remove(&key);
					return Err(Error::Timeout);
				}
			}
		};
		if let Some(error) = ack.error() {
			return Err(Error::DbError(error.to_string()));
		}
		Ok(ack)
	}

	/// Replay the queued op-log in id order. Failed entries are kept for
	/// the next connect; successful ones are removed, so replay after an
	/// interrupted flush is idempotent.
	pub async fn flush_and_sync_log(&self) {
		let entries = match self.oplog.entries().await {
			Ok(entries) => entries,
			Err(err) => {
				warn!("Op-log read failed, skipping replay: {}", err);
				return;
			}
		};
		if entries.is_empty() {
			return;
		}
		info!("Replaying {} queued op(s)", entries.len());
		for entry in entries {
			match self.perform_online(&entry.op).await {
				Ok(()) => {
					if let Err(err) = self.oplog.remove(entry.id).await {
						warn!("Failed to drop replayed op {}: {}", entry.id.0, err);
					}
				}
				Err(err) => {
					warn!(
						"Replay failed for {}/{}, keeping entry: {}",
						entry.op.bucket(),
						entry.op.key(),
						err
					);
				}
			}
		}
	}
}

pub(crate) fn id_key(id: &Value) -> String {
	id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::local_store::{MemoryLocalStore, MemoryOpLog};
	use async_trait::async_trait;

	/// Transport that accepts everything and never delivers an event.
	#[derive(Debug)]
	struct NullTransport {
		events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
		_events_tx: mpsc::UnboundedSender<TransportEvent>,
	}

	impl NullTransport {
		fn new() -> Self {
			let (tx, rx) = mpsc::unbounded_channel();
			Self { events: std::sync::Mutex::new(Some(rx)), _events_tx: tx }
		}
	}

	#[async_trait]
	impl SyncTransport for NullTransport {
		async fn send(&self, _msg: &SyncMessage) -> TsResult<()> {
			Ok(())
		}

		fn take_events(&self) -> TsResult<mpsc::UnboundedReceiver<TransportEvent>> {
			self.events
				.lock()
				.map_err(|_| Error::Internal("events lock".into()))?
				.take()
				.ok_or(Error::Closed)
		}

		async fn close(&self) -> TsResult<()> {
			Ok(())
		}
	}

	fn session() -> Arc<SocketSession> {
		SocketSession::new(
			Arc::new(NullTransport::new()),
			Arc::new(MemoryLocalStore::new()),
			Arc::new(MemoryOpLog::new()),
			SessionConfig::default(),
		)
		.expect("session")
	}

	#[tokio::test(start_paused = true)]
	async fn test_stale_stray_buffers_age_out() {
		let session = session();
		session
			.buffer_stray("sub-gone".into(), ChangeFrame::Delete { key: "a".into() })
			.await;

		tokio::time::advance(STRAY_TTL + std::time::Duration::from_secs(1)).await;
		session
			.buffer_stray("sub-live".into(), ChangeFrame::Delete { key: "b".into() })
			.await;

		let strays = session.strays.lock().await;
		assert!(!strays.contains_key("sub-gone"), "expired buffer must be dropped");
		assert!(strays.contains_key("sub-live"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_fresh_stray_buffers_survive_pruning() {
		let session = session();
		session
			.buffer_stray("sub-a".into(), ChangeFrame::Delete { key: "a".into() })
			.await;
		tokio::time::advance(STRAY_TTL / 2).await;
		session
			.buffer_stray("sub-b".into(), ChangeFrame::Delete { key: "b".into() })
			.await;

		let strays = session.strays.lock().await;
		assert!(strays.contains_key("sub-a"));
		assert!(strays.contains_key("sub-b"));
	}

	#[tokio::test]
	async fn test_stray_buffer_caps_per_subscription() {
		let session = session();
		for i in 0..(STRAY_FRAME_LIMIT + 10) {
			session
				.buffer_stray("sub-x".into(), ChangeFrame::Delete { key: i.to_string().into() })
				.await;
		}
		let strays = session.strays.lock().await;
		let frames = strays.get("sub-x").map(|b| b.frames.len()).unwrap_or(0);
		assert_eq!(frames, STRAY_FRAME_LIMIT);
	}
}

// vim: ts=4
