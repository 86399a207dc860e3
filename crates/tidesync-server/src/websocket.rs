//! WebSocket sync handler.
//!
//! The sync protocol (`/ws/sync?token=...`) carries subscription traffic and
//! writes over one persistent connection. Every request is acknowledged with
//! an `ack` message echoing the request id; subscription frames flow through
//! a per-connection aggregated channel so one slow subscription cannot
//! reorder another's stream.

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query as AxumQuery, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::any;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use tidesync_types::message::SyncMessage;
use tidesync_types::patch::{PatchOp, apply_patch};
use tidesync_types::query::{Query, project};
use tidesync_types::types::{ChangeFrame, SubscribeParams};
use tidesync_types::utils::random_id;

use crate::app::App;
use crate::prelude::*;
use crate::registry::SubscriptionRegistry;
use crate::subscribe;

/// One authenticated sync connection.
pub struct Connection {
	pub conn_id: Box<str>,
	pub user_id: Box<str>,
	/// Aggregated channel collecting frames from every subscription task.
	frame_tx: mpsc::UnboundedSender<(Box<str>, ChangeFrame)>,
	/// Live subscriptions, torn down on unsubscribe or disconnect.
	pub subscriptions: SubscriptionRegistry,
}

impl Connection {
	/// Create a connection and the receiving end of its aggregated channel.
	pub fn new(user_id: impl Into<Box<str>>) -> (Arc<Self>, mpsc::UnboundedReceiver<(Box<str>, ChangeFrame)>) {
		let (frame_tx, frame_rx) = mpsc::unbounded_channel();
		let conn = Arc::new(Self {
			conn_id: random_id().into(),
			user_id: user_id.into(),
			frame_tx,
			subscriptions: SubscriptionRegistry::new(),
		});
		(conn, frame_rx)
	}

	/// Queue a frame for delivery. Fails once the connection is gone.
	pub fn send_frame(&self, sub_id: &str, frame: ChangeFrame) -> TsResult<()> {
		self.frame_tx.send((sub_id.into(), frame)).map_err(|_| Error::Closed)
	}

	/// Tear down every subscription. Idempotent.
	pub fn close(&self) {
		self.subscriptions.clear_all();
	}
}

fn required_str<'m>(msg: &'m SyncMessage, field: &str) -> TsResult<&'m str> {
	msg.payload
		.get(field)
		.and_then(Value::as_str)
		.filter(|s| !s.is_empty())
		.ok_or_else(|| Error::ValidationError(format!("missing field: {}", field)))
}

/// Parse patch operations from the payload. Accepts both a JSON array and a
/// pre-stringified array.
fn parse_ops(value: &Value) -> TsResult<Vec<PatchOp>> {
	let parsed = match value {
		Value::String(text) => serde_json::from_str(text)?,
		other => serde_json::from_value(other.clone())?,
	};
	Ok(parsed)
}

/// Handle one sync command and produce its acknowledgement.
pub async fn handle_sync_command(conn: &Arc<Connection>, msg: &SyncMessage, app: &App) -> SyncMessage {
	match msg.msg_type.as_str() {
		"subscribe" | "subscribeBucket" => {
			let params =
				match serde_json::from_value::<SubscribeParams>(Value::Object(msg.payload.clone())) {
					Ok(params) => params,
					Err(err) => {
						warn!("Malformed subscribe request: {}", err);
						return SyncMessage::ack_error(msg.id.clone(), format!("invalid subscribe request: {}", err));
					}
				};
			debug!(
				"Subscribe: user={} bucket={} key={:?}",
				conn.user_id, params.bucket, params.key
			);
			match subscribe::subscribe(app, conn, params).await {
				Ok(sub_id) => {
					let mut fields = Map::new();
					fields.insert("subscriptionId".to_string(), Value::String(sub_id.into_string()));
					SyncMessage::ack(msg.id.clone(), fields)
				}
				Err(err) => {
					warn!("Subscribe failed: {}", err);
					SyncMessage::ack_error(msg.id.clone(), err.to_string())
				}
			}
		}

		"unsubscribe" => {
			let sub_id = msg.payload.get("subscriptionId").and_then(Value::as_str).unwrap_or("");
			conn.subscriptions.remove(sub_id);
			debug!("User {} unsubscribed: {}", conn.user_id, sub_id);
			SyncMessage::ack_empty(msg.id.clone())
		}

		"put" => {
			let result = async {
				let bucket = required_str(msg, "bucket")?;
				subscribe::validate_bucket(bucket)?;
				let key = required_str(msg, "key")?;
				let value = msg
					.payload
					.get("value")
					.cloned()
					.ok_or_else(|| Error::ValidationError("missing field: value".into()))?;
				app.store.put(bucket, key, value).await
			}
			.await;
			match result {
				Ok(()) => SyncMessage::ack_empty(msg.id.clone()),
				Err(err) => {
					warn!("Put failed: {}", err);
					SyncMessage::ack_error(msg.id.clone(), err.to_string())
				}
			}
		}

		"patch" => {
			let result = async {
				let bucket = required_str(msg, "bucket")?;
				subscribe::validate_bucket(bucket)?;
				let key = required_str(msg, "key")?;
				let ops = parse_ops(
					msg.payload
						.get("ops")
						.ok_or_else(|| Error::ValidationError("missing field: ops".into()))?,
				)?;
				// Patching an absent key starts from an empty document
				let mut doc = app.store.get(bucket, key).await?.unwrap_or_else(|| json!({}));
				apply_patch(&mut doc, &ops)?;
				app.store.put(bucket, key, doc).await
			}
			.await;
			match result {
				Ok(()) => SyncMessage::ack_empty(msg.id.clone()),
				Err(err) => {
					warn!("Patch failed: {}", err);
					SyncMessage::ack_error(msg.id.clone(), err.to_string())
				}
			}
		}

		"delete" => {
			let result = async {
				let bucket = required_str(msg, "bucket")?;
				subscribe::validate_bucket(bucket)?;
				match msg.payload.get("key").and_then(Value::as_str) {
					Some(key) => app.store.delete(bucket, key).await,
					// No key deletes the whole bucket
					None => app.store.drop_bucket(bucket).await,
				}
			}
			.await;
			match result {
				Ok(()) => SyncMessage::ack_empty(msg.id.clone()),
				Err(err) => {
					warn!("Delete failed: {}", err);
					SyncMessage::ack_error(msg.id.clone(), err.to_string())
				}
			}
		}

		"get" => {
			let result = async {
				let bucket = required_str(msg, "bucket")?;
				subscribe::validate_bucket(bucket)?;
				let key = required_str(msg, "key")?;
				app.store.get(bucket, key).await
			}
			.await;
			match result {
				Ok(found) => {
					// Offline readers take the raw value and project locally
					let raw = msg.payload.get("_offlineRaw").and_then(Value::as_bool).unwrap_or(false);
					let query = msg
						.payload
						.get("query")
						.and_then(|q| serde_json::from_value::<Query>(q.clone()).ok());
					let value = match found {
						Some(value) if raw => value,
						Some(value) => project(query.as_ref(), &value),
						None => Value::Null,
					};
					let mut fields = Map::new();
					fields.insert("value".to_string(), value);
					SyncMessage::ack(msg.id.clone(), fields)
				}
				Err(err) => {
					warn!("Get failed: {}", err);
					SyncMessage::ack_error(msg.id.clone(), err.to_string())
				}
			}
		}

		"ping" => SyncMessage::response(msg.id.clone(), "pong", Map::new()),

		_ => {
			warn!("Unknown sync command: {}", msg.msg_type);
			SyncMessage::ack_error(msg.id.clone(), format!("unknown command: {}", msg.msg_type))
		}
	}
}

/// Handle a sync connection end to end: authenticate, then pump commands and
/// subscription frames until either side closes.
pub async fn handle_sync_connection(ws: WebSocket, token: String, app: App) {
	let user_id = match app.verifier.verify(&token).await {
		Ok(user_id) => user_id,
		Err(err) => {
			warn!("Sync connection rejected: {}", err);
			let mut ws = ws;
			ws.send(Message::Close(None)).await.ok();
			return;
		}
	};
	info!("Sync connection: user={}", user_id);

	let (conn, frame_rx) = Connection::new(user_id);

	// Split WebSocket for concurrent read/write
	let (ws_tx, ws_rx) = ws.split();
	let ws_tx: Arc<tokio::sync::Mutex<_>> = Arc::new(tokio::sync::Mutex::new(ws_tx));

	// Heartbeat task keeps idle connections alive
	let ws_tx_heartbeat = ws_tx.clone();
	let heartbeat_conn = conn.conn_id.clone();
	let heartbeat_task = tokio::spawn(async move {
		let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
		loop {
			interval.tick().await;
			debug!("Sync heartbeat: {}", heartbeat_conn);
			let mut tx = ws_tx_heartbeat.lock().await;
			if tx.send(Message::Ping(vec![].into())).await.is_err() {
				debug!("Client disconnected during heartbeat");
				return;
			}
		}
	});

	// Receive task handles incoming commands
	let recv_conn = conn.clone();
	let recv_app = app.clone();
	let ws_tx_recv = ws_tx.clone();
	let recv_task = tokio::spawn(async move {
		let mut ws_rx = ws_rx;
		while let Some(incoming) = ws_rx.next().await {
			let ws_msg = match incoming {
				Ok(ws_msg) => ws_msg,
				Err(err) => {
					warn!("Sync connection error: {}", err);
					break;
				}
			};
			let text = match &ws_msg {
				Message::Text(text) => text,
				Message::Close(_) => break,
				_ => continue,
			};
			let msg = match SyncMessage::from_text(text) {
				Ok(msg) => msg,
				Err(err) => {
					warn!("Failed to parse sync message: {}", err);
					continue;
				}
			};

			let response = handle_sync_command(&recv_conn, &msg, &recv_app).await;

			if let Ok(text) = response.to_text() {
				let mut tx = ws_tx_recv.lock().await;
				if tx.send(Message::Text(text.into())).await.is_err() {
					warn!("Failed to send sync response");
					break;
				}
			}
		}
	});

	// Forward task drains the aggregated frame channel
	let ws_tx_forward = ws_tx.clone();
	let forward_task = tokio::spawn(async move {
		let mut frame_rx = frame_rx;
		while let Some((sub_id, frame)) = frame_rx.recv().await {
			let msg = SyncMessage::frame(&sub_id, &frame);
			if let Ok(text) = msg.to_text() {
				let mut tx = ws_tx_forward.lock().await;
				if tx.send(Message::Text(text.into())).await.is_err() {
					debug!("Client disconnected while forwarding frame");
					return;
				}
			}
		}
	});

	tokio::select! {
		_ = recv_task => {
			debug!("Receive task ended");
		}
		_ = forward_task => {
			debug!("Forward task ended");
		}
	}

	conn.close();
	heartbeat_task.abort();
	info!("Sync connection closed: user={}", conn.user_id);
}

#[derive(Deserialize)]
struct ConnectQuery {
	#[serde(default)]
	token: String,
}

async fn ws_sync_upgrade(
	ws: WebSocketUpgrade,
	AxumQuery(query): AxumQuery<ConnectQuery>,
	State(app): State<App>,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_sync_connection(socket, query.token, app))
}

/// Build the sync router: `GET /ws/sync?token=...` upgrades to the sync
/// protocol.
pub fn router(app: App) -> Router {
	Router::new().route("/ws/sync", any(ws_sync_upgrade)).with_state(app)
}

// vim: ts=4
