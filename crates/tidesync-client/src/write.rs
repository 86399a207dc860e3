//! Write path coordinator.
//!
//! `put`/`patch`/`delete`/`get` on the session. While disconnected, writes
//! are appended to the op-log, their locally computed effect is published
//! on the offline bus, and the call resolves as soon as the entry is
//! durably queued. Online, writes round-trip to the server and every
//! confirmed mutation is mirrored into the local cache when offline caching
//! is on.
//!
//! Replay uses the same online path (`perform_online`), so a replayed entry
//! never re-enters the op-log.

use serde_json::{Map, Value, json};

use tidesync_types::message::SyncMessage;
use tidesync_types::patch::{PatchOp, apply_patch};
use tidesync_types::query::{Query, project};
use tidesync_types::types::OpAction;

use crate::emitter::LocalChange;
use crate::prelude::*;
use crate::session::SocketSession;

impl SocketSession {
	/// Store a value. Disconnected sessions queue the write for replay.
	pub async fn put(&self, bucket: &str, key: &str, value: Value) -> TsResult<()> {
		if !self.is_connected().await {
			let op = OpAction::Put {
				bucket: bucket.to_string(),
				key: key.to_string(),
				value: value.clone(),
			};
			self.oplog.append(op).await?;
			self.emitter
				.emit(bucket, LocalChange::Put { key: key.into(), value: value.clone() })
				.await;
			if self.config.enable_offline {
				self.local.put(bucket, key, value).await?;
			}
			return Ok(());
		}
		self.perform_online(&OpAction::Put {
			bucket: bucket.to_string(),
			key: key.to_string(),
			value,
		})
		.await
	}

	/// Patch a value with RFC-6902-style ops. The offline branch applies
	/// the ops to the cached value; a missing cache entry fails the call.
	pub async fn patch(&self, bucket: &str, key: &str, ops: Vec<PatchOp>) -> TsResult<()> {
		if !self.is_connected().await {
			let mut current = self.local.get(bucket, key).await?.ok_or(Error::NotFound)?;
			apply_patch(&mut current, &ops)?;
			let op = OpAction::Patch {
				bucket: bucket.to_string(),
				key: key.to_string(),
				ops: ops.clone(),
			};
			self.oplog.append(op).await?;
			self.emitter
				.emit(bucket, LocalChange::Patch { key: key.into(), value: current.clone() })
				.await;
			if self.config.enable_offline {
				self.local.put(bucket, key, current).await?;
			}
			return Ok(());
		}
		self.perform_online(&OpAction::Patch {
			bucket: bucket.to_string(),
			key: key.to_string(),
			ops,
		})
		.await
	}

	/// Delete a key. Disconnected sessions queue the delete for replay.
	pub async fn delete(&self, bucket: &str, key: &str) -> TsResult<()> {
		if !self.is_connected().await {
			let op = OpAction::Delete { bucket: bucket.to_string(), key: key.to_string() };
			self.oplog.append(op).await?;
			self.emitter.emit(bucket, LocalChange::Delete { key: key.into() }).await;
			if self.config.enable_offline {
				self.local.remove(bucket, key).await?;
			}
			return Ok(());
		}
		self.perform_online(&OpAction::Delete {
			bucket: bucket.to_string(),
			key: key.to_string(),
		})
		.await
	}

	/// Fetch a value once. Offline sessions serve the local cache and
	/// project client-side; online offline-caching sessions request the raw
	/// value, mirror it, and project client-side too.
	pub async fn get(&self, bucket: &str, key: &str, query: Option<&Query>) -> TsResult<Value> {
		if !self.is_connected().await {
			if self.config.enable_offline {
				let value = self.local.get(bucket, key).await?.ok_or(Error::NotFound)?;
				return Ok(project(query, &value));
			}
			return Err(Error::Closed);
		}

		let mut payload = Map::new();
		payload.insert("bucket".to_string(), Value::String(bucket.to_string()));
		payload.insert("key".to_string(), Value::String(key.to_string()));
		if self.config.enable_offline {
			// The server skips projection; we cache raw and project here
			payload.insert("_offlineRaw".to_string(), Value::Bool(true));
		} else if let Some(query) = query {
			payload.insert("query".to_string(), serde_json::to_value(query)?);
		}
		let msg = SyncMessage::new("get", Value::Object(payload));
		let ack = self.await_ack(&msg).await?;
		let value = ack.payload.get("value").cloned().unwrap_or(Value::Null);

		if self.config.enable_offline {
			if !value.is_null() {
				self.local.put(bucket, key, value.clone()).await?;
			}
			return Ok(project(query, &value));
		}
		Ok(value)
	}

	/// Send one mutation to the server and mirror the confirmed result
	/// into the local cache. Shared by the online write path and op-log
	/// replay.
	pub(crate) async fn perform_online(&self, op: &OpAction) -> TsResult<()> {
		let msg = match op {
			OpAction::Put { bucket, key, value } => {
				SyncMessage::new("put", json!({ "bucket": bucket, "key": key, "value": value }))
			}
			OpAction::Patch { bucket, key, ops } => SyncMessage::new(
				"patch",
				json!({ "bucket": bucket, "key": key, "ops": serde_json::to_value(ops)? }),
			),
			OpAction::Delete { bucket, key } => {
				SyncMessage::new("delete", json!({ "bucket": bucket, "key": key }))
			}
		};
		self.await_ack(&msg).await?;

		if self.config.enable_offline {
			self.mirror_confirmed(op).await;
		}
		Ok(())
	}

	/// Mirror a server-confirmed mutation into the local cache. Failures
	/// are logged; the write itself already succeeded.
	async fn mirror_confirmed(&self, op: &OpAction) {
		let result = match op {
			OpAction::Put { bucket, key, value } => {
				self.local.put(bucket, key, value.clone()).await
			}
			OpAction::Patch { bucket, key, ops } => {
				// Re-apply against the cached base; an uncached key has
				// nothing to mirror until the next snapshot
				match self.local.get(bucket, key).await {
					Ok(Some(mut doc)) => match apply_patch(&mut doc, ops) {
						Ok(()) => self.local.put(bucket, key, doc).await,
						Err(err) => {
							debug!("Skipping patch mirror for {}/{}: {}", bucket, key, err);
							Ok(())
						}
					},
					Ok(None) => Ok(()),
					Err(err) => Err(err),
				}
			}
			OpAction::Delete { bucket, key } => self.local.remove(bucket, key).await,
		};
		if let Err(err) = result {
			warn!("Local mirror failed for {}/{}: {}", op.bucket(), op.key(), err);
		}
	}
}

// vim: ts=4
