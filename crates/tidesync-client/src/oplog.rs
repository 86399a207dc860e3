//! Offline op-log.
//!
//! Wraps an `OpLogStore` with strictly increasing id allocation. Ids are
//! wall-clock microseconds bumped past the previous id, so rapid writes
//! within one microsecond still order correctly and replay walks entries
//! in the order they were issued.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tidesync_types::local_store::OpLogStore;
use tidesync_types::types::{OpAction, OpId, OpLogEntry};
use tidesync_types::utils::now_micros;

use crate::prelude::*;

#[derive(Debug)]
pub struct OpLog {
	store: Arc<dyn OpLogStore>,
	last_id: AtomicU64,
}

impl OpLog {
	pub fn new(store: Arc<dyn OpLogStore>) -> Self {
		Self { store, last_id: AtomicU64::new(0) }
	}

	/// Allocate the next entry id: wall-clock micros, forced past the
	/// previous id when the clock has not advanced.
	fn next_id(&self) -> OpId {
		let now = now_micros();
		let id = self
			.last_id
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
				Some(now.max(prev + 1))
			})
			.map(|prev| now.max(prev + 1))
			.unwrap_or(now);
		OpId(id)
	}

	/// Queue a mutation for replay on the next connect.
	pub async fn append(&self, op: OpAction) -> TsResult<OpLogEntry> {
		let entry = OpLogEntry { id: self.next_id(), op };
		debug!("Op-log append: id={} {}/{}", entry.id.0, entry.op.bucket(), entry.op.key());
		self.store.append(entry.clone()).await?;
		Ok(entry)
	}

	/// Snapshot of queued entries, ascending by id.
	pub async fn entries(&self) -> TsResult<Vec<OpLogEntry>> {
		self.store.entries().await
	}

	/// Drop a replayed entry.
	pub async fn remove(&self, id: OpId) -> TsResult<()> {
		self.store.remove(id).await
	}

	pub async fn close(&self) -> TsResult<()> {
		self.store.close().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::local_store::MemoryOpLog;
	use serde_json::json;

	fn put(key: &str) -> OpAction {
		OpAction::Put { bucket: "users".into(), key: key.into(), value: json!(1) }
	}

	#[tokio::test]
	async fn test_ids_strictly_increase_under_rapid_appends() {
		let log = OpLog::new(Arc::new(MemoryOpLog::new()));
		let mut last = 0;
		for i in 0..100 {
			let entry = log.append(put(&i.to_string())).await.ok();
			let id = entry.map(|e| e.id.0).unwrap_or_default();
			assert!(id > last);
			last = id;
		}
	}

	#[tokio::test]
	async fn test_entries_replay_in_append_order() {
		let log = OpLog::new(Arc::new(MemoryOpLog::new()));
		log.append(put("a")).await.ok();
		log.append(put("b")).await.ok();
		let keys: Vec<String> = log
			.entries()
			.await
			.unwrap_or_default()
			.iter()
			.map(|e| e.op.key().to_string())
			.collect();
		assert_eq!(keys, ["a", "b"]);
	}

	#[tokio::test]
	async fn test_removed_entry_stays_removed() {
		let log = OpLog::new(Arc::new(MemoryOpLog::new()));
		let entry = log.append(put("a")).await.ok();
		if let Some(entry) = entry {
			log.remove(entry.id).await.ok();
			log.remove(entry.id).await.ok();
		}
		assert!(log.entries().await.unwrap_or_default().is_empty());
	}
}

// vim: ts=4
