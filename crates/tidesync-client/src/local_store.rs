//! In-memory local stores.
//!
//! Default `LocalStore` and `OpLogStore` implementations backed by
//! `BTreeMap`s, ordered the same way the server's buckets are. Embedders
//! with durable on-device storage implement the traits themselves.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use tidesync_types::local_store::{LocalStore, OpLogStore};
use tidesync_types::types::{OpId, OpLogEntry};

use crate::prelude::*;

/// Map-backed value cache. Buckets are created lazily on first put.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
	buckets: RwLock<HashMap<Box<str>, BTreeMap<Box<str>, Value>>>,
}

impl MemoryLocalStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
	async fn get(&self, bucket: &str, key: &str) -> TsResult<Option<Value>> {
		let buckets = self.buckets.read().await;
		Ok(buckets.get(bucket).and_then(|b| b.get(key)).cloned())
	}

	async fn put(&self, bucket: &str, key: &str, value: Value) -> TsResult<()> {
		let mut buckets = self.buckets.write().await;
		buckets.entry(bucket.into()).or_default().insert(key.into(), value);
		Ok(())
	}

	async fn remove(&self, bucket: &str, key: &str) -> TsResult<()> {
		let mut buckets = self.buckets.write().await;
		if let Some(entries) = buckets.get_mut(bucket) {
			entries.remove(key);
		}
		Ok(())
	}

	async fn entries(&self, bucket: &str) -> TsResult<Vec<(Box<str>, Value)>> {
		let buckets = self.buckets.read().await;
		Ok(buckets
			.get(bucket)
			.map(|b| b.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
			.unwrap_or_default())
	}

	async fn close(&self) -> TsResult<()> {
		Ok(())
	}
}

/// Map-backed op-log, ordered by entry id.
#[derive(Debug, Default)]
pub struct MemoryOpLog {
	entries: RwLock<BTreeMap<OpId, OpLogEntry>>,
}

impl MemoryOpLog {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl OpLogStore for MemoryOpLog {
	async fn append(&self, entry: OpLogEntry) -> TsResult<()> {
		let mut entries = self.entries.write().await;
		entries.insert(entry.id, entry);
		Ok(())
	}

	async fn entries(&self) -> TsResult<Vec<OpLogEntry>> {
		let entries = self.entries.read().await;
		Ok(entries.values().cloned().collect())
	}

	async fn remove(&self, id: OpId) -> TsResult<()> {
		let mut entries = self.entries.write().await;
		entries.remove(&id);
		Ok(())
	}

	async fn close(&self) -> TsResult<()> {
		Ok(())
	}
}


// vim: ts=4
