//! Client-Side Persistence Adapters
//!
//! Traits for the on-device stores a client session is constructed with:
//! a per-bucket cache of last-known values and the pending op-log. Both
//! have an explicit lifecycle — opened before the session starts, closed
//! at session teardown — instead of being process-global singletons.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::prelude::*;
use crate::types::{OpId, OpLogEntry};

/// Local cache of last confirmed or offline-applied values, keyed by
/// bucket and key. Serves offline reads and patch bases.
#[async_trait]
pub trait LocalStore: Debug + Send + Sync {
	/// Fetch the cached value. Returns `None` if nothing is cached.
	async fn get(&self, bucket: &str, key: &str) -> TsResult<Option<Value>>;

	/// Mirror a value into the cache.
	async fn put(&self, bucket: &str, key: &str, value: Value) -> TsResult<()>;

	/// Remove a cached entry (delete tombstone).
	async fn remove(&self, bucket: &str, key: &str) -> TsResult<()>;

	/// All cached entries of a bucket in ascending key order.
	async fn entries(&self, bucket: &str) -> TsResult<Vec<(Box<str>, Value)>>;

	/// Close the store, flushing pending changes.
	async fn close(&self) -> TsResult<()>;
}

/// Durable queue of mutations issued while disconnected.
///
/// Must tolerate appends arriving concurrently with an `entries` snapshot
/// being replayed; entries appended mid-flush land in the next snapshot.
#[async_trait]
pub trait OpLogStore: Debug + Send + Sync {
	/// Append a queued mutation.
	async fn append(&self, entry: OpLogEntry) -> TsResult<()>;

	/// Snapshot of all queued entries in ascending id order.
	async fn entries(&self) -> TsResult<Vec<OpLogEntry>>;

	/// Remove an entry after its replay was acknowledged. Removing an
	/// already-removed id is a no-op.
	async fn remove(&self, id: OpId) -> TsResult<()>;

	/// Close the store, flushing pending changes.
	async fn close(&self) -> TsResult<()>;
}

// vim: ts=4
