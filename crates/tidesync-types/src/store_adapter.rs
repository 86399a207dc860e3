//! Ordered Key-Value Store Adapter
//!
//! Trait and types for pluggable storage backends holding named, ordered
//! buckets of JSON values. The sync engine consumes this interface for
//! reads, writes, bounded range scans, and change notifications; each
//! adapter implementation provides its own constructor handling
//! backend-specific initialization.

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::Value;
use std::fmt::Debug;
use std::pin::Pin;
use tokio::sync::broadcast;

use crate::prelude::*;
use crate::range::KeyRange;

/// One bucket entry yielded by a range scan.
pub type ScanItem = TsResult<(Box<str>, Value)>;

/// Boxed entry stream returned by [`StoreAdapter::iterate`].
pub type ScanStream = Pin<Box<dyn Stream<Item = ScanItem> + Send>>;

/// Change notification emitted by a bucket. Puts carry the new value,
/// deletes only the key.
#[derive(Debug, Clone)]
pub enum ChangeNotice {
	Put { key: Box<str>, value: Value },
	Delete { key: Box<str> },
}

impl ChangeNotice {
	pub fn key(&self) -> &str {
		match self {
			ChangeNotice::Put { key, .. } | ChangeNotice::Delete { key } => key,
		}
	}
}

/// Options for a bounded range scan over a bucket.
#[derive(Debug, Clone, Default)]
pub struct IterateOptions {
	/// Key bounds; unbounded scans the whole bucket.
	pub range: KeyRange,

	/// Iterate in descending key order.
	pub reverse: bool,

	/// Maximum number of entries to yield; `None` is unlimited.
	pub limit: Option<u64>,
}

impl IterateOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_range(mut self, range: KeyRange) -> Self {
		self.range = range;
		self
	}

	pub fn with_reverse(mut self, reverse: bool) -> Self {
		self.reverse = reverse;
		self
	}

	pub fn with_limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);
		self
	}
}

/// Ordered key-value storage engine interface.
///
/// Buckets are independent, lexicographically ordered collections. Change
/// notifications for one bucket are serialized through a single broadcast
/// channel, so listeners observe each change exactly once and in order.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	/// Store a value under `bucket`/`key`, then notify watchers.
	async fn put(&self, bucket: &str, key: &str, value: Value) -> TsResult<()>;

	/// Fetch a value. Returns `None` if the key is absent.
	async fn get(&self, bucket: &str, key: &str) -> TsResult<Option<Value>>;

	/// Delete a key, then notify watchers. Deleting an absent key is a
	/// no-op.
	async fn delete(&self, bucket: &str, key: &str) -> TsResult<()>;

	/// Drop an entire bucket and all of its entries.
	async fn drop_bucket(&self, bucket: &str) -> TsResult<()>;

	/// Range-scan a bucket in key order, honoring bounds, direction, and
	/// limit. The stream reflects a snapshot taken at call time.
	async fn iterate(&self, bucket: &str, opts: IterateOptions) -> TsResult<ScanStream>;

	/// Subscribe to the bucket's change notifications.
	async fn watch(&self, bucket: &str) -> TsResult<broadcast::Receiver<ChangeNotice>>;

	/// Close the store, flushing pending changes.
	async fn close(&self) -> TsResult<()>;
}

// vim: ts=4
