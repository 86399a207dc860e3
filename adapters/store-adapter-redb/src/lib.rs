#![forbid(unsafe_code)]

//! redb-based implementation of `StoreAdapter`.
//!
//! One database file per adapter. All buckets share a single entries table
//! with `bucket/key` composite keys, which keeps bucket prefix scans a
//! plain key range over redb's B-tree. Values are stored as JSON text.
//! Change notifications fan out through one broadcast channel per bucket,
//! created lazily on first watch or write.

mod error;

use async_trait::async_trait;
use redb::{ReadableDatabase, ReadableTable};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use tidesync::prelude::*;
use tidesync::store_adapter::{
	ChangeNotice, IterateOptions, ScanStream, StoreAdapter,
};

/// Entry storage table; keys are `bucket/key`, values JSON text.
const TABLE_ENTRIES: redb::TableDefinition<&str, &str> = redb::TableDefinition::new("entries");

/// Broadcast channel capacity per bucket.
const BROADCAST_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct StoreAdapterRedb {
	db: Arc<redb::Database>,
	channels: RwLock<HashMap<Box<str>, broadcast::Sender<ChangeNotice>>>,
}

impl StoreAdapterRedb {
	/// Open (or create) the database file and ensure the entries table
	/// exists.
	pub fn new(path: impl AsRef<Path>) -> TsResult<Self> {
		let db = redb::Database::create(path.as_ref()).map_err(error::from_redb_error)?;
		let tx = db.begin_write().map_err(error::from_redb_error)?;
		tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
		tx.commit().map_err(error::from_redb_error)?;
		debug!("Opened store: {}", path.as_ref().display());
		Ok(Self { db: Arc::new(db), channels: RwLock::new(HashMap::new()) })
	}

	fn composite_key(bucket: &str, key: &str) -> String {
		format!("{}/{}", bucket, key)
	}

	/// Prefix bounds covering every key of one bucket. `'0'` is the first
	/// character after `'/'`, so `bucket/` .. `bucket0` spans the prefix.
	fn bucket_bounds(bucket: &str) -> (String, String) {
		(format!("{}/", bucket), format!("{}0", bucket))
	}

	async fn notify(&self, bucket: &str, notice: ChangeNotice) {
		let channels = self.channels.read().await;
		if let Some(sender) = channels.get(bucket) {
			// No receivers is fine
			sender.send(notice).ok();
		}
	}

	/// Snapshot a bucket honoring range, direction, and limit.
	fn scan_bucket(
		db: &redb::Database,
		bucket: &str,
		opts: &IterateOptions,
	) -> TsResult<Vec<(Box<str>, Value)>> {
		let tx = db.begin_read().map_err(error::from_redb_error)?;
		let table = tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
		let (start, end) = Self::bucket_bounds(bucket);
		let prefix_len = start.len();

		let mut entries: Vec<(Box<str>, Value)> = Vec::new();
		let range =
			table.range(start.as_str()..end.as_str()).map_err(error::from_redb_error)?;
		for item in range {
			let (full_key, raw) = item.map_err(error::from_redb_error)?;
			let key = &full_key.value()[prefix_len..];
			if !opts.range.contains(key) {
				continue;
			}
			let value: Value = serde_json::from_str(raw.value())?;
			entries.push((key.into(), value));
		}
		if opts.reverse {
			entries.reverse();
		}
		if let Some(limit) = opts.limit {
			entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
		}
		Ok(entries)
	}
}

#[async_trait]
impl StoreAdapter for StoreAdapterRedb {
	async fn put(&self, bucket: &str, key: &str, value: Value) -> TsResult<()> {
		let db = self.db.clone();
		let composite = Self::composite_key(bucket, key);
		let json = serde_json::to_string(&value)?;
		tokio::task::spawn_blocking(move || {
			let tx = db.begin_write().map_err(error::from_redb_error)?;
			{
				let mut table = tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
				table
					.insert(composite.as_str(), json.as_str())
					.map_err(error::from_redb_error)?;
			}
			tx.commit().map_err(error::from_redb_error)
		})
		.await
		.map_err(error::from_join_error)??;

		self.notify(bucket, ChangeNotice::Put { key: key.into(), value }).await;
		Ok(())
	}

	async fn get(&self, bucket: &str, key: &str) -> TsResult<Option<Value>> {
		let db = self.db.clone();
		let composite = Self::composite_key(bucket, key);
		tokio::task::spawn_blocking(move || {
			let tx = db.begin_read().map_err(error::from_redb_error)?;
			let table = tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
			match table.get(composite.as_str()).map_err(error::from_redb_error)? {
				Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
				None => Ok(None),
			}
		})
		.await
		.map_err(error::from_join_error)?
	}

	async fn delete(&self, bucket: &str, key: &str) -> TsResult<()> {
		let db = self.db.clone();
		let composite = Self::composite_key(bucket, key);
		let existed = tokio::task::spawn_blocking(move || {
			let tx = db.begin_write().map_err(error::from_redb_error)?;
			let existed = {
				let mut table = tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
				table.remove(composite.as_str()).map_err(error::from_redb_error)?.is_some()
			};
			tx.commit().map_err(error::from_redb_error)?;
			Ok::<bool, Error>(existed)
		})
		.await
		.map_err(error::from_join_error)??;

		// Deleting an absent key is a no-op, watchers are not notified
		if existed {
			self.notify(bucket, ChangeNotice::Delete { key: key.into() }).await;
		}
		Ok(())
	}

	async fn drop_bucket(&self, bucket: &str) -> TsResult<()> {
		let db = self.db.clone();
		let (start, end) = Self::bucket_bounds(bucket);
		let prefix_len = start.len();
		let removed: Vec<Box<str>> = tokio::task::spawn_blocking(move || {
			let tx = db.begin_write().map_err(error::from_redb_error)?;
			let removed = {
				let mut table = tx.open_table(TABLE_ENTRIES).map_err(error::from_redb_error)?;
				let keys: Vec<String> = table
					.range(start.as_str()..end.as_str())
					.map_err(error::from_redb_error)?
					.map(|item| item.map(|(k, _)| k.value().to_string()))
					.collect::<Result<_, _>>()
					.map_err(error::from_redb_error)?;
				for key in &keys {
					table.remove(key.as_str()).map_err(error::from_redb_error)?;
				}
				keys.into_iter().map(|k| Box::<str>::from(&k[prefix_len..])).collect()
			};
			tx.commit().map_err(error::from_redb_error)?;
			Ok::<Vec<Box<str>>, Error>(removed)
		})
		.await
		.map_err(error::from_join_error)??;

		debug!("Dropped bucket {} ({} entries)", bucket, removed.len());
		for key in removed {
			self.notify(bucket, ChangeNotice::Delete { key }).await;
		}
		Ok(())
	}

	async fn iterate(&self, bucket: &str, opts: IterateOptions) -> TsResult<ScanStream> {
		let db = self.db.clone();
		let bucket = bucket.to_string();
		let entries = tokio::task::spawn_blocking(move || {
			Self::scan_bucket(&db, &bucket, &opts)
		})
		.await
		.map_err(error::from_join_error)??;

		let stream = async_stream::stream! {
			for entry in entries {
				yield Ok(entry);
			}
		};
		Ok(Box::pin(stream))
	}

	async fn watch(&self, bucket: &str) -> TsResult<broadcast::Receiver<ChangeNotice>> {
		let mut channels = self.channels.write().await;
		let sender = channels
			.entry(bucket.into())
			.or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0);
		Ok(sender.subscribe())
	}

	async fn close(&self) -> TsResult<()> {
		// redb commits synchronously; nothing buffered to flush
		Ok(())
	}
}

// vim: ts=4
