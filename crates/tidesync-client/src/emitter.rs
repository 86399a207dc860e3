//! Offline Change Bus
//!
//! In-process pub/sub for writes applied while disconnected. Writers emit
//! the locally computed effect of a queued mutation; subscriptions listen
//! so offline observers see changes immediately, without a server round
//! trip.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{RwLock, broadcast};

use crate::prelude::*;

const CHANNEL_BUFFER: usize = 128;

/// The locally computed effect of one offline write.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
	Put { key: Box<str>, value: Value },
	/// A patch result; `value` is the patched document, not the ops.
	Patch { key: Box<str>, value: Value },
	Delete { key: Box<str> },
}

impl LocalChange {
	pub fn key(&self) -> &str {
		match self {
			LocalChange::Put { key, .. }
			| LocalChange::Patch { key, .. }
			| LocalChange::Delete { key } => key,
		}
	}

	/// The new value, when the change carries one.
	pub fn value(&self) -> Option<&Value> {
		match self {
			LocalChange::Put { value, .. } | LocalChange::Patch { value, .. } => Some(value),
			LocalChange::Delete { .. } => None,
		}
	}
}

/// Event bus keyed by `bucket/key`, with a bucket-wide channel per bucket
/// so whole-bucket subscriptions observe every key.
#[derive(Debug, Default)]
pub struct OfflineEmitter {
	channels: RwLock<HashMap<Box<str>, broadcast::Sender<LocalChange>>>,
}

impl OfflineEmitter {
	pub fn new() -> Self {
		Self::default()
	}

	fn event_name(bucket: &str, key: &str) -> String {
		format!("{}/{}", bucket, key)
	}

	async fn channel(&self, name: &str) -> broadcast::Sender<LocalChange> {
		let mut channels = self.channels.write().await;
		channels
			.entry(name.into())
			.or_insert_with(|| broadcast::channel(CHANNEL_BUFFER).0)
			.clone()
	}

	/// Listen for offline changes to one key.
	pub async fn on_key(&self, bucket: &str, key: &str) -> broadcast::Receiver<LocalChange> {
		self.channel(&Self::event_name(bucket, key)).await.subscribe()
	}

	/// Listen for offline changes anywhere in a bucket.
	pub async fn on_bucket(&self, bucket: &str) -> broadcast::Receiver<LocalChange> {
		self.channel(bucket).await.subscribe()
	}

	/// Publish an offline change on the key channel and the bucket channel.
	pub async fn emit(&self, bucket: &str, change: LocalChange) {
		let channels = self.channels.read().await;
		let key_name = Self::event_name(bucket, change.key());
		// A send error just means nobody is listening
		if let Some(sender) = channels.get(key_name.as_str()) {
			sender.send(change.clone()).ok();
		}
		if let Some(sender) = channels.get(bucket) {
			sender.send(change).ok();
		}
	}
}


// vim: ts=4
