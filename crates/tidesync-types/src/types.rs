//! Core protocol and data-model types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::patch::PatchOp;
use crate::query::Query;
use crate::range::KeyRange;

/// Client connection lifecycle state. One instance per session, mutated
/// only by transport-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connected,
	Reconnecting,
}

/// One unit of the subscription stream protocol.
///
/// Wire shapes: `{key?, value?}`, `{key, action: "put", value}`,
/// `{key, action: "del"}`, `{done: 1}`, `{error}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeFrame {
	/// Initial-value delivery; `key` and `value` presence follow the
	/// subscription's `keys`/`values` flags.
	Value { key: Option<Box<str>>, value: Option<Value> },
	/// A live put; always carries the new value.
	Put { key: Box<str>, value: Value },
	/// A live delete; never carries a value.
	Delete { key: Box<str> },
	/// Terminates a one-shot bucket scan. Live subscriptions never emit
	/// this unless explicitly cancelled.
	Done,
	Error { message: String },
}

impl ChangeFrame {
	/// Serialize to the wire payload shape.
	pub fn to_value(&self) -> Value {
		match self {
			ChangeFrame::Value { key, value } => {
				let mut map = Map::new();
				if let Some(key) = key {
					map.insert("key".into(), Value::String(key.to_string()));
				}
				if let Some(value) = value {
					map.insert("value".into(), value.clone());
				}
				Value::Object(map)
			}
			ChangeFrame::Put { key, value } => {
				json!({ "key": key.as_ref(), "action": "put", "value": value })
			}
			ChangeFrame::Delete { key } => json!({ "key": key.as_ref(), "action": "del" }),
			ChangeFrame::Done => json!({ "done": 1 }),
			ChangeFrame::Error { message } => json!({ "error": message }),
		}
	}

	/// Parse a frame from its wire payload shape.
	pub fn from_value(value: &Value) -> Option<Self> {
		let obj = value.as_object()?;
		if obj.get("done").is_some() {
			return Some(ChangeFrame::Done);
		}
		if let Some(error) = obj.get("error").and_then(Value::as_str) {
			return Some(ChangeFrame::Error { message: error.to_string() });
		}
		let key = obj.get("key").and_then(Value::as_str);
		match obj.get("action").and_then(Value::as_str) {
			Some("put") => Some(ChangeFrame::Put {
				key: key?.into(),
				value: obj.get("value").cloned().unwrap_or(Value::Null),
			}),
			Some("del") => Some(ChangeFrame::Delete { key: key?.into() }),
			Some(_) => None,
			None => Some(ChangeFrame::Value {
				key: key.map(Into::into),
				value: obj.get("value").cloned(),
			}),
		}
	}

	/// The changed key, when the frame carries one.
	pub fn key(&self) -> Option<&str> {
		match self {
			ChangeFrame::Value { key, .. } => key.as_deref(),
			ChangeFrame::Put { key, .. } | ChangeFrame::Delete { key } => Some(key),
			ChangeFrame::Done | ChangeFrame::Error { .. } => None,
		}
	}

	pub fn is_done(&self) -> bool {
		matches!(self, ChangeFrame::Done)
	}
}

fn default_limit() -> i64 {
	-1
}

fn default_true() -> bool {
	true
}

/// Parameters of a `subscribe`/`subscribeBucket` request.
///
/// `key == None` means whole-bucket subscription. The range bounds are
/// immutable for the life of the subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
	pub bucket: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,

	/// Maximum entries delivered by the initial scan; `-1` is unlimited.
	#[serde(default = "default_limit")]
	pub limit: i64,

	#[serde(flatten)]
	pub range: KeyRange,

	#[serde(default)]
	pub reverse: bool,

	#[serde(default = "default_true")]
	pub keys: bool,

	#[serde(default = "default_true")]
	pub values: bool,

	#[serde(default = "default_true")]
	pub initial_value: bool,

	#[serde(default)]
	pub once: bool,

	#[serde(default)]
	pub enable_offline: bool,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub query: Option<Query>,
}

impl SubscribeParams {
	/// Whole-bucket subscription with default flags.
	pub fn bucket(bucket: impl Into<String>) -> Self {
		Self {
			bucket: bucket.into(),
			key: None,
			limit: -1,
			range: KeyRange::new(),
			reverse: false,
			keys: true,
			values: true,
			initial_value: true,
			once: false,
			enable_offline: false,
			query: None,
		}
	}

	/// Single-key subscription with default flags.
	pub fn key(bucket: impl Into<String>, key: impl Into<String>) -> Self {
		Self { key: Some(key.into()), ..Self::bucket(bucket) }
	}

	pub fn with_range(mut self, range: KeyRange) -> Self {
		self.range = range;
		self
	}

	pub fn with_limit(mut self, limit: i64) -> Self {
		self.limit = limit;
		self
	}

	pub fn with_query(mut self, query: Query) -> Self {
		self.query = Some(query);
		self
	}

	pub fn with_initial_value(mut self, initial_value: bool) -> Self {
		self.initial_value = initial_value;
		self
	}

	pub fn once(mut self) -> Self {
		self.once = true;
		self
	}

	pub fn is_whole_bucket(&self) -> bool {
		self.key.is_none()
	}
}

/// Strictly increasing op-log entry id, derived from wall-clock
/// microseconds plus a sub-millisecond counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpId(pub u64);

/// A mutation to apply, dispatched by explicit variant during replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OpAction {
	Put { bucket: String, key: String, value: Value },
	Patch { bucket: String, key: String, ops: Vec<PatchOp> },
	#[serde(rename = "del")]
	Delete { bucket: String, key: String },
}

impl OpAction {
	pub fn bucket(&self) -> &str {
		match self {
			OpAction::Put { bucket, .. }
			| OpAction::Patch { bucket, .. }
			| OpAction::Delete { bucket, .. } => bucket,
		}
	}

	pub fn key(&self) -> &str {
		match self {
			OpAction::Put { key, .. }
			| OpAction::Patch { key, .. }
			| OpAction::Delete { key, .. } => key,
		}
	}
}

/// One queued offline mutation. Created for every write issued while
/// disconnected; removed only after a successful replay acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpLogEntry {
	pub id: OpId,

	#[serde(flatten)]
	pub op: OpAction,
}


// vim: ts=4
