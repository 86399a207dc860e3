//! Wire protocol envelope.
//!
//! Every message on the persistent connection is one JSON text frame:
//!
//! ```json
//! {
//!   "id": "msg-123",
//!   "type": "subscribe|subscribeBucket|put|patch|delete|get|unsubscribe|ping",
//!   ...payload fields...
//! }
//! ```
//!
//! Requests are acknowledged with a `type: "ack"` message carrying the same
//! `id`; subscription traffic arrives as `type: "frame"` messages tagged
//! with the server-assigned `subscriptionId`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ChangeFrame;
use crate::utils::random_id;

/// A message in the sync protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
	/// Unique message id, echoed back on the acknowledgement.
	pub id: Value,

	/// Message type (subscribe, put, ack, frame, ...)
	#[serde(rename = "type")]
	pub msg_type: String,

	/// All other fields flattened into this map.
	#[serde(flatten)]
	pub payload: Map<String, Value>,
}

impl SyncMessage {
	/// Create a new request message with a fresh id.
	pub fn new(msg_type: impl Into<String>, payload: Value) -> Self {
		let mut map = Map::new();
		if let Value::Object(obj) = payload {
			map = obj;
		}
		Self { id: Value::String(random_id()), msg_type: msg_type.into(), payload: map }
	}

	/// Create an acknowledgement for a request, with explicit payload fields.
	pub fn ack(id: Value, fields: Map<String, Value>) -> Self {
		Self { id, msg_type: "ack".to_string(), payload: fields }
	}

	/// Create an empty-payload acknowledgement (`{}` success ack).
	pub fn ack_empty(id: Value) -> Self {
		Self::ack(id, Map::new())
	}

	/// Create an error acknowledgement: `{error: message}`.
	pub fn ack_error(id: Value, message: impl Into<String>) -> Self {
		let mut map = Map::new();
		map.insert("error".to_string(), Value::String(message.into()));
		Self::ack(id, map)
	}

	/// Create a response message with explicit type and fields.
	pub fn response(id: Value, msg_type: impl Into<String>, fields: Map<String, Value>) -> Self {
		Self { id, msg_type: msg_type.into(), payload: fields }
	}

	/// Create a stream frame message for a subscription.
	pub fn frame(subscription_id: &str, frame: &ChangeFrame) -> Self {
		let mut map = Map::new();
		map.insert("subscriptionId".to_string(), Value::String(subscription_id.to_string()));
		if let Value::Object(fields) = frame.to_value() {
			map.extend(fields);
		}
		Self {
			id: Value::String(format!("frame-{}", random_id())),
			msg_type: "frame".to_string(),
			payload: map,
		}
	}

	/// The subscription id carried by a frame message.
	pub fn subscription_id(&self) -> Option<&str> {
		self.payload.get("subscriptionId").and_then(Value::as_str)
	}

	/// Parse the payload as a change frame (for `type: "frame"` messages).
	pub fn change_frame(&self) -> Option<ChangeFrame> {
		let mut fields = self.payload.clone();
		fields.remove("subscriptionId");
		ChangeFrame::from_value(&Value::Object(fields))
	}

	/// The `error` payload field of an acknowledgement, if present.
	pub fn error(&self) -> Option<&str> {
		self.payload.get("error").and_then(Value::as_str)
	}

	pub fn is_ack(&self) -> bool {
		self.msg_type == "ack"
	}

	pub fn is_frame(&self) -> bool {
		self.msg_type == "frame"
	}

	/// Serialize to a JSON text frame.
	pub fn to_text(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	/// Parse from a JSON text frame.
	pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(text)
	}
}


// vim: ts=4
