//! JSON patch application primitive.
//!
//! Applies RFC-6902-style operations (`add`, `replace`, `remove`, `test`)
//! to a JSON document as a pure function. The server runs it against its
//! own stored copy for online patches; the client runs the identical code
//! against the locally cached value for offline patches. The two sites are
//! deliberately distinct and only converge on the next reconnect snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::prelude::*;

/// A single patch operation with a `/`-separated JSON-pointer path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
	Add { path: String, value: Value },
	Replace { path: String, value: Value },
	Remove { path: String },
	Test { path: String, value: Value },
}

impl PatchOp {
	pub fn path(&self) -> &str {
		match self {
			PatchOp::Add { path, .. }
			| PatchOp::Replace { path, .. }
			| PatchOp::Remove { path }
			| PatchOp::Test { path, .. } => path,
		}
	}
}

/// Apply a sequence of patch operations to `doc` in order.
///
/// The target document must be a JSON object; anything else is a
/// `PatchTarget` error before any op is applied.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> TsResult<()> {
	if !doc.is_object() {
		return Err(Error::PatchTarget("cannot apply patch to non-object".into()));
	}

	for op in ops {
		apply_op(doc, op)?;
	}
	Ok(())
}

/// Apply one operation. Pure except for the in-place mutation of `doc`.
fn apply_op(doc: &mut Value, op: &PatchOp) -> TsResult<()> {
	let tokens = parse_pointer(op.path())?;
	let Some((last, parents)) = tokens.split_last() else {
		// Whole-document path ("" or "/")
		return match op {
			PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
				*doc = value.clone();
				Ok(())
			}
			PatchOp::Remove { .. } => {
				Err(Error::ValidationError("cannot remove the document root".into()))
			}
			PatchOp::Test { value, .. } => {
				if doc == value {
					Ok(())
				} else {
					Err(Error::ValidationError(format!("test failed at '{}'", op.path())))
				}
			}
		};
	};

	let parent = resolve(doc, parents, op.path())?;
	match op {
		PatchOp::Add { value, .. } => add_member(parent, last, value.clone(), op.path()),
		PatchOp::Replace { value, .. } => {
			let slot = member_mut(parent, last, op.path())?;
			*slot = value.clone();
			Ok(())
		}
		PatchOp::Remove { .. } => remove_member(parent, last, op.path()),
		PatchOp::Test { value, .. } => {
			let slot = member_mut(parent, last, op.path())?;
			if slot == value {
				Ok(())
			} else {
				Err(Error::ValidationError(format!("test failed at '{}'", op.path())))
			}
		}
	}
}

/// Split a JSON pointer into unescaped tokens.
fn parse_pointer(path: &str) -> TsResult<Vec<String>> {
	if path.is_empty() {
		return Ok(Vec::new());
	}
	if !path.starts_with('/') {
		return Err(Error::ValidationError(format!("invalid patch path '{}'", path)));
	}
	Ok(path[1..].split('/').map(|t| t.replace("~1", "/").replace("~0", "~")).collect())
}

/// Walk `doc` down to the parent of the addressed member.
fn resolve<'a>(doc: &'a mut Value, parents: &[String], path: &str) -> TsResult<&'a mut Value> {
	let mut current = doc;
	for token in parents {
		current = match current {
			Value::Object(map) => map
				.get_mut(token)
				.ok_or_else(|| Error::ValidationError(format!("path '{}' not found", path)))?,
			Value::Array(arr) => {
				let idx = parse_index(token, arr.len(), path)?;
				arr.get_mut(idx)
					.ok_or_else(|| Error::ValidationError(format!("path '{}' not found", path)))?
			}
			_ => {
				return Err(Error::PatchTarget(format!(
					"path '{}' traverses a non-container value",
					path
				)));
			}
		};
	}
	Ok(current)
}

fn parse_index(token: &str, len: usize, path: &str) -> TsResult<usize> {
	let idx: usize = token
		.parse()
		.map_err(|_| Error::ValidationError(format!("invalid array index in '{}'", path)))?;
	if idx >= len {
		return Err(Error::ValidationError(format!("array index out of bounds in '{}'", path)));
	}
	Ok(idx)
}

fn member_mut<'a>(parent: &'a mut Value, token: &str, path: &str) -> TsResult<&'a mut Value> {
	match parent {
		Value::Object(map) => map
			.get_mut(token)
			.ok_or_else(|| Error::ValidationError(format!("path '{}' not found", path))),
		Value::Array(arr) => {
			let idx = parse_index(token, arr.len(), path)?;
			arr.get_mut(idx)
				.ok_or_else(|| Error::ValidationError(format!("path '{}' not found", path)))
		}
		_ => Err(Error::PatchTarget(format!("path '{}' addresses into a non-container", path))),
	}
}

fn add_member(parent: &mut Value, token: &str, value: Value, path: &str) -> TsResult<()> {
	match parent {
		Value::Object(map) => {
			map.insert(token.to_string(), value);
			Ok(())
		}
		Value::Array(arr) => {
			if token == "-" {
				arr.push(value);
				return Ok(());
			}
			let idx: usize = token
				.parse()
				.map_err(|_| Error::ValidationError(format!("invalid array index in '{}'", path)))?;
			if idx > arr.len() {
				return Err(Error::ValidationError(format!(
					"array index out of bounds in '{}'",
					path
				)));
			}
			arr.insert(idx, value);
			Ok(())
		}
		_ => Err(Error::PatchTarget(format!("path '{}' addresses into a non-container", path))),
	}
}

fn remove_member(parent: &mut Value, token: &str, path: &str) -> TsResult<()> {
	match parent {
		Value::Object(map) => map
			.remove(token)
			.map(|_| ())
			.ok_or_else(|| Error::ValidationError(format!("path '{}' not found", path))),
		Value::Array(arr) => {
			let idx = parse_index(token, arr.len(), path)?;
			arr.remove(idx);
			Ok(())
		}
		_ => Err(Error::PatchTarget(format!("path '{}' addresses into a non-container", path))),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn ops(v: Value) -> Vec<PatchOp> {
		serde_json::from_value(v).unwrap_or_default()
	}

	#[test]
	fn test_replace_field() {
		let mut doc = json!({"name": "Ann"});
		let patch = ops(json!([{"op": "replace", "path": "/name", "value": "Bee"}]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"name": "Bee"}));
	}

	#[test]
	fn test_add_and_remove() {
		let mut doc = json!({"a": 1});
		let patch = ops(json!([
			{"op": "add", "path": "/b", "value": 2},
			{"op": "remove", "path": "/a"}
		]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"b": 2}));
	}

	#[test]
	fn test_add_overwrites_existing_member() {
		let mut doc = json!({"a": 1});
		let patch = ops(json!([{"op": "add", "path": "/a", "value": 9}]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"a": 9}));
	}

	#[test]
	fn test_nested_path() {
		let mut doc = json!({"profile": {"age": 30, "city": "NYC"}});
		let patch = ops(json!([{"op": "replace", "path": "/profile/age", "value": 31}]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"profile": {"age": 31, "city": "NYC"}}));
	}

	#[test]
	fn test_array_index_and_append() {
		let mut doc = json!({"tags": ["a", "b"]});
		let patch = ops(json!([
			{"op": "replace", "path": "/tags/1", "value": "x"},
			{"op": "add", "path": "/tags/-", "value": "y"}
		]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"tags": ["a", "x", "y"]}));
	}

	#[test]
	fn test_non_object_document_rejected() {
		let mut doc = json!("just a string");
		let patch = ops(json!([{"op": "replace", "path": "/name", "value": "Bee"}]));
		let result = apply_patch(&mut doc, &patch);
		assert!(matches!(result, Err(Error::PatchTarget(_))));
		// Document untouched
		assert_eq!(doc, json!("just a string"));
	}

	#[test]
	fn test_replace_missing_path_fails() {
		let mut doc = json!({"a": 1});
		let patch = ops(json!([{"op": "replace", "path": "/missing", "value": 2}]));
		assert!(apply_patch(&mut doc, &patch).is_err());
	}

	#[test]
	fn test_test_op() {
		let mut doc = json!({"a": 1});
		let good = ops(json!([{"op": "test", "path": "/a", "value": 1}]));
		assert!(apply_patch(&mut doc, &good).is_ok());
		let bad = ops(json!([{"op": "test", "path": "/a", "value": 2}]));
		assert!(apply_patch(&mut doc, &bad).is_err());
	}

	#[test]
	fn test_escaped_pointer_tokens() {
		let mut doc = json!({"a/b": 1, "c~d": 2});
		let patch = ops(json!([
			{"op": "replace", "path": "/a~1b", "value": 10},
			{"op": "replace", "path": "/c~0d", "value": 20}
		]));
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"a/b": 10, "c~d": 20}));
	}

	#[test]
	fn test_idempotent_replace_double_apply() {
		// Replaying the same replace twice converges to the same value
		let mut doc = json!({"name": "Ann"});
		let patch = ops(json!([{"op": "replace", "path": "/name", "value": "Bee"}]));
		apply_patch(&mut doc, &patch).ok();
		apply_patch(&mut doc, &patch).ok();
		assert_eq!(doc, json!({"name": "Bee"}));
	}
}

// vim: ts=4
