//! Declarative read-query projection.
//!
//! A `Query` selects fields from a stored JSON value before it is handed to
//! a caller. The same projector runs server-side for online reads and
//! client-side against the cached copy for offline reads; which side runs
//! it is decided by the offline flags on the request, never by the query
//! itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field-selection document. Keys name fields of the target object; a value
/// of `true` (or `1`) selects the field as-is, a nested object recurses into
/// the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(pub Map<String, Value>);

impl Query {
	/// Apply this query to a value, producing the projected value.
	/// Non-object targets are returned unchanged.
	pub fn apply(&self, value: &Value) -> Value {
		let Some(obj) = value.as_object() else {
			return value.clone();
		};

		let mut out = Map::new();
		for (field, selector) in &self.0 {
			let Some(current) = obj.get(field) else { continue };
			match selector {
				Value::Object(nested) => {
					out.insert(field.clone(), Query(nested.clone()).apply(current));
				}
				Value::Bool(true) => {
					out.insert(field.clone(), current.clone());
				}
				Value::Number(n) if n.as_i64() == Some(1) => {
					out.insert(field.clone(), current.clone());
				}
				_ => {}
			}
		}
		Value::Object(out)
	}
}

/// Project `value` through an optional query. `None` passes the value
/// through untouched.
pub fn project(query: Option<&Query>, value: &Value) -> Value {
	match query {
		Some(q) => q.apply(value),
		None => value.clone(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn query(v: Value) -> Query {
		serde_json::from_value(v).unwrap_or_default()
	}

	#[test]
	fn test_no_query_passes_through() {
		let value = json!({"name": "Ann", "age": 30});
		assert_eq!(project(None, &value), value);
	}

	#[test]
	fn test_selects_named_fields() {
		let value = json!({"name": "Ann", "age": 30, "city": "NYC"});
		let q = query(json!({"name": true, "age": 1}));
		assert_eq!(project(Some(&q), &value), json!({"name": "Ann", "age": 30}));
	}

	#[test]
	fn test_nested_selection_recurses() {
		let value = json!({"name": "Ann", "profile": {"theme": "dark", "lang": "en"}});
		let q = query(json!({"profile": {"theme": true}}));
		assert_eq!(project(Some(&q), &value), json!({"profile": {"theme": "dark"}}));
	}

	#[test]
	fn test_missing_fields_skipped() {
		let value = json!({"name": "Ann"});
		let q = query(json!({"name": true, "email": true}));
		assert_eq!(project(Some(&q), &value), json!({"name": "Ann"}));
	}

	#[test]
	fn test_non_object_target_unchanged() {
		let q = query(json!({"name": true}));
		assert_eq!(project(Some(&q), &json!(42)), json!(42));
		assert_eq!(project(Some(&q), &json!(["a", "b"])), json!(["a", "b"]));
	}
}

// vim: ts=4
