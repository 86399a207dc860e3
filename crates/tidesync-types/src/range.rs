//! Key-range predicate shared by server-side live filtering and
//! client-side offline filtering.
//!
//! A key is accepted iff it satisfies every supplied bound; absent bounds
//! are unconstrained. `gt`/`lt` are exclusive, `gte`/`lte` inclusive.
//! Comparison is lexicographic on the raw key representation, matching the
//! bucket's native ordering. The same predicate must run on both sides of
//! the protocol: a key accepted for a live server filter is accepted when
//! the client replays the bounds against a cached full-bucket snapshot.

use serde::{Deserialize, Serialize};

/// Range bounds for a bucket subscription or scan. Immutable for the life
/// of the subscription that carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gt: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gte: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lt: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lte: Option<String>,
}

impl KeyRange {
	/// Create an unbounded range (accepts every key).
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the exclusive lower bound (builder pattern).
	pub fn with_gt(mut self, key: impl Into<String>) -> Self {
		self.gt = Some(key.into());
		self
	}

	/// Set the inclusive lower bound (builder pattern).
	pub fn with_gte(mut self, key: impl Into<String>) -> Self {
		self.gte = Some(key.into());
		self
	}

	/// Set the exclusive upper bound (builder pattern).
	pub fn with_lt(mut self, key: impl Into<String>) -> Self {
		self.lt = Some(key.into());
		self
	}

	/// Set the inclusive upper bound (builder pattern).
	pub fn with_lte(mut self, key: impl Into<String>) -> Self {
		self.lte = Some(key.into());
		self
	}

	/// Check if no bound is set.
	pub fn is_unbounded(&self) -> bool {
		self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none()
	}

	/// Check whether `key` satisfies all supplied bounds.
	pub fn contains(&self, key: &str) -> bool {
		if let Some(gt) = &self.gt {
			if key <= gt.as_str() {
				return false;
			}
		}
		if let Some(gte) = &self.gte {
			if key < gte.as_str() {
				return false;
			}
		}
		if let Some(lt) = &self.lt {
			if key >= lt.as_str() {
				return false;
			}
		}
		if let Some(lte) = &self.lte {
			if key > lte.as_str() {
				return false;
			}
		}
		true
	}
}


// vim: ts=4
