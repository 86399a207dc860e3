//! Per-connection subscription registry.
//!
//! Each connection owns exactly one registry mapping subscription ids to
//! watch tokens. A token owns the spawned listener task(s) for one
//! subscription and aborts them when detached or dropped, so cleanup runs
//! exactly once even when an explicit unsubscribe races a disconnect.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;

use crate::prelude::*;

/// Owns the listener tasks of one subscription. Aborting the tasks is the
/// cancellation; dropping the token detaches implicitly.
#[derive(Debug)]
pub struct WatchToken {
	handles: Vec<JoinHandle<()>>,
}

impl WatchToken {
	pub fn new(handles: Vec<JoinHandle<()>>) -> Self {
		Self { handles }
	}

	pub fn single(handle: JoinHandle<()>) -> Self {
		Self::new(vec![handle])
	}

	/// Abort the listener tasks. Idempotent.
	pub fn detach(&self) {
		for handle in &self.handles {
			handle.abort();
		}
	}
}

impl Drop for WatchToken {
	fn drop(&mut self) {
		self.detach();
	}
}

/// Subscription id -> watch token table for a single connection.
///
/// After `clear_all` (connection teardown) the registry refuses further
/// inserts: a subscribe racing a disconnect gets its listeners aborted
/// immediately instead of leaking them.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	tokens: Mutex<Option<HashMap<Box<str>, WatchToken>>>,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self { tokens: Mutex::new(Some(HashMap::new())) }
	}

	/// Register a subscription's token. Fails if the connection is already
	/// torn down or the id is in use; the token is dropped (and its tasks
	/// aborted) on failure.
	pub fn insert(&self, id: &str, token: WatchToken) -> TsResult<()> {
		let mut guard = self.tokens.lock().map_err(|_| Error::Internal("registry lock".into()))?;
		match guard.as_mut() {
			Some(tokens) => {
				if tokens.contains_key(id) {
					return Err(Error::Internal(format!("duplicate subscription id {}", id)));
				}
				tokens.insert(id.into(), token);
				Ok(())
			}
			None => Err(Error::Closed),
		}
	}

	/// Detach one subscription. Unknown ids are a no-op.
	pub fn remove(&self, id: &str) {
		let token = match self.tokens.lock() {
			Ok(mut guard) => guard.as_mut().and_then(|tokens| tokens.remove(id)),
			Err(_) => None,
		};
		drop(token);
	}

	/// Tear down every subscription exactly once and seal the registry.
	pub fn clear_all(&self) {
		let tokens = match self.tokens.lock() {
			Ok(mut guard) => guard.take(),
			Err(_) => None,
		};
		if let Some(tokens) = tokens {
			debug!("Cleaning up {} subscription(s)", tokens.len());
			drop(tokens);
		}
	}

	/// Number of live subscriptions.
	pub fn len(&self) -> usize {
		self.tokens.lock().ok().and_then(|g| g.as_ref().map(HashMap::len)).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}


// vim: ts=4
