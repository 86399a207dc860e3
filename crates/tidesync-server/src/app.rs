//! App state type

use std::sync::Arc;

use tidesync_types::store_adapter::StoreAdapter;

use crate::auth::TokenVerifier;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	/// The ordered key-value storage engine behind every bucket.
	pub store: Arc<dyn StoreAdapter>,

	/// Validates the opaque connection token, once per connection.
	pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
	pub fn new(store: Arc<dyn StoreAdapter>, verifier: Arc<dyn TokenVerifier>) -> App {
		Arc::new(Self { store, verifier })
	}
}

pub type App = Arc<AppState>;

// vim: ts=4
