//! Connection authentication seam.
//!
//! Connection establishment carries an opaque token that is validated once
//! per connection; failure rejects the connection before any subscribe or
//! write traffic is processed. Token issuance and validation live behind
//! this trait.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// Validates an opaque connection token and resolves the user it belongs to.
#[async_trait]
pub trait TokenVerifier: Debug + Send + Sync {
	/// Returns the authenticated user id, or an error rejecting the
	/// connection.
	async fn verify(&self, token: &str) -> TsResult<Box<str>>;
}

/// Verifier accepting a single pre-shared token. Suitable for single-user
/// deployments and tests; production setups plug in their own verifier.
#[derive(Debug)]
pub struct StaticTokenVerifier {
	token: Box<str>,
	user_id: Box<str>,
}

impl StaticTokenVerifier {
	pub fn new(token: impl Into<Box<str>>, user_id: impl Into<Box<str>>) -> Self {
		Self { token: token.into(), user_id: user_id.into() }
	}
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
	async fn verify(&self, token: &str) -> TsResult<Box<str>> {
		if token == self.token.as_ref() {
			Ok(self.user_id.clone())
		} else {
			Err(Error::ValidationError("invalid connection token".into()))
		}
	}
}


// vim: ts=4
