//! Error taxonomy shared by the server engine and the client session.

use std::fmt;

pub type TsResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Point-get miss. Swallowed when seeding a subscription, surfaced as
	/// `{value: null}` for plain gets.
	NotFound,
	/// An acknowledgement never arrived within the bounded wait.
	Timeout,
	/// The transport or session is gone; no further traffic is possible.
	Closed,
	/// Patch requested against a non-object value. Fatal to the call,
	/// never retried.
	PatchTarget(String),
	/// Malformed subscribe/write parameters, rejected synchronously.
	ValidationError(String),
	/// Storage engine error, surfaced verbatim in acknowledgements.
	DbError(String),
	Internal(String),
	Parse,

	// externals
	Io(std::io::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			Error::NotFound => write!(f, "not found"),
			Error::Timeout => write!(f, "acknowledgement timed out"),
			Error::Closed => write!(f, "connection closed"),
			Error::PatchTarget(msg) => write!(f, "cannot apply patch: {}", msg),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::DbError(msg) => write!(f, "{}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Parse => write!(f, "parse error"),
			Error::Io(e) => write!(f, "io error: {}", e),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_: serde_json::Error) -> Self {
		Self::Parse
	}
}

// vim: ts=4
