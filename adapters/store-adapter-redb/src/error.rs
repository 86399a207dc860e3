use tidesync::error::Error;

/// Map a redb error into the shared error type, keeping the message.
pub fn from_redb_error<E: std::fmt::Display>(err: E) -> Error {
	Error::DbError(err.to_string())
}

pub fn from_join_error(err: tokio::task::JoinError) -> Error {
	Error::Internal(err.to_string())
}

// vim: ts=4
