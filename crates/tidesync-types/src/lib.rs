//! Shared types, adapter traits, and core utilities for TideSync.
//!
//! This crate contains the foundational pieces shared between the server
//! engine, the client session, and the storage adapter implementations:
//! the error taxonomy, the wire message envelope, the change-frame types,
//! the key-range predicate, the query projector, and the patch primitive.
//! Keeping these in one crate guarantees the server and the client agree
//! on filtering and projection semantics down to the byte.

pub mod error;
pub mod local_store;
pub mod message;
pub mod patch;
pub mod prelude;
pub mod query;
pub mod range;
pub mod store_adapter;
pub mod types;
pub mod utils;

// vim: ts=4
