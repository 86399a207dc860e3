//! TideSync client: socket session state machine, offline write path,
//! op-log replay, and the in-process offline change bus.

pub mod emitter;
pub mod local_store;
pub mod oplog;
pub mod session;
pub mod transport;
pub mod write;

mod prelude;

pub use emitter::{LocalChange, OfflineEmitter};
pub use local_store::{MemoryLocalStore, MemoryOpLog};
pub use oplog::OpLog;
pub use session::{SessionConfig, SocketSession, Subscription};
pub use transport::{SyncTransport, TransportEvent};

// vim: ts=4
