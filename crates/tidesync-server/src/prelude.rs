pub use tidesync_types::error::{Error, TsResult};

pub use tracing::{debug, info, warn};

// vim: ts=4
