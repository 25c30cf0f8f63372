pub use crate::core::app::App;
pub use crate::error::{Error, FzResult};
pub use crate::types::{AppId, Patch, Timestamp, UserId};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
