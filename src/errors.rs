//! Error types for governor operations.

use crate::limits::Scope;
use std::fmt::{Display, Formatter};

/// Errors surfaced to callers of governor operations.
///
/// Remote sync failures are deliberately absent: they are logged and
/// swallowed, and local state stays authoritative for enforcement.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernorError {
    /// A window limit was hit. Recoverable by the caller; never auto-retried.
    LimitExceeded { scope: Scope, limit: u32 },
    /// The upstream provider throttled the call (429-class response).
    Throttled { message: String },
    /// The underlying call failed or timed out. The queue stays usable.
    Network { message: String },
    /// The governor's pacing queue has shut down.
    QueueClosed,
}

impl Display for GovernorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitExceeded { scope, limit } => {
                write!(f, "{} limit of {} reached", scope, limit)
            }
            Self::Throttled { message } => write!(f, "throttled by provider: {}", message),
            Self::Network { message } => write!(f, "network failure: {}", message),
            Self::QueueClosed => write!(f, "request queue closed"),
        }
    }
}

impl std::error::Error for GovernorError {}
