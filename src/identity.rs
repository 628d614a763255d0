//! Identity of the record owner: a signed-in user or an anonymous device.

use serde::{Deserialize, Serialize};

/// Stable identity a usage record is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Authenticated user id from the identity provider.
    User(String),
    /// Anonymous device key, minted locally and persisted alongside the cache.
    Device(String),
}

impl Identity {
    /// Mints a fresh anonymous device identity.
    pub fn anonymous() -> Self {
        Self::Device(uuid::Uuid::new_v4().to_string())
    }

    /// The storage key used for both the local cache file and the remote
    /// document id.
    pub fn storage_key(&self) -> &str {
        match self {
            Self::User(id) => id,
            Self::Device(key) => key,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::Device(key) => write!(f, "device:{}", key),
        }
    }
}
