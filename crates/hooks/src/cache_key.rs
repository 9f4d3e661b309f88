use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Caller-chosen key; changing it forces a fresh client or a restarted flow
/// even when nothing else changed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheKey {
    /// A numeric key, e.g. a retry counter.
    Number(i64),

    /// A textual key.
    Text(String),
}

impl From<i64> for CacheKey {
    fn from(key: i64) -> Self {
        Self::Number(key)
    }
}

impl From<i32> for CacheKey {
    fn from(key: i32) -> Self {
        Self::Number(key.into())
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::Text(key.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::Text(key)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(key) => write!(f, "{key}"),
            Self::Text(key) => write!(f, "{key}"),
        }
    }
}
