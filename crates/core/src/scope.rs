use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity filter applied to every historical query.
///
/// A query is scoped by exactly one of the two: the authenticated principal,
/// or the anonymous device identifier when nobody is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum ScopeFilter {
    Principal(String),
    Device(String),
}

impl ScopeFilter {
    /// Pick the principal when one is signed in, otherwise the device
    pub fn resolve(principal_id: Option<&str>, device_id: &str) -> Self {
        match principal_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(principal) => Self::Principal(principal.to_string()),
            None => Self::Device(device_id.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Principal(id) | Self::Device(id) => id,
        }
    }

    /// Column name the backend filters on
    pub fn column(&self) -> &'static str {
        match self {
            Self::Principal(_) => "principal_id",
            Self::Device(_) => "device_id",
        }
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "principal:{id}"),
            Self::Device(id) => write!(f, "device:{id}"),
        }
    }
}
