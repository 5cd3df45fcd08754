use serde::Deserialize;
use std::collections::HashMap;

/// Key under which ENS text records store a Twitter/X handle.
pub const TWITTER_TEXT_RECORD: &str = "com.twitter";

/// Human-readable metadata for an address.
///
/// `Unresolved` is the fallback for every resolution failure, so its display
/// name is always the raw address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Resolved {
        name: String,
        social_handle: Option<String>,
    },
    Unresolved {
        address: String,
        social_handle: Option<String>,
    },
}

impl Identity {
    pub fn unresolved(address: &str) -> Self {
        Identity::Unresolved {
            address: address.to_string(),
            social_handle: None,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::Resolved { name, .. } => name,
            Identity::Unresolved { address, .. } => address,
        }
    }

    pub fn social_handle(&self) -> Option<&str> {
        match self {
            Identity::Resolved { social_handle, .. } | Identity::Unresolved { social_handle, .. } => {
                social_handle.as_deref()
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Identity::Resolved { .. })
    }
}

/// Body returned by the ENS profile API for one address.
#[derive(Debug, Default, Deserialize)]
pub struct EnsProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub texts: Option<HashMap<String, serde_json::Value>>,
}

impl EnsProfile {
    pub fn into_identity(self, address: &str) -> Identity {
        let social_handle = self
            .texts
            .as_ref()
            .and_then(|texts| texts.get(TWITTER_TEXT_RECORD))
            .and_then(|value| value.as_str())
            .map(|handle| handle.trim().trim_start_matches('@'))
            .filter(|handle| !handle.is_empty())
            .map(str::to_string);

        match self.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            Some(name) => Identity::Resolved {
                name,
                social_handle,
            },
            None => Identity::Unresolved {
                address: address.to_string(),
                social_handle,
            },
        }
    }
}
