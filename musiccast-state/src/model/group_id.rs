//! Group identity type

use musiccast_api::NULL_GROUP_ID;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, device-issued id of a multi-room group.
///
/// Devices report the all-zeros sentinel when they are not grouped;
/// `GroupId::parse` maps that to `None` so the rest of the crate never has
/// to compare against the sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Interpret a device-reported group id, mapping the null sentinel
    /// (and empty strings) to `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw == NULL_GROUP_ID {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
