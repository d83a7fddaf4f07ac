//! Device identity type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a MusicCast device.
///
/// This is the `device_id` string the device reports from
/// `system/getDeviceInfo` (a hex MAC-derived id). It is stable across
/// reboots and network changes, unlike the host address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        DeviceId::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_as_str() {
        let id = DeviceId::new("00A0DEADBEEF");
        assert_eq!(id.as_str(), "00A0DEADBEEF");
        assert_eq!(format!("{}", id), "00A0DEADBEEF");
    }

    #[test]
    fn test_equality() {
        assert_eq!(DeviceId::from("abc"), DeviceId::new(String::from("abc")));
    }
}
