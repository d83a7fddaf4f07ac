//! Zone identity type

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed zone namespace of the MusicCast protocol.
///
/// Every device advertises a subset of these four zones; there is no other
/// zone id on the wire. Keeping this closed lets capability validation
/// reject unknown zones at discovery instead of failing on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneId {
    Main,
    Zone2,
    Zone3,
    Zone4,
}

impl ZoneId {
    /// All zone ids, in protocol order.
    pub const ALL: [ZoneId; 4] = [ZoneId::Main, ZoneId::Zone2, ZoneId::Zone3, ZoneId::Zone4];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneId::Main => "main",
            ZoneId::Zone2 => "zone2",
            ZoneId::Zone3 => "zone3",
            ZoneId::Zone4 => "zone4",
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneId {
    type Err = UnknownZoneId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(ZoneId::Main),
            "zone2" => Ok(ZoneId::Zone2),
            "zone3" => Ok(ZoneId::Zone3),
            "zone4" => Ok(ZoneId::Zone4),
            other => Err(UnknownZoneId(other.to_string())),
        }
    }
}

/// Error returned when a string is not one of the four protocol zone ids.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown zone id {0:?}")]
pub struct UnknownZoneId(pub String);
