use serde::{Deserialize, Serialize};
use std::fmt;

/// Power state of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Standby,
}

impl Power {
    /// Parse a device-reported power string. `"toggle"` is a command, not a
    /// state, and anything unrecognized yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "on" => Some(Power::On),
            "standby" => Some(Power::Standby),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Power::On)
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => f.write_str("on"),
            Power::Standby => f.write_str("standby"),
        }
    }
}
