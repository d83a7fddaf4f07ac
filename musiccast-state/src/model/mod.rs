//! Core identity and value types of the state model.

mod device_id;
mod group_id;
mod playback;
mod power;
mod zone_id;

pub use device_id::DeviceId;
pub use group_id::GroupId;
pub use playback::{PlaybackState, TrackInfo};
pub use power::Power;
pub use zone_id::{UnknownZoneId, ZoneId};

use serde::{Deserialize, Serialize};

/// Role a device plays within a multi-room group.
///
/// The protocol calls the leader "server"; this crate uses leader/client
/// throughout and translates at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Leader,
    Client,
}

impl GroupRole {
    /// Parse a device-reported role string. `"none"` and unknown values
    /// yield `None` (not grouped).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "server" => Some(GroupRole::Leader),
            "client" => Some(GroupRole::Client),
            _ => None,
        }
    }
}
