//! Immutable point-in-time views of tracked state.
//!
//! A [`Snapshot`] is produced under one read lock, so every field in it was
//! observed at the same moment; it is never mutated afterwards and is shared
//! with subscribers as `Arc<Snapshot>`.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::capabilities::DeviceCapabilities;
use crate::delta::UpdateSource;
use crate::group::MemberStatus;
use crate::model::{DeviceId, GroupId, PlaybackState, Power, TrackInfo, ZoneId};

/// Point-in-time copy of everything the store tracks.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub devices: BTreeMap<DeviceId, DeviceSnapshot>,
    pub groups: BTreeMap<GroupId, GroupSnapshot>,
}

impl Snapshot {
    pub fn device(&self, id: &DeviceId) -> Option<&DeviceSnapshot> {
        self.devices.get(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&GroupSnapshot> {
        self.groups.get(id)
    }

    /// The group a device currently belongs to, if any.
    pub fn group_of(&self, device: &DeviceId) -> Option<(&GroupId, &GroupSnapshot)> {
        self.groups
            .iter()
            .find(|(_, group)| group.members.iter().any(|member| &member.device == device))
    }
}

/// One device and its zones.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub host: String,
    pub model_name: Option<String>,
    pub network_name: Option<String>,
    pub capabilities: DeviceCapabilities,
    /// Set after the configured streak of poll failures; cleared by the next
    /// successful poll. State is retained while a device is unreachable.
    pub unreachable: bool,
    pub zones: BTreeMap<ZoneId, ZoneSnapshot>,
    pub playback: Option<PlaybackSnapshot>,
}

/// One zone's observed fields. `None` means "not yet observed".
#[derive(Debug, Clone, Default)]
pub struct ZoneSnapshot {
    pub power: Option<Power>,
    pub volume: Option<i32>,
    pub mute: Option<bool>,
    pub input: Option<String>,
    pub sleep: Option<u32>,
    /// Provenance of the most recent field update in this zone.
    pub last_update: Option<(UpdateSource, Instant)>,
}

/// Playback module state.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSnapshot {
    pub state: Option<PlaybackState>,
    pub track: Option<TrackInfo>,
    pub play_time: Option<i64>,
    pub total_time: Option<i64>,
}

/// One multi-room group.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub name: Option<String>,
    pub leader: Option<DeviceId>,
    pub server_zone: Option<ZoneId>,
    /// Ordered member list; the leader, when present, comes first.
    pub members: Vec<GroupMemberSnapshot>,
}

impl GroupSnapshot {
    pub fn confirmed_members(&self) -> impl Iterator<Item = &DeviceId> {
        self.members
            .iter()
            .filter(|member| member.status == MemberStatus::Confirmed)
            .map(|member| &member.device)
    }
}

/// A group member and its confirmation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberSnapshot {
    pub device: DeviceId,
    pub status: MemberStatus,
}
