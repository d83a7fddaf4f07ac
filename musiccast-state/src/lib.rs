//! State model, store and group reconciliation for the MusicCast SDK.
//!
//! This crate owns the in-memory model of tracked devices, their zones and
//! multi-room groups, and the machinery that keeps it consistent while poll
//! results and push events race each other:
//!
//! - [`StateStore`] — the single serialization point for all mutation.
//!   Merges are field-level, stamped with provenance, and resolved by
//!   last-writer-wins on local receipt time; each merge reports exactly the
//!   fields that changed value.
//! - [`GroupCoordinator`] — folds per-device distribution reports into one
//!   logical group per group id, absorbing the transient asymmetry of
//!   join/leave with a one-cycle pending state.
//! - [`Dispatcher`] — delivers change notifications to subscribers through
//!   bounded per-subscriber queues, decoupling the merge loop from slow
//!   consumers.
//!
//! # Architecture
//!
//! ```text
//! poll results ─┐                       ┌─> Snapshot (immutable reads)
//!               ├─> StateStore merges ──┤
//! push events ──┘         │             └─> ChangedFields per merge
//!                         v
//!               GroupCoordinator ──> GroupDiffs
//!                         │
//!                         v
//!                    Dispatcher ──> bounded queue per subscriber
//! ```
//!
//! The reconciler in `musiccast-sdk` is the only writer; this crate enforces
//! atomicity per delta, not writer exclusivity.

pub mod capabilities;
pub mod delta;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod model;
pub mod snapshot;
pub mod store;

pub use capabilities::{
    DeviceCapabilities, DeviceFeature, VolumeRange, ZoneCapabilities, ZoneFeature,
};
pub use delta::{fields, PlaybackDelta, Stamp, UpdateSource, ZoneDelta};
pub use dispatch::{
    ChangeFilter, ChangeNotification, Dispatcher, Resource, ResourceKind, Subscription,
    SubscriptionHandle, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{Result, StateError};
pub use group::{DistributionView, GroupCoordinator, GroupDiff, MemberStatus};
pub use model::{
    DeviceId, GroupId, GroupRole, PlaybackState, Power, TrackInfo, UnknownZoneId, ZoneId,
};
pub use snapshot::{
    DeviceSnapshot, GroupMemberSnapshot, GroupSnapshot, PlaybackSnapshot, Snapshot, ZoneSnapshot,
};
pub use store::{ChangedFields, StateStore};

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::capabilities::{DeviceCapabilities, ZoneCapabilities, ZoneFeature};
    pub use crate::delta::{fields, PlaybackDelta, Stamp, UpdateSource, ZoneDelta};
    pub use crate::dispatch::{ChangeFilter, ChangeNotification, Dispatcher, Resource};
    pub use crate::group::{DistributionView, GroupCoordinator};
    pub use crate::model::{DeviceId, GroupId, GroupRole, PlaybackState, Power, ZoneId};
    pub use crate::snapshot::Snapshot;
    pub use crate::store::StateStore;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared fixtures for in-crate tests.

    use std::time::{Duration, Instant};

    use crate::capabilities::DeviceCapabilities;
    use crate::delta::{Stamp, UpdateSource};

    /// A two-zone device: `main` with volume 0..=80 and a small input list,
    /// `zone2` with power only. Has the playback module.
    pub(crate) fn device_caps() -> DeviceCapabilities {
        let features: musiccast_api::Features = serde_json::from_str(
            r#"{
                "response_code": 0,
                "system": {"func_list": ["wired_lan"], "input_list": []},
                "zone": [
                    {
                        "id": "main",
                        "func_list": ["power", "volume", "mute", "sleep"],
                        "input_list": ["net_radio", "aux", "server", "mc_link"],
                        "range_step": [{"id": "volume", "min": 0, "max": 80, "step": 1}]
                    },
                    {
                        "id": "zone2",
                        "func_list": ["power"],
                        "input_list": ["aux", "mc_link"]
                    }
                ],
                "netusb": {"func_list": ["play_queue"]}
            }"#,
        )
        .expect("fixture features parse");
        DeviceCapabilities::from_features(&features, None).expect("fixture capabilities")
    }

    /// N stamps with strictly increasing receipt times.
    pub(crate) fn stamps<const N: usize>(source: UpdateSource) -> [Stamp; N] {
        let base = Instant::now();
        std::array::from_fn(|index| {
            Stamp::new(source, base + Duration::from_millis(index as u64 + 1))
        })
    }
}
