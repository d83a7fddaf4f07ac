//! The authoritative in-memory model of devices, zones and groups.
//!
//! All mutation goes through merge operations that take a field-level delta
//! plus a provenance [`Stamp`]; each field applies **last-writer-wins by
//! receipt time** (poll and push have equal priority, and device clocks are
//! never consulted). A merge reports exactly the set of fields whose value
//! actually changed, so callers can suppress no-op notifications.
//!
//! Reads produce an immutable [`Snapshot`] built under a single read lock:
//! a reader can never observe a zone with some fields from an old poll and
//! others from a concurrently arriving event.
//!
//! # Architecture
//!
//! ```text
//! StateStore
//! ├── devices: HashMap<DeviceId, DeviceRecord>
//! │       └── zones: BTreeMap<ZoneId, ZoneRecord>   (stamped cells)
//! │       └── playback: PlaybackRecord              (stamped cells)
//! ├── groups: HashMap<GroupId, GroupRecord>         (see group.rs)
//! └── host_index: HashMap<host, DeviceId>
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::capabilities::DeviceCapabilities;
use crate::delta::{fields, PlaybackDelta, Stamp, ZoneDelta};
use crate::error::{Result, StateError};
use crate::group::GroupRecord;
use crate::model::{DeviceId, GroupId, ZoneId};
use crate::snapshot::{DeviceSnapshot, PlaybackSnapshot, Snapshot, ZoneSnapshot};

/// The set of field keys a merge actually changed.
pub type ChangedFields = BTreeSet<&'static str>;

/// One observed field with its provenance.
///
/// `merge` applies a value iff its stamp is not older than the stored one;
/// the change flag reflects the value, not the stamp, so a refreshed stamp
/// with an identical value is not a change.
#[derive(Debug, Clone)]
pub(crate) struct Cell<T> {
    value: Option<T>,
    stamp: Option<Stamp>,
}

impl<T> Default for Cell<T> {
    fn default() -> Self {
        Self {
            value: None,
            stamp: None,
        }
    }
}

impl<T: Clone + PartialEq> Cell<T> {
    fn merge(&mut self, incoming: Option<T>, stamp: Stamp) -> bool {
        let Some(incoming) = incoming else {
            // Absent fields are untouched, never cleared.
            return false;
        };
        if let Some(current) = &self.stamp {
            if stamp.received_at < current.received_at {
                return false;
            }
        }
        let changed = self.value.as_ref() != Some(&incoming);
        self.value = Some(incoming);
        self.stamp = Some(stamp);
        changed
    }

    fn cloned(&self) -> Option<T> {
        self.value.clone()
    }

    fn stamp(&self) -> Option<Stamp> {
        self.stamp
    }
}

#[derive(Debug, Clone, Default)]
struct ZoneRecord {
    power: Cell<crate::model::Power>,
    volume: Cell<i32>,
    mute: Cell<bool>,
    input: Cell<String>,
    sleep: Cell<u32>,
}

impl ZoneRecord {
    fn last_update(&self) -> Option<Stamp> {
        [
            self.power.stamp(),
            self.volume.stamp(),
            self.mute.stamp(),
            self.input.stamp(),
            self.sleep.stamp(),
        ]
        .into_iter()
        .flatten()
        .max_by_key(|stamp| stamp.received_at)
    }

    fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            power: self.power.cloned(),
            volume: self.volume.cloned(),
            mute: self.mute.cloned(),
            input: self.input.cloned(),
            sleep: self.sleep.cloned(),
            last_update: self
                .last_update()
                .map(|stamp| (stamp.source, stamp.received_at)),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PlaybackRecord {
    state: Cell<crate::model::PlaybackState>,
    track: Cell<crate::model::TrackInfo>,
    play_time: Cell<i64>,
    total_time: Cell<i64>,
}

impl PlaybackRecord {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.state.cloned(),
            track: self.track.cloned(),
            play_time: self.play_time.cloned(),
            total_time: self.total_time.cloned(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DeviceRecord {
    pub(crate) host: String,
    pub(crate) model_name: Option<String>,
    pub(crate) network_name: Option<String>,
    pub(crate) capabilities: DeviceCapabilities,
    pub(crate) unreachable: bool,
    zones: BTreeMap<ZoneId, ZoneRecord>,
    playback: Option<PlaybackRecord>,
    /// The device's own latest claim of group membership, kept for the
    /// group coordinator's pending-member logic.
    pub(crate) claim: Option<crate::group::GroupClaim>,
}

#[derive(Default)]
pub(crate) struct Inner {
    pub(crate) devices: HashMap<DeviceId, DeviceRecord>,
    pub(crate) groups: HashMap<GroupId, GroupRecord>,
    pub(crate) host_index: HashMap<String, DeviceId>,
}

/// Thread-safe store; clones share state.
///
/// The store itself only serializes access. Making one task the sole writer
/// (the reconciler) is the engine's job.
#[derive(Clone, Default)]
pub struct StateStore {
    pub(crate) inner: Arc<RwLock<Inner>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Device lifecycle
    // ========================================================================

    /// Create or update a device after a successful discovery handshake.
    ///
    /// Returns `true` if the device was new. Re-adding an existing device
    /// refreshes host, names and capabilities but keeps observed field
    /// values for zones that still exist.
    pub fn add_device(
        &self,
        id: DeviceId,
        host: impl Into<String>,
        capabilities: DeviceCapabilities,
        model_name: Option<String>,
        network_name: Option<String>,
    ) -> bool {
        let host = host.into();
        let mut inner = self.inner.write();

        inner.host_index.insert(host.clone(), id.clone());

        match inner.devices.get_mut(&id) {
            Some(record) => {
                record.zones.retain(|zone, _| capabilities.zones.contains_key(zone));
                for zone in capabilities.zone_ids() {
                    record.zones.entry(zone).or_default();
                }
                if capabilities.has_netusb && record.playback.is_none() {
                    record.playback = Some(PlaybackRecord::default());
                } else if !capabilities.has_netusb {
                    record.playback = None;
                }
                record.host = host;
                record.model_name = model_name;
                record.network_name = network_name;
                record.capabilities = capabilities;
                false
            }
            None => {
                let zones = capabilities
                    .zone_ids()
                    .map(|zone| (zone, ZoneRecord::default()))
                    .collect();
                let playback = capabilities.has_netusb.then(PlaybackRecord::default);
                inner.devices.insert(
                    id,
                    DeviceRecord {
                        host,
                        model_name,
                        network_name,
                        capabilities,
                        unreachable: false,
                        zones,
                        playback,
                        claim: None,
                    },
                );
                true
            }
        }
    }

    /// Remove a device and its state. Group membership cleanup is the
    /// coordinator's job and must happen first.
    pub fn remove_device(&self, id: &DeviceId) -> bool {
        let mut inner = self.inner.write();
        match inner.devices.remove(id) {
            Some(record) => {
                inner.host_index.remove(&record.host);
                true
            }
            None => false,
        }
    }

    pub fn contains_device(&self, id: &DeviceId) -> bool {
        self.inner.read().devices.contains_key(id)
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.inner.read().devices.keys().cloned().collect()
    }

    pub fn device_count(&self) -> usize {
        self.inner.read().devices.len()
    }

    /// Resolve a host address to the device id discovered there.
    pub fn device_id_for_host(&self, host: &str) -> Option<DeviceId> {
        self.inner.read().host_index.get(host).cloned()
    }

    /// The host a device was discovered at.
    pub fn host_of(&self, id: &DeviceId) -> Option<String> {
        self.inner
            .read()
            .devices
            .get(id)
            .map(|record| record.host.clone())
    }

    pub fn capabilities(&self, id: &DeviceId) -> Option<DeviceCapabilities> {
        self.inner
            .read()
            .devices
            .get(id)
            .map(|record| record.capabilities.clone())
    }

    // ========================================================================
    // Merging
    // ========================================================================

    /// Merge a zone delta, returning the fields whose value changed.
    ///
    /// Values that violate the device's advertised capabilities (volume
    /// outside the range, input not in the input list) are defects in the
    /// report: they are logged and skipped, and the prior value is kept.
    pub fn merge_zone(
        &self,
        id: &DeviceId,
        zone: ZoneId,
        delta: &ZoneDelta,
        stamp: Stamp,
    ) -> Result<ChangedFields> {
        let mut inner = self.inner.write();
        let record = inner
            .devices
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownDevice(id.clone()))?;

        let caps = record
            .capabilities
            .zone(zone)
            .ok_or(StateError::UnknownZone {
                device: id.clone(),
                zone,
            })?;

        let volume = match (delta.volume, &caps.volume) {
            (Some(volume), Some(range)) if !range.contains(volume) => {
                tracing::warn!(
                    device = %id,
                    zone = %zone,
                    volume,
                    min = range.min,
                    max = range.max,
                    "reported volume outside advertised range, keeping prior value"
                );
                None
            }
            (volume, _) => volume,
        };

        let input = match &delta.input {
            Some(input) if !caps.has_input(input) => {
                tracing::warn!(
                    device = %id,
                    zone = %zone,
                    input = input.as_str(),
                    "reported input not in capability list, keeping prior value"
                );
                None
            }
            other => other.clone(),
        };

        let zone_record = record
            .zones
            .get_mut(&zone)
            .ok_or(StateError::UnknownZone {
                device: id.clone(),
                zone,
            })?;

        let mut changed = ChangedFields::new();
        if zone_record.power.merge(delta.power, stamp) {
            changed.insert(fields::POWER);
        }
        if zone_record.volume.merge(volume, stamp) {
            changed.insert(fields::VOLUME);
        }
        if zone_record.mute.merge(delta.mute, stamp) {
            changed.insert(fields::MUTE);
        }
        if zone_record.input.merge(input, stamp) {
            changed.insert(fields::INPUT);
        }
        if zone_record.sleep.merge(delta.sleep, stamp) {
            changed.insert(fields::SLEEP);
        }
        Ok(changed)
    }

    /// Merge a playback delta, returning the fields whose value changed.
    ///
    /// Devices without the playback module accept nothing; such a delta is
    /// dropped with a warning (events can race a capability refresh).
    pub fn merge_playback(
        &self,
        id: &DeviceId,
        delta: &PlaybackDelta,
        stamp: Stamp,
    ) -> Result<ChangedFields> {
        let mut inner = self.inner.write();
        let record = inner
            .devices
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownDevice(id.clone()))?;

        let Some(playback) = record.playback.as_mut() else {
            tracing::warn!(device = %id, "playback delta for device without playback module");
            return Ok(ChangedFields::new());
        };

        let mut changed = ChangedFields::new();
        if playback.state.merge(delta.state, stamp) {
            changed.insert(fields::PLAYBACK_STATE);
        }
        if playback.track.merge(delta.track.clone(), stamp) {
            changed.insert(fields::TRACK);
        }
        if playback.play_time.merge(delta.play_time, stamp) {
            changed.insert(fields::PLAY_TIME);
        }
        if playback.total_time.merge(delta.total_time, stamp) {
            changed.insert(fields::TOTAL_TIME);
        }
        Ok(changed)
    }

    /// Flip the device's unreachable flag.
    ///
    /// Changing the flag is an observable device condition, so it is
    /// reported through the same changed-fields channel as any other field.
    /// No other state is touched; an unreachable device keeps everything it
    /// had.
    pub fn set_unreachable(&self, id: &DeviceId, unreachable: bool) -> Result<ChangedFields> {
        let mut inner = self.inner.write();
        let record = inner
            .devices
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownDevice(id.clone()))?;

        let mut changed = ChangedFields::new();
        if record.unreachable != unreachable {
            record.unreachable = unreachable;
            changed.insert(fields::UNREACHABLE);
        }
        Ok(changed)
    }

    pub fn is_unreachable(&self, id: &DeviceId) -> bool {
        self.inner
            .read()
            .devices
            .get(id)
            .map(|record| record.unreachable)
            .unwrap_or(false)
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Freeze the full tracked state into an immutable snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let inner = self.inner.read();

        let devices = inner
            .devices
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    DeviceSnapshot {
                        host: record.host.clone(),
                        model_name: record.model_name.clone(),
                        network_name: record.network_name.clone(),
                        capabilities: record.capabilities.clone(),
                        unreachable: record.unreachable,
                        zones: record
                            .zones
                            .iter()
                            .map(|(zone, zone_record)| (*zone, zone_record.snapshot()))
                            .collect(),
                        playback: record.playback.as_ref().map(PlaybackRecord::snapshot),
                    },
                )
            })
            .collect();

        let groups = inner
            .groups
            .iter()
            .map(|(id, record)| (id.clone(), record.snapshot()))
            .collect();

        Arc::new(Snapshot { devices, groups })
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("StateStore")
            .field("device_count", &inner.devices.len())
            .field("group_count", &inner.groups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::UpdateSource;
    use crate::model::Power;
    use crate::test_support::{device_caps, stamps};

    fn store_with_device(id: &str) -> (StateStore, DeviceId) {
        let store = StateStore::new();
        let device = DeviceId::new(id);
        store.add_device(
            device.clone(),
            "192.168.1.50",
            device_caps(),
            Some("RX-V685".into()),
            None,
        );
        (store, device)
    }

    #[test]
    fn test_add_device() {
        let (store, device) = store_with_device("D1");
        assert!(store.contains_device(&device));
        assert_eq!(store.device_count(), 1);
        assert_eq!(
            store.device_id_for_host("192.168.1.50"),
            Some(device.clone())
        );

        // unknown until first merge
        let snapshot = store.snapshot();
        let zone = &snapshot.device(&device).unwrap().zones[&ZoneId::Main];
        assert_eq!(zone.power, None);
        assert_eq!(zone.volume, None);
    }

    #[test]
    fn test_merge_reports_changed_fields() {
        let (store, device) = store_with_device("D1");
        let [s1, s2] = stamps(UpdateSource::Poll);

        let delta = ZoneDelta {
            power: Some(Power::On),
            volume: Some(20),
            ..Default::default()
        };
        let changed = store.merge_zone(&device, ZoneId::Main, &delta, s1).unwrap();
        assert_eq!(changed, ChangedFields::from(["power", "volume"]));

        // identical delta with a fresher stamp: no change
        let changed = store.merge_zone(&device, ZoneId::Main, &delta, s2).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn test_stale_delta_does_not_clobber() {
        let (store, device) = store_with_device("D1");
        let [s1, s2] = stamps(UpdateSource::Poll);

        // fresher push first
        let push = ZoneDelta {
            volume: Some(25),
            ..Default::default()
        };
        store
            .merge_zone(&device, ZoneId::Main, &push, Stamp::new(UpdateSource::Push, s2.received_at))
            .unwrap();

        // stale poll second
        let poll = ZoneDelta {
            volume: Some(20),
            ..Default::default()
        };
        let changed = store.merge_zone(&device, ZoneId::Main, &poll, s1).unwrap();
        assert!(changed.is_empty());

        let snapshot = store.snapshot();
        let zone = &snapshot.device(&device).unwrap().zones[&ZoneId::Main];
        assert_eq!(zone.volume, Some(25));
        assert_eq!(zone.last_update.unwrap().0, UpdateSource::Push);
    }

    #[test]
    fn test_absent_fields_untouched() {
        let (store, device) = store_with_device("D1");
        let [s1, s2] = stamps(UpdateSource::Poll);

        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    power: Some(Power::On),
                    volume: Some(20),
                    ..Default::default()
                },
                s1,
            )
            .unwrap();

        // event carrying only mute must not clear power/volume
        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    mute: Some(true),
                    ..Default::default()
                },
                Stamp::new(UpdateSource::Push, s2.received_at),
            )
            .unwrap();

        let snapshot = store.snapshot();
        let zone = &snapshot.device(&device).unwrap().zones[&ZoneId::Main];
        assert_eq!(zone.power, Some(Power::On));
        assert_eq!(zone.volume, Some(20));
        assert_eq!(zone.mute, Some(true));
    }

    #[test]
    fn test_out_of_range_volume_rejected() {
        let (store, device) = store_with_device("D1");
        let [s1, s2] = stamps(UpdateSource::Poll);

        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    volume: Some(40),
                    ..Default::default()
                },
                s1,
            )
            .unwrap();

        // device_caps advertises 0..=80
        let changed = store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    volume: Some(999),
                    ..Default::default()
                },
                s2,
            )
            .unwrap();
        assert!(changed.is_empty());

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.device(&device).unwrap().zones[&ZoneId::Main].volume,
            Some(40)
        );
    }

    #[test]
    fn test_unknown_input_rejected() {
        let (store, device) = store_with_device("D1");
        let [s1] = stamps(UpdateSource::Push);

        let changed = store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    input: Some("made_up_input".into()),
                    ..Default::default()
                },
                s1,
            )
            .unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn test_unknown_device_and_zone() {
        let (store, device) = store_with_device("D1");
        let [s1] = stamps(UpdateSource::Poll);

        let err = store
            .merge_zone(&DeviceId::new("nope"), ZoneId::Main, &ZoneDelta::default(), s1)
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownDevice(_)));

        // device_caps only advertises main and zone2
        let err = store
            .merge_zone(&device, ZoneId::Zone4, &ZoneDelta::default(), s1)
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownZone { .. }));
    }

    #[test]
    fn test_unreachable_flag_preserves_state() {
        let (store, device) = store_with_device("D1");
        let [s1] = stamps(UpdateSource::Poll);

        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    volume: Some(33),
                    ..Default::default()
                },
                s1,
            )
            .unwrap();

        let changed = store.set_unreachable(&device, true).unwrap();
        assert_eq!(changed, ChangedFields::from(["unreachable"]));
        // flipping again is a no-op
        assert!(store.set_unreachable(&device, true).unwrap().is_empty());

        let snapshot = store.snapshot();
        let record = snapshot.device(&device).unwrap();
        assert!(record.unreachable);
        assert_eq!(record.zones[&ZoneId::Main].volume, Some(33));

        let changed = store.set_unreachable(&device, false).unwrap();
        assert_eq!(changed, ChangedFields::from(["unreachable"]));
    }

    #[test]
    fn test_remove_device() {
        let (store, device) = store_with_device("D1");
        assert!(store.remove_device(&device));
        assert!(!store.contains_device(&device));
        assert_eq!(store.device_id_for_host("192.168.1.50"), None);
        assert!(!store.remove_device(&device));
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let (store, device) = store_with_device("D1");
        let [s1, s2] = stamps(UpdateSource::Poll);

        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    volume: Some(10),
                    ..Default::default()
                },
                s1,
            )
            .unwrap();
        let before = store.snapshot();

        store
            .merge_zone(
                &device,
                ZoneId::Main,
                &ZoneDelta {
                    volume: Some(11),
                    ..Default::default()
                },
                s2,
            )
            .unwrap();

        assert_eq!(before.device(&device).unwrap().zones[&ZoneId::Main].volume, Some(10));
        let after = store.snapshot();
        assert_eq!(after.device(&device).unwrap().zones[&ZoneId::Main].volume, Some(11));
    }
}

#[cfg(test)]
mod lww_props {
    //! Order-independence of per-field last-writer-wins.

    use proptest::prelude::*;

    use super::*;
    use crate::delta::UpdateSource;
    use crate::test_support::device_caps;
    use std::time::{Duration, Instant};

    fn merge_all(order: &[usize], updates: &[(i32, Stamp)]) -> Option<i32> {
        let store = StateStore::new();
        let device = DeviceId::new("D1");
        store.add_device(device.clone(), "h", device_caps(), None, None);
        for &index in order {
            let (volume, stamp) = updates[index];
            store
                .merge_zone(
                    &device,
                    ZoneId::Main,
                    &ZoneDelta {
                        volume: Some(volume),
                        ..Default::default()
                    },
                    stamp,
                )
                .unwrap();
        }
        store
            .snapshot()
            .device(&device)
            .unwrap()
            .zones[&ZoneId::Main]
            .volume
    }

    proptest! {
        /// For any interleaving of poll and push updates to one field with
        /// distinct receipt times, the final value is the one with the
        /// latest stamp, regardless of application order.
        #[test]
        fn lww_is_order_independent(
            volumes in proptest::collection::vec(0i32..=80, 1..6),
            sources in proptest::collection::vec(any::<bool>(), 6),
            shuffle in any::<u64>(),
        ) {
            let base = Instant::now();
            let updates: Vec<(i32, Stamp)> = volumes
                .iter()
                .enumerate()
                .map(|(index, &volume)| {
                    let source = if sources[index % sources.len()] {
                        UpdateSource::Poll
                    } else {
                        UpdateSource::Push
                    };
                    // distinct, strictly increasing receipt times
                    (volume, Stamp::new(source, base + Duration::from_millis(index as u64 + 1)))
                })
                .collect();

            let in_order: Vec<usize> = (0..updates.len()).collect();
            let mut shuffled = in_order.clone();
            // cheap deterministic shuffle driven by the seed
            let mut seed = shuffle;
            for i in (1..shuffled.len()).rev() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                shuffled.swap(i, (seed % (i as u64 + 1)) as usize);
            }

            let expected = updates.last().map(|(volume, _)| *volume);
            prop_assert_eq!(merge_all(&in_order, &updates), expected);
            prop_assert_eq!(merge_all(&shuffled, &updates), expected);
        }
    }
}
