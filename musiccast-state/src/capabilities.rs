//! Device and zone capability model.
//!
//! MusicCast devices describe themselves through `system/getFeatures`:
//! which zones exist, which functions each zone supports (`func_list`
//! strings), which inputs are selectable, and the volume range. Capabilities
//! are parsed and validated once at discovery so that unsupported zones and
//! inputs are rejected up front, and so merges can enforce the advertised
//! volume range later.
//!
//! The feature enums are a closed set. Firmware updates introduce new
//! `func_list` strings over time; unknown ones are logged at debug level and
//! skipped, which keeps discovery working against newer devices.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use musiccast_api::{Features, NameText, RangeStep};

use crate::error::{Result, StateError};
use crate::model::ZoneId;

/// Device-level function flags from the system `func_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFeature {
    WiredLan,
    WirelessLan,
    WirelessDirect,
    NetworkStandby,
    AutoPowerStandby,
    BluetoothStandby,
    Airplay,
    StereoPair,
    PartyMode,
    Headphone,
    SpeakerA,
    SpeakerB,
    Dimmer,
}

impl DeviceFeature {
    /// Map a `func_list` string to a feature flag.
    pub fn from_func(func: &str) -> Option<Self> {
        match func {
            "wired_lan" => Some(Self::WiredLan),
            "wireless_lan" => Some(Self::WirelessLan),
            "wireless_direct" => Some(Self::WirelessDirect),
            "network_standby" => Some(Self::NetworkStandby),
            "auto_power_standby" => Some(Self::AutoPowerStandby),
            "bluetooth_standby" => Some(Self::BluetoothStandby),
            "airplay" => Some(Self::Airplay),
            "stereo_pair" => Some(Self::StereoPair),
            "party_mode" => Some(Self::PartyMode),
            "headphone" => Some(Self::Headphone),
            "speaker_a" => Some(Self::SpeakerA),
            "speaker_b" => Some(Self::SpeakerB),
            "dimmer" => Some(Self::Dimmer),
            _ => None,
        }
    }
}

/// Zone-level function flags from a zone's `func_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneFeature {
    Power,
    Sleep,
    Volume,
    Mute,
    SoundProgram,
    Direct,
    PureDirect,
    Enhancer,
    ToneControl,
    Equalizer,
    Balance,
    DialogueLevel,
    ClearVoice,
    ExtraBass,
    AdaptiveDrc,
    SurrDecoderType,
    LinkControl,
    LinkAudioDelay,
    LinkAudioQuality,
}

impl ZoneFeature {
    pub fn from_func(func: &str) -> Option<Self> {
        match func {
            "power" => Some(Self::Power),
            "sleep" => Some(Self::Sleep),
            "volume" => Some(Self::Volume),
            "mute" => Some(Self::Mute),
            "sound_program" => Some(Self::SoundProgram),
            "direct" => Some(Self::Direct),
            "pure_direct" => Some(Self::PureDirect),
            "enhancer" => Some(Self::Enhancer),
            "tone_control" => Some(Self::ToneControl),
            "equalizer" => Some(Self::Equalizer),
            "balance" => Some(Self::Balance),
            "dialogue_level" => Some(Self::DialogueLevel),
            "clear_voice" => Some(Self::ClearVoice),
            "extra_bass" => Some(Self::ExtraBass),
            "adaptive_drc" => Some(Self::AdaptiveDrc),
            "surr_decoder_type" => Some(Self::SurrDecoderType),
            "link_control" => Some(Self::LinkControl),
            "link_audio_delay" => Some(Self::LinkAudioDelay),
            "link_audio_quality" => Some(Self::LinkAudioQuality),
            _ => None,
        }
    }
}

/// Volume range a zone advertises under `range_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl VolumeRange {
    pub fn contains(&self, volume: i32) -> bool {
        volume >= self.min && volume <= self.max
    }
}

/// Validated capabilities of one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCapabilities {
    pub id: ZoneId,
    /// Display name from `system/getNameText`, when available.
    pub name: Option<String>,
    pub features: HashSet<ZoneFeature>,
    /// Advertised volume range; present iff the zone has the volume function.
    pub volume: Option<VolumeRange>,
    /// Selectable input ids for this zone.
    pub inputs: Vec<String>,
}

impl ZoneCapabilities {
    pub fn supports(&self, feature: ZoneFeature) -> bool {
        self.features.contains(&feature)
    }

    pub fn has_input(&self, input: &str) -> bool {
        self.inputs.iter().any(|known| known == input)
    }
}

/// Validated capabilities of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub features: HashSet<DeviceFeature>,
    pub zones: BTreeMap<ZoneId, ZoneCapabilities>,
    /// Whether the device has the network playback (netusb) module.
    pub has_netusb: bool,
    /// Display names of inputs, keyed by input id.
    pub input_names: HashMap<String, String>,
}

impl DeviceCapabilities {
    /// Build capabilities from a `getFeatures` payload, optionally enriched
    /// with display names from `getNameText`.
    ///
    /// A device advertising no zones, or a zone id outside the protocol's
    /// zone namespace, is rejected here so the failure names the device
    /// instead of surfacing later on first use.
    pub fn from_features(features: &Features, names: Option<&NameText>) -> Result<Self> {
        let mut device_features = HashSet::new();
        for func in &features.system.func_list {
            match DeviceFeature::from_func(func) {
                Some(feature) => {
                    device_features.insert(feature);
                }
                None => {
                    tracing::debug!(func = func.as_str(), "ignoring unknown device function");
                }
            }
        }

        let zone_names: HashMap<&str, &str> = names
            .map(|names| {
                names
                    .zone_list
                    .iter()
                    .map(|entry| (entry.id.as_str(), entry.text.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let mut zones = BTreeMap::new();
        for zone in &features.zone {
            let id: ZoneId = zone
                .id
                .parse()
                .map_err(|_| StateError::UnsupportedZone(zone.id.clone()))?;

            let mut zone_features = HashSet::new();
            for func in &zone.func_list {
                match ZoneFeature::from_func(func) {
                    Some(feature) => {
                        zone_features.insert(feature);
                    }
                    None => {
                        tracing::debug!(
                            zone = zone.id.as_str(),
                            func = func.as_str(),
                            "ignoring unknown zone function"
                        );
                    }
                }
            }

            let volume = if zone_features.contains(&ZoneFeature::Volume) {
                Some(volume_range(&zone.range_step).ok_or_else(|| {
                    StateError::InvalidCapabilities(format!(
                        "zone {} advertises volume but no volume range",
                        zone.id
                    ))
                })?)
            } else {
                None
            };

            zones.insert(
                id,
                ZoneCapabilities {
                    id,
                    name: zone_names.get(zone.id.as_str()).map(|s| s.to_string()),
                    features: zone_features,
                    volume,
                    inputs: zone.input_list.clone(),
                },
            );
        }

        if zones.is_empty() {
            return Err(StateError::InvalidCapabilities(
                "device advertises no zones".to_string(),
            ));
        }

        let input_names = names
            .map(|names| {
                names
                    .input_list
                    .iter()
                    .map(|entry| (entry.id.clone(), entry.text.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            features: device_features,
            zones,
            has_netusb: features
                .netusb
                .as_ref()
                .map(|netusb| !netusb.func_list.is_empty())
                .unwrap_or(false),
            input_names,
        })
    }

    pub fn zone(&self, id: ZoneId) -> Option<&ZoneCapabilities> {
        self.zones.get(&id)
    }

    pub fn zone_ids(&self) -> impl Iterator<Item = ZoneId> + '_ {
        self.zones.keys().copied()
    }
}

fn volume_range(ranges: &[RangeStep]) -> Option<VolumeRange> {
    ranges
        .iter()
        .find(|range| range.id == "volume")
        .map(|range| VolumeRange {
            min: range.min,
            max: range.max,
            step: range.step,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_features(json: &str) -> Features {
        serde_json::from_str(json).unwrap()
    }

    const TWO_ZONE_FEATURES: &str = r#"{
        "response_code": 0,
        "system": {
            "func_list": ["wired_lan", "party_mode", "hypothetical_future_func"],
            "input_list": [{"id": "net_radio", "distribution_enable": true}]
        },
        "zone": [
            {
                "id": "main",
                "func_list": ["power", "volume", "mute", "warp_drive"],
                "input_list": ["net_radio", "aux"],
                "range_step": [{"id": "volume", "min": 0, "max": 80, "step": 1}]
            },
            {
                "id": "zone2",
                "func_list": ["power"],
                "input_list": ["aux"],
                "range_step": []
            }
        ],
        "netusb": {"func_list": ["play_queue"]}
    }"#;

    #[test]
    fn test_from_features() {
        let caps = DeviceCapabilities::from_features(&sample_features(TWO_ZONE_FEATURES), None)
            .unwrap();

        assert!(caps.features.contains(&DeviceFeature::PartyMode));
        assert_eq!(caps.zones.len(), 2);
        assert!(caps.has_netusb);

        let main = caps.zone(ZoneId::Main).unwrap();
        assert!(main.supports(ZoneFeature::Volume));
        assert_eq!(main.volume, Some(VolumeRange { min: 0, max: 80, step: 1 }));
        assert!(main.has_input("aux"));
        assert!(!main.has_input("tuner"));

        // zone2 has no volume function and thus no range
        let zone2 = caps.zone(ZoneId::Zone2).unwrap();
        assert!(zone2.volume.is_none());
    }

    #[test]
    fn test_unknown_funcs_skipped() {
        let caps = DeviceCapabilities::from_features(&sample_features(TWO_ZONE_FEATURES), None)
            .unwrap();
        // "hypothetical_future_func" and "warp_drive" are silently dropped
        assert_eq!(caps.features.len(), 2);
        assert_eq!(caps.zone(ZoneId::Main).unwrap().features.len(), 3);
    }

    #[test]
    fn test_unsupported_zone_rejected() {
        let json = r#"{
            "response_code": 0,
            "zone": [{"id": "zone9", "func_list": ["power"], "input_list": []}]
        }"#;
        let err = DeviceCapabilities::from_features(&sample_features(json), None).unwrap_err();
        assert!(matches!(err, StateError::UnsupportedZone(ref id) if id == "zone9"));
    }

    #[test]
    fn test_no_zones_rejected() {
        let json = r#"{"response_code": 0, "zone": []}"#;
        let err = DeviceCapabilities::from_features(&sample_features(json), None).unwrap_err();
        assert!(matches!(err, StateError::InvalidCapabilities(_)));
    }

    #[test]
    fn test_volume_without_range_rejected() {
        let json = r#"{
            "response_code": 0,
            "zone": [{"id": "main", "func_list": ["volume"], "input_list": [], "range_step": []}]
        }"#;
        let err = DeviceCapabilities::from_features(&sample_features(json), None).unwrap_err();
        assert!(matches!(err, StateError::InvalidCapabilities(_)));
    }

    #[test]
    fn test_zone_names_applied() {
        let names: NameText = serde_json::from_str(
            r#"{
                "response_code": 0,
                "zone_list": [{"id": "main", "text": "Living Room"}],
                "input_list": [{"id": "net_radio", "text": "Net Radio"}]
            }"#,
        )
        .unwrap();
        let caps =
            DeviceCapabilities::from_features(&sample_features(TWO_ZONE_FEATURES), Some(&names))
                .unwrap();
        assert_eq!(
            caps.zone(ZoneId::Main).unwrap().name.as_deref(),
            Some("Living Room")
        );
        assert_eq!(caps.input_names.get("net_radio").unwrap(), "Net Radio");
    }
}
