//! Datagram parsing.
//!
//! MusicCast devices push small JSON datagrams describing what changed.
//! A single datagram may touch several sub-resources at once:
//!
//! ```json
//! {
//!   "main": {"volume": 42, "power": "on", "play_info_updated": true},
//!   "netusb": {"play_time": 61},
//!   "dist": {"dist_info_updated": true},
//!   "device_id": "00A0DEADBEEF"
//! }
//! ```
//!
//! Zone objects carry direct field deltas plus `*_updated` hints that mean
//! "re-fetch this resource"; the datagram never carries full state. Keys we
//! do not recognize are ignored, so firmware additions keep parsing.

use serde::Deserialize;

use musiccast_state::{Power, ZoneDelta, ZoneId};

/// One structured event extracted from a datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Direct field changes for a zone.
    ZoneChanged { zone: ZoneId, delta: ZoneDelta },
    /// The device asks us to re-fetch the zone's status.
    ZoneInvalidated { zone: ZoneId },
    /// Playback position moved.
    PlaybackProgress { play_time: i64 },
    /// The device asks us to re-fetch playback info.
    PlaybackInvalidated,
    /// The device asks us to re-fetch distribution (group) info.
    DistributionInvalidated,
}

/// A parsed datagram: the embedded device id (when present) and the events
/// it carried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDatagram {
    pub device_id: Option<String>,
    pub events: Vec<DeviceEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatagram {
    device_id: Option<String>,
    main: Option<RawZoneEvent>,
    zone2: Option<RawZoneEvent>,
    zone3: Option<RawZoneEvent>,
    zone4: Option<RawZoneEvent>,
    netusb: Option<RawNetUsbEvent>,
    dist: Option<RawDistEvent>,
}

#[derive(Debug, Default, Deserialize)]
struct RawZoneEvent {
    power: Option<String>,
    volume: Option<i32>,
    mute: Option<bool>,
    input: Option<String>,
    #[serde(default)]
    status_updated: bool,
    #[serde(default)]
    play_info_updated: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawNetUsbEvent {
    #[serde(default)]
    play_info_updated: bool,
    play_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDistEvent {
    #[serde(default)]
    dist_info_updated: bool,
}

/// Parse one datagram payload into zero or more events.
///
/// Returns `Err` only when the payload is not a JSON object at all; a valid
/// object with nothing we recognize parses to an empty event list.
pub fn parse_datagram(payload: &[u8]) -> Result<ParsedDatagram, serde_json::Error> {
    let raw: RawDatagram = serde_json::from_slice(payload)?;
    let mut events = Vec::new();

    let zones = [
        (ZoneId::Main, raw.main),
        (ZoneId::Zone2, raw.zone2),
        (ZoneId::Zone3, raw.zone3),
        (ZoneId::Zone4, raw.zone4),
    ];
    for (zone, raw_zone) in zones {
        let Some(raw_zone) = raw_zone else { continue };

        let power = raw_zone.power.as_deref().and_then(|value| {
            let parsed = Power::parse(value);
            if parsed.is_none() {
                tracing::debug!(zone = %zone, power = value, "unrecognized power in event");
            }
            parsed
        });
        let delta = ZoneDelta {
            power,
            volume: raw_zone.volume,
            mute: raw_zone.mute,
            input: raw_zone.input,
            sleep: None,
        };
        if !delta.is_empty() {
            events.push(DeviceEvent::ZoneChanged { zone, delta });
        }
        if raw_zone.status_updated || raw_zone.play_info_updated {
            events.push(DeviceEvent::ZoneInvalidated { zone });
        }
    }

    if let Some(netusb) = raw.netusb {
        if let Some(play_time) = netusb.play_time {
            events.push(DeviceEvent::PlaybackProgress { play_time });
        }
        if netusb.play_info_updated {
            events.push(DeviceEvent::PlaybackInvalidated);
        }
    }

    if let Some(dist) = raw.dist {
        if dist.dist_info_updated {
            events.push(DeviceEvent::DistributionInvalidated);
        }
    }

    Ok(ParsedDatagram {
        device_id: raw.device_id,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_delta_event() {
        let parsed = parse_datagram(
            br#"{"device_id":"ABC","main":{"volume":25,"power":"on","mute":false}}"#,
        )
        .unwrap();
        assert_eq!(parsed.device_id.as_deref(), Some("ABC"));
        assert_eq!(parsed.events.len(), 1);
        match &parsed.events[0] {
            DeviceEvent::ZoneChanged { zone, delta } => {
                assert_eq!(*zone, ZoneId::Main);
                assert_eq!(delta.volume, Some(25));
                assert_eq!(delta.power, Some(Power::On));
                assert_eq!(delta.mute, Some(false));
                assert_eq!(delta.input, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_multiple_subresources_in_one_datagram() {
        let parsed = parse_datagram(
            br#"{
                "main": {"volume": 10, "play_info_updated": true},
                "zone2": {"power": "standby"},
                "netusb": {"play_time": 61, "play_info_updated": true},
                "dist": {"dist_info_updated": true}
            }"#,
        )
        .unwrap();

        assert_eq!(parsed.events.len(), 6);
        assert!(parsed
            .events
            .contains(&DeviceEvent::ZoneInvalidated { zone: ZoneId::Main }));
        assert!(parsed
            .events
            .contains(&DeviceEvent::PlaybackProgress { play_time: 61 }));
        assert!(parsed.events.contains(&DeviceEvent::PlaybackInvalidated));
        assert!(parsed.events.contains(&DeviceEvent::DistributionInvalidated));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let parsed = parse_datagram(
            br#"{"system":{"func_status_updated":true},"tuner":{"play_info_updated":true}}"#,
        )
        .unwrap();
        assert!(parsed.events.is_empty());
    }

    #[test]
    fn test_status_updated_hint() {
        let parsed = parse_datagram(br#"{"main":{"status_updated":true}}"#).unwrap();
        assert_eq!(
            parsed.events,
            vec![DeviceEvent::ZoneInvalidated { zone: ZoneId::Main }]
        );
    }

    #[test]
    fn test_unrecognized_power_dropped_from_delta() {
        let parsed = parse_datagram(br#"{"main":{"power":"booting","volume":5}}"#).unwrap();
        match &parsed.events[0] {
            DeviceEvent::ZoneChanged { delta, .. } => {
                assert_eq!(delta.power, None);
                assert_eq!(delta.volume, Some(5));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload() {
        assert!(parse_datagram(b"not json").is_err());
        assert!(parse_datagram(&[0xff, 0xfe]).is_err());
    }
}
