//! URL construction for the YamahaExtendedControl v1 endpoint tree.
//!
//! Every MusicCast device serves the same HTTP API rooted at
//! `/YamahaExtendedControl/v1/`. Zone endpoints embed the zone id in the
//! path (`/main/getStatus`, `/zone2/setVolume?...`); system, netusb and
//! dist endpoints are fixed paths.

use crate::error::{ApiError, Result};

/// The zone ids a MusicCast device can expose. Devices advertise a subset.
pub const ZONES: [&str; 4] = ["main", "zone2", "zone3", "zone4"];

/// Playback commands accepted by `netusb/setPlayback`.
pub const PLAYBACK: [&str; 10] = [
    "play",
    "stop",
    "pause",
    "play_pause",
    "previous",
    "next",
    "fast_reverse_start",
    "fast_reverse_end",
    "fast_forward_start",
    "fast_forward_end",
];

pub(crate) fn base(host: &str) -> String {
    format!("http://{host}/YamahaExtendedControl/v1")
}

pub(crate) fn system(host: &str, op: &str) -> String {
    format!("{}/system/{op}", base(host))
}

pub(crate) fn netusb(host: &str, op: &str) -> String {
    format!("{}/netusb/{op}", base(host))
}

pub(crate) fn dist(host: &str, op: &str) -> String {
    format!("{}/dist/{op}", base(host))
}

pub(crate) fn zone(host: &str, zone_id: &str, op: &str) -> Result<String> {
    check_zone(zone_id)?;
    Ok(format!("{}/{zone_id}/{op}", base(host)))
}

pub(crate) fn check_zone(zone_id: &str) -> Result<()> {
    if ZONES.contains(&zone_id) {
        Ok(())
    } else {
        Err(ApiError::InvalidParam(format!("unknown zone {zone_id:?}")))
    }
}

pub(crate) fn check_playback(action: &str) -> Result<()> {
    if PLAYBACK.contains(&action) {
        Ok(())
    } else {
        Err(ApiError::InvalidParam(format!(
            "unknown playback action {action:?}"
        )))
    }
}
