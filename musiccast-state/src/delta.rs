//! Field-level deltas and their provenance stamps.
//!
//! Both poll results and push events enter the store as deltas: a set of
//! optional field values plus a [`Stamp`] recording where the values came
//! from and when they were received locally. Fields left `None` are
//! untouched by a merge, never cleared.

use std::time::Instant;

use musiccast_api::{PlayInfo, ZoneStatus};

use crate::model::{PlaybackState, Power, TrackInfo};

/// Stable field keys used in changed-field sets and filters.
pub mod fields {
    pub const POWER: &str = "power";
    pub const VOLUME: &str = "volume";
    pub const MUTE: &str = "mute";
    pub const INPUT: &str = "input";
    pub const SLEEP: &str = "sleep";

    pub const PLAYBACK_STATE: &str = "playback_state";
    pub const TRACK: &str = "track";
    pub const PLAY_TIME: &str = "play_time";
    pub const TOTAL_TIME: &str = "total_time";

    pub const UNREACHABLE: &str = "unreachable";

    pub const GROUP_ADDED: &str = "added";
    pub const GROUP_REMOVED: &str = "removed";
    pub const GROUP_LEADER: &str = "leader";
    pub const GROUP_MEMBERS: &str = "members";
    pub const GROUP_NAME: &str = "name";
    pub const GROUP_SERVER_ZONE: &str = "server_zone";
}

/// Where a delta was produced.
///
/// Polls and push events have equal authority; the stamp's receipt time is
/// what decides conflicts (see the store's merge rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Poll,
    Push,
}

/// Provenance of a delta: source kind plus local receipt time.
///
/// Receipt times are monotonic `Instant`s taken at the poller or the UDP
/// listener. Device-side clocks are never consulted; tracked devices have no
/// synchronized time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub source: UpdateSource,
    pub received_at: Instant,
}

impl Stamp {
    pub fn new(source: UpdateSource, received_at: Instant) -> Self {
        Self {
            source,
            received_at,
        }
    }

    /// Stamp a delta received right now.
    pub fn now(source: UpdateSource) -> Self {
        Self::new(source, Instant::now())
    }
}

/// Delta for one zone's fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneDelta {
    pub power: Option<Power>,
    pub volume: Option<i32>,
    pub mute: Option<bool>,
    pub input: Option<String>,
    pub sleep: Option<u32>,
}

impl ZoneDelta {
    /// Interpret a polled `getStatus` payload.
    ///
    /// Unparseable power strings are dropped from the delta (logged), not
    /// guessed at.
    pub fn from_status(status: &ZoneStatus) -> Self {
        let power = status.power.as_deref().and_then(|raw| {
            let parsed = Power::parse(raw);
            if parsed.is_none() {
                tracing::warn!(power = raw, "unrecognized power state in zone status");
            }
            parsed
        });
        Self {
            power,
            volume: status.volume,
            mute: status.mute,
            input: status.input.clone(),
            sleep: status.sleep,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.volume.is_none()
            && self.mute.is_none()
            && self.input.is_none()
            && self.sleep.is_none()
    }
}

/// Delta for the device's playback module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackDelta {
    pub state: Option<PlaybackState>,
    pub track: Option<TrackInfo>,
    pub play_time: Option<i64>,
    pub total_time: Option<i64>,
}

impl PlaybackDelta {
    /// Interpret a polled `getPlayInfo` payload.
    pub fn from_play_info(info: &PlayInfo) -> Self {
        let state = info.playback.as_deref().and_then(|raw| {
            let parsed = PlaybackState::parse(raw);
            if parsed.is_none() {
                tracing::warn!(playback = raw, "unrecognized playback state in play info");
            }
            parsed
        });

        // A play info payload always describes the full track slot, so an
        // all-empty TrackInfo is still a value ("nothing playing").
        let track = Some(TrackInfo {
            artist: info.artist.clone(),
            album: info.album.clone(),
            track: info.track.clone(),
            albumart_url: info.albumart_url.clone(),
        });

        Self {
            state,
            track,
            play_time: info.play_time,
            total_time: info.total_time,
        }
    }

    /// Delta carrying only a playback progress update.
    pub fn progress(play_time: i64) -> Self {
        Self {
            play_time: Some(play_time),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_delta_from_status() {
        let status: ZoneStatus = serde_json::from_str(
            r#"{"response_code":0,"power":"on","volume":31,"mute":false,"input":"aux"}"#,
        )
        .unwrap();
        let delta = ZoneDelta::from_status(&status);
        assert_eq!(delta.power, Some(Power::On));
        assert_eq!(delta.volume, Some(31));
        assert_eq!(delta.mute, Some(false));
        assert_eq!(delta.input.as_deref(), Some("aux"));
        assert_eq!(delta.sleep, None);
    }

    #[test]
    fn test_unparseable_power_dropped() {
        let status: ZoneStatus =
            serde_json::from_str(r#"{"response_code":0,"power":"warming_up"}"#).unwrap();
        let delta = ZoneDelta::from_status(&status);
        assert_eq!(delta.power, None);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_playback_delta_from_play_info() {
        let info: PlayInfo = serde_json::from_str(
            r#"{"response_code":0,"playback":"play","artist":"A","track":"T","play_time":12,"total_time":180}"#,
        )
        .unwrap();
        let delta = PlaybackDelta::from_play_info(&info);
        assert_eq!(delta.state, Some(PlaybackState::Play));
        let track = delta.track.unwrap();
        assert_eq!(track.artist.as_deref(), Some("A"));
        assert_eq!(track.album, None);
        assert_eq!(delta.play_time, Some(12));
    }

    #[test]
    fn test_progress_delta_touches_only_play_time() {
        let delta = PlaybackDelta::progress(42);
        assert_eq!(delta.play_time, Some(42));
        assert_eq!(delta.state, None);
        assert_eq!(delta.track, None);
        assert_eq!(delta.total_time, None);
    }
}
