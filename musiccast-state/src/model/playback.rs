//! Playback state and track metadata

use serde::{Deserialize, Serialize};

/// Current playback state of the device's network playback module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Play,
    Pause,
    Stop,
}

impl PlaybackState {
    /// Parse a device-reported playback string.
    ///
    /// Seek states (`fast_forward`, `fast_reverse`) count as playing;
    /// unrecognized values yield `None` rather than a guessed state.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "play" | "fast_forward" | "fast_reverse" => Some(PlaybackState::Play),
            "pause" => Some(PlaybackState::Pause),
            "stop" => Some(PlaybackState::Stop),
            _ => None,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Play)
    }
}

/// Metadata of the currently playing track.
///
/// Compared as a unit for change detection: any field changing counts as a
/// track change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<String>,
    pub albumart_url: Option<String>,
}

impl TrackInfo {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.album.is_none()
            && self.track.is_none()
            && self.albumart_url.is_none()
    }
}
