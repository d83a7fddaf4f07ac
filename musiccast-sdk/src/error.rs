use thiserror::Error;

use musiccast_state::{DeviceId, ZoneId};

/// Errors surfaced by the engine and device handles
#[derive(Error, Debug)]
pub enum EngineError {
    /// HTTP API failure
    #[error(transparent)]
    Api(#[from] musiccast_api::ApiError),

    /// UDP listener failure
    #[error(transparent)]
    Listener(#[from] event_listener::ListenerError),

    /// State/store failure
    #[error(transparent)]
    State(#[from] musiccast_state::StateError),

    /// `start` called on an engine that is already running
    #[error("engine already running")]
    AlreadyRunning,

    /// An operation that needs a running engine was called while stopped
    #[error("engine not running")]
    NotRunning,

    /// The named device is not tracked
    #[error("device {0} is not tracked")]
    UnknownDevice(DeviceId),

    /// The device (or zone) does not advertise the capability a command needs
    #[error("device {device} zone {zone:?} does not support {capability}")]
    Unsupported {
        device: DeviceId,
        zone: Option<ZoneId>,
        capability: &'static str,
    },

    /// A volume command outside the zone's advertised range
    #[error("volume {volume} outside advertised range {min}..={max}")]
    VolumeOutOfRange { volume: i32, min: i32, max: i32 },

    /// An input not in the zone's capability list
    #[error("input {input:?} is not selectable on device {device} zone {zone}")]
    UnknownInput {
        device: DeviceId,
        zone: ZoneId,
        input: String,
    },
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
