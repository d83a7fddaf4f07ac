use thiserror::Error;

use crate::model::{DeviceId, ZoneId};

/// Errors that can occur in state management
#[derive(Error, Debug)]
pub enum StateError {
    /// A merge or query named a device the store does not track
    #[error("device {0} is not tracked")]
    UnknownDevice(DeviceId),

    /// A merge or query named a zone the device does not advertise
    #[error("device {device} has no zone {zone}")]
    UnknownZone { device: DeviceId, zone: ZoneId },

    /// Discovery reported a zone id outside the protocol's zone namespace
    #[error("unsupported zone id {0:?}")]
    UnsupportedZone(String),

    /// Discovery produced a capability set that cannot be validated
    #[error("invalid capabilities: {0}")]
    InvalidCapabilities(String),
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;
