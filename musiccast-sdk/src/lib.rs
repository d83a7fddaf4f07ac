//! Live state synchronization for MusicCast multi-room audio devices.
//!
//! MusicCast devices expose a JSON HTTP control API and push unsolicited
//! change notifications over UDP. This crate combines both into one coherent
//! live view: a [`MusicCastEngine`] polls every tracked device on its own
//! cadence, listens for pushes on a shared UDP socket, reconciles the two
//! feeds through per-field last-writer-wins merging, derives multi-room
//! group topology from the devices' (possibly disagreeing) reports, and
//! notifies subscribers exactly once per observed change.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use musiccast_sdk::{EngineConfig, MusicCastEngine};
//! use musiccast_state::{ChangeFilter, ZoneId};
//!
//! let mut config = EngineConfig::default();
//! config.devices.push("192.168.1.50".into());
//!
//! let mut engine = MusicCastEngine::new(config);
//! let mut changes = engine.subscribe(ChangeFilter::all());
//! engine.start().await?;
//!
//! while let Some(change) = changes.recv().await {
//!     println!(
//!         "{} {:?}: {:?}",
//!         change.device_id, change.resource, change.changed_fields
//!     );
//!     if let Some(device) = change.snapshot.device(&change.device_id) {
//!         println!("  volume now {:?}", device.zones[&ZoneId::Main].volume);
//!     }
//! }
//! ```
//!
//! # Commands
//!
//! ```rust,ignore
//! let handle = engine.device(&device_id)?;
//! handle.set_volume(ZoneId::Main, 42).await?;
//! handle.group_join(ZoneId::Main, group_id, "192.168.1.50").await?;
//! ```
//!
//! Commands never write local state; the device's own notification (or the
//! next poll) is what updates the store.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
mod poller;
pub mod reconciler;
pub mod transport;

pub use config::{BackoffConfig, DeviceEntry, EngineConfig, DEFAULT_EVENT_PORT};
pub use engine::{DeviceHandle, MusicCastEngine, PlaybackCommand};
pub use error::{EngineError, Result};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};
pub use reconciler::{ReconcileInput, Reconciler, SourceMap};
pub use transport::StatusSource;

// The state crate is the vocabulary of the public API; re-export it whole.
pub use musiccast_state as state;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{DeviceHandle, MusicCastEngine, PlaybackCommand};
    pub use crate::error::{EngineError, Result};
    pub use musiccast_state::{
        ChangeFilter, ChangeNotification, DeviceId, GroupId, Power, Resource, Snapshot, ZoneId,
    };
}
