//! Typed client for the YamahaExtendedControl v1 HTTP API.
//!
//! MusicCast devices expose a JSON-over-HTTP control surface rooted at
//! `/YamahaExtendedControl/v1/`. This crate is the pure I/O boundary of the
//! SDK: it builds requests, checks the device's `response_code`, and hands
//! back wire-level payload structs. It holds no state and makes no
//! reconciliation decisions.
//!
//! # Example
//!
//! ```rust,ignore
//! use musiccast_api::DeviceClient;
//!
//! let client = DeviceClient::new("192.168.1.50")?;
//! let status = client.zone_status("main").await?;
//! println!("power: {:?}, volume: {:?}", status.power, status.volume);
//! ```

mod client;
mod endpoint;
mod error;
mod types;

pub use client::DeviceClient;
pub use endpoint::{PLAYBACK, ZONES};
pub use error::{response_code_meaning, ApiError, Result};
pub use types::{
    Ack, DeviceInfo, DistClient, DistributionInfo, Features, NameEntry, NameText, NetUsbFeatures,
    NetworkStatus, PlayInfo, RangeStep, SystemFeatures, SystemInput, ZoneFeatures, ZoneStatus,
};

/// The group id a device reports when it is not part of any group.
pub const NULL_GROUP_ID: &str = "00000000000000000000000000000000";

/// The input id a zone shows while it plays a multi-room link stream.
pub const MC_LINK_INPUT: &str = "mc_link";
