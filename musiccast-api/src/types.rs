//! Wire-level payload types for YamahaExtendedControl responses.
//!
//! These structs mirror the JSON the device sends, stringly typed where the
//! protocol is. Interpreting them into domain state (typed power/playback
//! enums, validated inputs, volume ranges) is the consumer's job. Fields the
//! device may omit are `Option` and unknown fields are ignored, so payloads
//! from newer firmware keep parsing.

use serde::Deserialize;

/// Minimal acknowledgment: every YXC response carries a `response_code`.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    pub response_code: u32,
}

/// `system/getDeviceInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub response_code: u32,
    pub device_id: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub system_version: Option<f64>,
    #[serde(default)]
    pub api_version: Option<f64>,
}

/// `system/getNetworkStatus` (subset)
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkStatus {
    pub response_code: u32,
    #[serde(default)]
    pub network_name: Option<String>,
}

/// One `{id, text}` entry of `system/getNameText`.
#[derive(Debug, Clone, Deserialize)]
pub struct NameEntry {
    pub id: String,
    pub text: String,
}

/// `system/getNameText` without an `id` filter
#[derive(Debug, Clone, Deserialize)]
pub struct NameText {
    pub response_code: u32,
    #[serde(default)]
    pub zone_list: Vec<NameEntry>,
    #[serde(default)]
    pub input_list: Vec<NameEntry>,
}

/// A `{min, max, step}` range advertised under `range_step`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeStep {
    pub id: String,
    pub min: i32,
    pub max: i32,
    #[serde(default = "default_step")]
    pub step: i32,
}

fn default_step() -> i32 {
    1
}

/// One input as advertised in the system feature block.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemInput {
    pub id: String,
    #[serde(default)]
    pub distribution_enable: bool,
    #[serde(default)]
    pub play_info_type: Option<String>,
}

/// The `system` block of `system/getFeatures`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemFeatures {
    #[serde(default)]
    pub func_list: Vec<String>,
    #[serde(default)]
    pub input_list: Vec<SystemInput>,
}

/// One zone block of `system/getFeatures`.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneFeatures {
    pub id: String,
    #[serde(default)]
    pub func_list: Vec<String>,
    #[serde(default)]
    pub input_list: Vec<String>,
    #[serde(default)]
    pub range_step: Vec<RangeStep>,
}

/// The `netusb` block of `system/getFeatures` (presence implies the module).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetUsbFeatures {
    #[serde(default)]
    pub func_list: Vec<String>,
}

/// `system/getFeatures`
#[derive(Debug, Clone, Deserialize)]
pub struct Features {
    pub response_code: u32,
    #[serde(default)]
    pub system: SystemFeatures,
    #[serde(default)]
    pub zone: Vec<ZoneFeatures>,
    #[serde(default)]
    pub netusb: Option<NetUsbFeatures>,
}

/// `<zone>/getStatus`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ZoneStatus {
    pub response_code: u32,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub volume: Option<i32>,
    #[serde(default)]
    pub max_volume: Option<i32>,
    #[serde(default)]
    pub mute: Option<bool>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub sleep: Option<u32>,
}

/// `netusb/getPlayInfo`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayInfo {
    pub response_code: u32,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub playback: Option<String>,
    #[serde(default)]
    pub repeat: Option<String>,
    #[serde(default)]
    pub shuffle: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub albumart_url: Option<String>,
    #[serde(default)]
    pub play_time: Option<i64>,
    #[serde(default)]
    pub total_time: Option<i64>,
}

/// One client entry of `dist/getDistributionInfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct DistClient {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
}

/// `dist/getDistributionInfo`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistributionInfo {
    pub response_code: u32,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub server_zone: Option<String>,
    #[serde(default)]
    pub client_list: Vec<DistClient>,
}
