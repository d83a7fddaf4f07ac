//! Async HTTP client for one MusicCast device.
//!
//! `DeviceClient` wraps a `reqwest::Client` and the device's host address.
//! Every call hits the YamahaExtendedControl v1 API and returns a typed
//! payload after checking the device's `response_code`. A client is cheap to
//! clone; clones share the underlying connection pool.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::endpoint;
use crate::error::{response_code_meaning, ApiError, Result};
use crate::types::{
    Ack, DeviceInfo, DistributionInfo, Features, NameText, NetworkStatus, PlayInfo, ZoneStatus,
};

/// Request timeout; MusicCast devices answer well under a second on a LAN.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const APP_NAME: &str = "MusicCast/1.0";

/// Sleep timer values the protocol accepts, in minutes.
const SLEEP_STEPS: [u32; 5] = [0, 30, 60, 90, 120];

/// Async client for a single device's YamahaExtendedControl API.
///
/// # Example
///
/// ```rust,ignore
/// let client = DeviceClient::new("192.168.1.50")?;
/// let info = client.device_info().await?;
/// println!("{} ({})", info.device_id, info.model_name.as_deref().unwrap_or("?"));
/// ```
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    host: String,
    /// UDP port for unsolicited notifications; 0 means "not registered".
    notify_port: Arc<AtomicU32>,
}

impl DeviceClient {
    /// Create a client for the device at `host` (IP or hostname).
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        url::Url::parse(&format!("http://{host}/")).map_err(|source| ApiError::InvalidHost {
            host: host.clone(),
            source,
        })?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_http(http, host))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    ///
    /// Useful when many devices should share one connection pool, and for
    /// tests that need custom client configuration.
    pub fn with_http(http: reqwest::Client, host: impl Into<String>) -> Self {
        Self {
            http,
            host: host.into(),
            notify_port: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The host this client talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Register the local UDP port for unsolicited notifications.
    ///
    /// Once set, every request carries `X-AppName`/`X-AppPort` headers; the
    /// device records the sender address + port as a notification sink.
    /// Regular polling keeps the registration alive on the device side.
    pub fn set_notification_port(&self, port: u16) {
        self.notify_port.store(u32::from(port), Ordering::Relaxed);
    }

    /// Drop the notification registration headers from future requests.
    pub fn clear_notification_port(&self) {
        self.notify_port.store(0, Ordering::Relaxed);
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let port = self.notify_port.load(Ordering::Relaxed);
        if port != 0 {
            headers.insert("X-AppName", HeaderValue::from_static(APP_NAME));
            if let Ok(value) = HeaderValue::from_str(&port.to_string()) {
                headers.insert("X-AppPort", value);
            }
        }
        headers
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let response = self.http.get(&url).headers(self.headers()).send().await?;
        let value: serde_json::Value = response.json().await?;
        check_response_code(&value)?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            endpoint: url,
            source,
        })
    }

    async fn post_json(&self, url: String, body: serde_json::Value) -> Result<Ack> {
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;
        let value: serde_json::Value = response.json().await?;
        check_response_code(&value)?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            endpoint: url,
            source,
        })
    }

    // ========================================================================
    // system
    // ========================================================================

    pub async fn device_info(&self) -> Result<DeviceInfo> {
        self.get_json(endpoint::system(&self.host, "getDeviceInfo"))
            .await
    }

    pub async fn features(&self) -> Result<Features> {
        self.get_json(endpoint::system(&self.host, "getFeatures"))
            .await
    }

    pub async fn network_status(&self) -> Result<NetworkStatus> {
        self.get_json(endpoint::system(&self.host, "getNetworkStatus"))
            .await
    }

    /// Display names for zones and inputs.
    pub async fn name_text(&self) -> Result<NameText> {
        self.get_json(endpoint::system(&self.host, "getNameText"))
            .await
    }

    // ========================================================================
    // zone
    // ========================================================================

    pub async fn zone_status(&self, zone: &str) -> Result<ZoneStatus> {
        let url = endpoint::zone(&self.host, zone, "getStatus")?;
        self.get_json(url).await
    }

    /// `power` is `"on"`, `"standby"` or `"toggle"`.
    pub async fn set_power(&self, zone: &str, power: &str) -> Result<Ack> {
        if !["on", "standby", "toggle"].contains(&power) {
            return Err(ApiError::InvalidParam(format!(
                "unknown power value {power:?}"
            )));
        }
        let url = endpoint::zone(&self.host, zone, &format!("setPower?power={power}"))?;
        self.get_json(url).await
    }

    /// Set an absolute volume in device units.
    pub async fn set_volume(&self, zone: &str, volume: i32) -> Result<Ack> {
        let url = endpoint::zone(&self.host, zone, &format!("setVolume?volume={volume}"))?;
        self.get_json(url).await
    }

    /// Step the volume `"up"` or `"down"`, optionally by a given step count.
    pub async fn set_volume_step(
        &self,
        zone: &str,
        direction: &str,
        step: Option<u32>,
    ) -> Result<Ack> {
        if !["up", "down"].contains(&direction) {
            return Err(ApiError::InvalidParam(format!(
                "unknown volume direction {direction:?}"
            )));
        }
        let op = match step {
            Some(step) => format!("setVolume?volume={direction}&step={step}"),
            None => format!("setVolume?volume={direction}"),
        };
        let url = endpoint::zone(&self.host, zone, &op)?;
        self.get_json(url).await
    }

    pub async fn set_mute(&self, zone: &str, enable: bool) -> Result<Ack> {
        let url = endpoint::zone(&self.host, zone, &format!("setMute?enable={enable}"))?;
        self.get_json(url).await
    }

    /// Select an input. `mode` is usually empty; `"autoplay_disabled"`
    /// suppresses the device's autoplay behavior on switch.
    pub async fn set_input(&self, zone: &str, input: &str, mode: &str) -> Result<Ack> {
        let url = endpoint::zone(
            &self.host,
            zone,
            &format!("setInput?input={input}&mode={mode}"),
        )?;
        self.get_json(url).await
    }

    /// Set the sleep timer; `sleep` is minutes and must be one of 0/30/60/90/120.
    pub async fn set_sleep(&self, zone: &str, sleep: u32) -> Result<Ack> {
        if !SLEEP_STEPS.contains(&sleep) {
            return Err(ApiError::InvalidParam(format!(
                "sleep must be one of {SLEEP_STEPS:?}, got {sleep}"
            )));
        }
        let url = endpoint::zone(&self.host, zone, &format!("setSleep?sleep={sleep}"))?;
        self.get_json(url).await
    }

    // ========================================================================
    // netusb
    // ========================================================================

    pub async fn play_info(&self) -> Result<PlayInfo> {
        self.get_json(endpoint::netusb(&self.host, "getPlayInfo"))
            .await
    }

    /// Issue a playback command (`"play"`, `"pause"`, `"stop"`, `"next"`, ...).
    pub async fn set_playback(&self, action: &str) -> Result<Ack> {
        endpoint::check_playback(action)?;
        let url = endpoint::netusb(&self.host, &format!("setPlayback?playback={action}"));
        self.get_json(url).await
    }

    // ========================================================================
    // dist (multi-room link distribution)
    // ========================================================================

    pub async fn distribution_info(&self) -> Result<DistributionInfo> {
        self.get_json(endpoint::dist(&self.host, "getDistributionInfo"))
            .await
    }

    /// Configure this device as a distribution server (group leader).
    ///
    /// `kind` is `"add"` or `"remove"`; `client_ips` may list up to 9
    /// clients. Passing an empty `group_id` cancels the server role.
    pub async fn set_server_info(
        &self,
        group_id: &str,
        zone: Option<&str>,
        kind: Option<&str>,
        client_ips: Option<&[String]>,
    ) -> Result<Ack> {
        if let Some(zone) = zone {
            endpoint::check_zone(zone)?;
        }
        let mut body = json!({ "group_id": group_id });
        if let Some(zone) = zone {
            body["zone"] = json!(zone);
        }
        if let Some(kind) = kind {
            if !["add", "remove"].contains(&kind) {
                return Err(ApiError::InvalidParam(format!(
                    "server info type must be add/remove, got {kind:?}"
                )));
            }
            body["type"] = json!(kind);
        }
        if let Some(ips) = client_ips {
            body["client_list"] = json!(ips);
        }
        self.post_json(endpoint::dist(&self.host, "setServerInfo"), body)
            .await
    }

    /// Configure this device as a distribution client (group member).
    ///
    /// Passing an empty `group_id` cancels the client role.
    pub async fn set_client_info(
        &self,
        group_id: &str,
        zone: Option<&str>,
        server_ip: Option<&str>,
    ) -> Result<Ack> {
        if let Some(zone) = zone {
            endpoint::check_zone(zone)?;
        }
        let mut body = json!({ "group_id": group_id });
        if let Some(zone) = zone {
            body["zone"] = json!(zone);
        }
        if let Some(ip) = server_ip {
            body["server_ip_address"] = json!(ip);
        }
        self.post_json(endpoint::dist(&self.host, "setClientInfo"), body)
            .await
    }

    /// Start distribution with the given link number (server side).
    pub async fn start_distribution(&self, num: u32) -> Result<Ack> {
        let url = endpoint::dist(&self.host, &format!("startDistribution?num={num}"));
        self.get_json(url).await
    }

    /// Stop distribution (server side).
    pub async fn stop_distribution(&self) -> Result<Ack> {
        self.get_json(endpoint::dist(&self.host, "stopDistribution"))
            .await
    }

    /// Set the (volatile) group display name.
    pub async fn set_group_name(&self, name: &str) -> Result<Ack> {
        self.post_json(
            endpoint::dist(&self.host, "setGroupName"),
            json!({ "name": name }),
        )
        .await
    }
}

fn check_response_code(value: &serde_json::Value) -> Result<()> {
    match value.get("response_code").and_then(|code| code.as_u64()) {
        Some(0) | None => Ok(()),
        Some(code) => {
            let code = code as u32;
            Err(ApiError::Device {
                code,
                meaning: response_code_meaning(code),
            })
        }
    }
}
