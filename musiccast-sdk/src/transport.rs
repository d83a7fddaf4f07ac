//! The status-fetching seam between the engine and the HTTP client.
//!
//! The reconciler and poll loops consume this trait instead of
//! `DeviceClient` directly so tests can substitute scripted transports.
//! Commands stay on `DeviceClient`; only status reads flow through here.

use async_trait::async_trait;

use musiccast_api::{
    DeviceClient, DeviceInfo, DistributionInfo, Features, NameText, NetworkStatus, PlayInfo,
    Result, ZoneStatus,
};
use musiccast_state::ZoneId;

/// Read-only status surface of one device.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn device_info(&self) -> Result<DeviceInfo>;
    async fn features(&self) -> Result<Features>;
    async fn network_status(&self) -> Result<NetworkStatus>;
    async fn name_text(&self) -> Result<NameText>;
    async fn zone_status(&self, zone: ZoneId) -> Result<ZoneStatus>;
    async fn play_info(&self) -> Result<PlayInfo>;
    async fn distribution_info(&self) -> Result<DistributionInfo>;
}

#[async_trait]
impl StatusSource for DeviceClient {
    async fn device_info(&self) -> Result<DeviceInfo> {
        DeviceClient::device_info(self).await
    }

    async fn features(&self) -> Result<Features> {
        DeviceClient::features(self).await
    }

    async fn network_status(&self) -> Result<NetworkStatus> {
        DeviceClient::network_status(self).await
    }

    async fn name_text(&self) -> Result<NameText> {
        DeviceClient::name_text(self).await
    }

    async fn zone_status(&self, zone: ZoneId) -> Result<ZoneStatus> {
        DeviceClient::zone_status(self, zone.as_str()).await
    }

    async fn play_info(&self) -> Result<PlayInfo> {
        DeviceClient::play_info(self).await
    }

    async fn distribution_info(&self) -> Result<DistributionInfo> {
        DeviceClient::distribution_info(self).await
    }
}
