//! Per-device poll loop.
//!
//! Every tracked device gets its own loop, so one slow or dead device never
//! stalls the others. A full poll fetches each advertised zone's status,
//! playback info when the device has the playback module, and the
//! distribution report, and queues everything for the reconciler in fetch
//! order. Failures switch the loop to exponential backoff until the device
//! answers again; the reconciler owns the unreachable flag, the loop just
//! reports each failed attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use musiccast_state::{DeviceId, ZoneId};

use crate::config::BackoffConfig;
use crate::reconciler::ReconcileInput;
use crate::transport::StatusSource;

pub(crate) struct PollContext {
    pub device: DeviceId,
    pub source: Arc<dyn StatusSource>,
    pub zones: Vec<ZoneId>,
    pub has_netusb: bool,
    pub interval: Duration,
    pub backoff: BackoffConfig,
    pub tx: mpsc::Sender<ReconcileInput>,
}

pub(crate) async fn run_poll_loop(ctx: PollContext, mut shutdown: watch::Receiver<bool>) {
    let mut failures: u32 = 0;
    tracing::debug!(device = %ctx.device, "poll loop started");

    loop {
        match poll_once(&ctx).await {
            Ok(inputs) => {
                failures = 0;
                for input in inputs {
                    if ctx.tx.send(input).await.is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                failures = failures.saturating_add(1);
                tracing::warn!(device = %ctx.device, %error, failures, "poll failed");
                let failed = ReconcileInput::PollFailed {
                    device: ctx.device.clone(),
                };
                if ctx.tx.send(failed).await.is_err() {
                    return;
                }
            }
        }

        let delay = if failures == 0 {
            ctx.interval
        } else {
            ctx.backoff.delay(failures)
        };
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!(device = %ctx.device, "poll loop stopped");
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One full poll. Any fetch failing fails the whole attempt; partial
/// results gathered before the failure are still merged.
async fn poll_once(ctx: &PollContext) -> musiccast_api::Result<Vec<ReconcileInput>> {
    let mut inputs = Vec::with_capacity(ctx.zones.len() + 2);

    for zone in &ctx.zones {
        let status = ctx.source.zone_status(*zone).await?;
        inputs.push(ReconcileInput::ZoneStatus {
            device: ctx.device.clone(),
            zone: *zone,
            status,
            received_at: Instant::now(),
        });
    }

    if ctx.has_netusb {
        let info = ctx.source.play_info().await?;
        inputs.push(ReconcileInput::Playback {
            device: ctx.device.clone(),
            info,
            received_at: Instant::now(),
        });
    }

    let info = ctx.source.distribution_info().await?;
    inputs.push(ReconcileInput::Distribution {
        device: ctx.device.clone(),
        info,
    });

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::time::timeout;

    use musiccast_api::{
        ApiError, DeviceInfo, DistributionInfo, Features, NameText, NetworkStatus, PlayInfo,
        ZoneStatus,
    };

    /// Fails the first `fail_first` zone fetches, then answers everything.
    struct FlakySource {
        fail_first: u32,
        attempts: AtomicU32,
    }

    fn transport_error() -> ApiError {
        ApiError::InvalidParam("scripted failure".into())
    }

    #[async_trait]
    impl StatusSource for FlakySource {
        async fn device_info(&self) -> musiccast_api::Result<DeviceInfo> {
            Err(transport_error())
        }
        async fn features(&self) -> musiccast_api::Result<Features> {
            Err(transport_error())
        }
        async fn network_status(&self) -> musiccast_api::Result<NetworkStatus> {
            Err(transport_error())
        }
        async fn name_text(&self) -> musiccast_api::Result<NameText> {
            Err(transport_error())
        }
        async fn zone_status(&self, _zone: ZoneId) -> musiccast_api::Result<ZoneStatus> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                Err(transport_error())
            } else {
                Ok(serde_json::from_str(r#"{"response_code":0,"volume":12}"#).unwrap())
            }
        }
        async fn play_info(&self) -> musiccast_api::Result<PlayInfo> {
            Ok(serde_json::from_str(r#"{"response_code":0,"playback":"stop"}"#).unwrap())
        }
        async fn distribution_info(&self) -> musiccast_api::Result<DistributionInfo> {
            Ok(serde_json::from_str(r#"{"response_code":0}"#).unwrap())
        }
    }

    fn context(
        source: Arc<dyn StatusSource>,
        tx: mpsc::Sender<ReconcileInput>,
    ) -> PollContext {
        PollContext {
            device: DeviceId::new("D1"),
            source,
            zones: vec![ZoneId::Main],
            has_netusb: true,
            interval: Duration::from_secs(60),
            backoff: BackoffConfig {
                initial_ms: 10,
                max_ms: 50,
                failure_threshold: 3,
            },
            tx,
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<ReconcileInput>) -> ReconcileInput {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for poll input")
            .expect("poll channel closed")
    }

    #[tokio::test]
    async fn test_successful_poll_queues_all_resources() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let source = Arc::new(FlakySource {
            fail_first: 0,
            attempts: AtomicU32::new(0),
        });
        tokio::spawn(run_poll_loop(context(source, tx), shutdown_rx));

        assert!(matches!(
            recv(&mut rx).await,
            ReconcileInput::ZoneStatus { zone: ZoneId::Main, .. }
        ));
        assert!(matches!(recv(&mut rx).await, ReconcileInput::Playback { .. }));
        assert!(matches!(
            recv(&mut rx).await,
            ReconcileInput::Distribution { .. }
        ));
    }

    #[tokio::test]
    async fn test_failures_reported_then_recovery() {
        let (tx, mut rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let source = Arc::new(FlakySource {
            fail_first: 2,
            attempts: AtomicU32::new(0),
        });
        tokio::spawn(run_poll_loop(context(source, tx), shutdown_rx));

        assert!(matches!(recv(&mut rx).await, ReconcileInput::PollFailed { .. }));
        assert!(matches!(recv(&mut rx).await, ReconcileInput::PollFailed { .. }));
        // third attempt (after backoff) succeeds
        assert!(matches!(
            recv(&mut rx).await,
            ReconcileInput::ZoneStatus { .. }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let source = Arc::new(FlakySource {
            fail_first: 0,
            attempts: AtomicU32::new(0),
        });
        let handle = tokio::spawn(run_poll_loop(context(source, tx), shutdown_rx));

        // drain the first poll round, then stop
        for _ in 0..3 {
            recv(&mut rx).await;
        }
        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop did not stop")
            .unwrap();
    }
}
