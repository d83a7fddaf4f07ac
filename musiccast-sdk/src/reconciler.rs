//! Merging poll results and push events into the store.
//!
//! The reconciler is the single writer: poll loops and the UDP listener
//! never touch the store, they queue [`ReconcileInput`]s on one channel and
//! this loop applies them in arrival order. Per-device ordering is preserved
//! (each poll loop awaits its sends, the listener is one task); no ordering
//! exists across devices and none is needed — the store's per-field
//! last-writer-wins rule makes the outcome order-independent.
//!
//! Invalidation hints (`status_updated`, `play_info_updated`,
//! `dist_info_updated`) carry no values; they trigger a targeted re-fetch
//! whose result re-enters the queue as a poll-sourced input.
//!
//! Unreachable bookkeeping also lives here: the poll loops report failures,
//! the reconciler counts streaks per device, flags the device at the
//! configured threshold, and clears the flag on the next successful poll
//! input — without touching any other state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use event_listener::{DeviceEvent, SourcedEvent};
use musiccast_api::{DistributionInfo, PlayInfo, ZoneStatus};
use musiccast_state::{
    ChangeNotification, ChangedFields, DeviceId, Dispatcher, DistributionView, GroupCoordinator,
    PlaybackDelta, Resource, Stamp, StateError, StateStore, UpdateSource, ZoneDelta, ZoneId,
};

use crate::transport::StatusSource;

/// Capacity of the reconciler input channel.
pub const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Shared registry of per-device status sources, used for targeted
/// re-fetches triggered by invalidation events.
pub type SourceMap = Arc<RwLock<HashMap<DeviceId, Arc<dyn StatusSource>>>>;

/// One unit of work for the reconciler.
#[derive(Debug)]
pub enum ReconcileInput {
    /// A fetched zone status (from a poll loop or a targeted re-fetch).
    ZoneStatus {
        device: DeviceId,
        zone: ZoneId,
        status: ZoneStatus,
        received_at: Instant,
    },
    /// Fetched playback info.
    Playback {
        device: DeviceId,
        info: PlayInfo,
        received_at: Instant,
    },
    /// A fetched distribution (group) report.
    Distribution {
        device: DeviceId,
        info: DistributionInfo,
    },
    /// A push event from the UDP listener.
    Event(SourcedEvent),
    /// One failed poll attempt for a device.
    PollFailed { device: DeviceId },
}

/// The merge loop. Constructed by the engine; public so embedders and tests
/// can drive it without a full engine.
pub struct Reconciler {
    store: StateStore,
    coordinator: GroupCoordinator,
    dispatcher: Dispatcher,
    sources: SourceMap,
    /// Re-fetch results loop back into the input queue through this sender.
    input_tx: mpsc::Sender<ReconcileInput>,
    failure_threshold: u32,
    failures: HashMap<DeviceId, u32>,
}

impl Reconciler {
    pub fn new(
        store: StateStore,
        coordinator: GroupCoordinator,
        dispatcher: Dispatcher,
        sources: SourceMap,
        input_tx: mpsc::Sender<ReconcileInput>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            store,
            coordinator,
            dispatcher,
            sources,
            input_tx,
            failure_threshold: failure_threshold.max(1),
            failures: HashMap::new(),
        }
    }

    /// Run until the shutdown signal fires or every input sender is gone.
    ///
    /// On shutdown the channel is closed to refuse new inputs, and
    /// everything already accepted is still applied — teardown never leaves
    /// a half-merged delta behind.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<ReconcileInput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("reconciler started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                input = rx.recv() => {
                    match input {
                        Some(input) => self.handle(input),
                        None => {
                            tracing::info!("reconciler stopped");
                            return;
                        }
                    }
                }
            }
        }
        // Refuse new inputs, then finish the ones already accepted.
        rx.close();
        while let Some(input) = rx.recv().await {
            self.handle(input);
        }
        tracing::info!("reconciler stopped");
    }

    /// Apply one input synchronously.
    pub fn handle(&mut self, input: ReconcileInput) {
        match input {
            ReconcileInput::ZoneStatus {
                device,
                zone,
                status,
                received_at,
            } => {
                self.note_poll_success(&device);
                let delta = ZoneDelta::from_status(&status);
                let stamp = Stamp::new(UpdateSource::Poll, received_at);
                self.merge_zone(device, zone, &delta, stamp);
            }
            ReconcileInput::Playback {
                device,
                info,
                received_at,
            } => {
                self.note_poll_success(&device);
                let delta = PlaybackDelta::from_play_info(&info);
                let stamp = Stamp::new(UpdateSource::Poll, received_at);
                self.merge_playback(device, &delta, stamp);
            }
            ReconcileInput::Distribution { device, info } => {
                self.note_poll_success(&device);
                let view = DistributionView::from_info(&info);
                match self.coordinator.apply_report(&device, &view) {
                    Ok(diffs) => {
                        for diff in diffs {
                            self.dispatch(device.clone(), Resource::Group(diff.group), diff.changed);
                        }
                    }
                    Err(StateError::UnknownDevice(_)) => {
                        tracing::debug!(%device, "distribution report for unknown device discarded");
                    }
                    Err(error) => {
                        tracing::warn!(%device, %error, "distribution report rejected");
                    }
                }
            }
            ReconcileInput::Event(event) => self.handle_event(event),
            ReconcileInput::PollFailed { device } => self.note_poll_failure(&device),
        }
    }

    fn handle_event(&mut self, sourced: SourcedEvent) {
        let SourcedEvent {
            device_id,
            event,
            received_at,
        } = sourced;

        if !self.store.contains_device(&device_id) {
            tracing::debug!(device = %device_id, "event for unknown device discarded");
            return;
        }

        match event {
            DeviceEvent::ZoneChanged { zone, delta } => {
                let stamp = Stamp::new(UpdateSource::Push, received_at);
                self.merge_zone(device_id, zone, &delta, stamp);
            }
            DeviceEvent::ZoneInvalidated { zone } => self.refetch_zone(device_id, zone),
            DeviceEvent::PlaybackProgress { play_time } => {
                let stamp = Stamp::new(UpdateSource::Push, received_at);
                self.merge_playback(device_id, &PlaybackDelta::progress(play_time), stamp);
            }
            DeviceEvent::PlaybackInvalidated => self.refetch_playback(device_id),
            DeviceEvent::DistributionInvalidated => self.refetch_distribution(device_id),
        }
    }

    fn merge_zone(&mut self, device: DeviceId, zone: ZoneId, delta: &ZoneDelta, stamp: Stamp) {
        match self.store.merge_zone(&device, zone, delta, stamp) {
            Ok(changed) => self.dispatch(device, Resource::Zone(zone), changed),
            Err(StateError::UnknownDevice(_)) => {
                tracing::debug!(%device, "zone delta for unknown device discarded");
            }
            Err(error) => {
                tracing::warn!(%device, %zone, %error, "zone delta rejected");
            }
        }
    }

    fn merge_playback(&mut self, device: DeviceId, delta: &PlaybackDelta, stamp: Stamp) {
        match self.store.merge_playback(&device, delta, stamp) {
            Ok(changed) => self.dispatch(device, Resource::Playback, changed),
            Err(StateError::UnknownDevice(_)) => {
                tracing::debug!(%device, "playback delta for unknown device discarded");
            }
            Err(error) => {
                tracing::warn!(%device, %error, "playback delta rejected");
            }
        }
    }

    fn dispatch(&self, device: DeviceId, resource: Resource, changed: ChangedFields) {
        if changed.is_empty() {
            return;
        }
        self.dispatcher.dispatch(ChangeNotification {
            device_id: device,
            resource,
            changed_fields: changed,
            snapshot: self.store.snapshot(),
        });
    }

    // ========================================================================
    // Unreachable bookkeeping
    // ========================================================================

    fn note_poll_success(&mut self, device: &DeviceId) {
        self.failures.remove(device);
        if self.store.is_unreachable(device) {
            match self.store.set_unreachable(device, false) {
                Ok(changed) => {
                    tracing::info!(%device, "device reachable again");
                    self.dispatch(device.clone(), Resource::Device, changed);
                }
                Err(error) => tracing::debug!(%device, %error, "clearing unreachable failed"),
            }
        }
    }

    fn note_poll_failure(&mut self, device: &DeviceId) {
        let streak = self.failures.entry(device.clone()).or_insert(0);
        *streak += 1;
        let streak = *streak;

        if streak >= self.failure_threshold && !self.store.is_unreachable(device) {
            match self.store.set_unreachable(device, true) {
                Ok(changed) => {
                    tracing::warn!(%device, streak, "device marked unreachable");
                    self.dispatch(device.clone(), Resource::Device, changed);
                }
                Err(error) => tracing::debug!(%device, %error, "setting unreachable failed"),
            }
        }
    }

    // ========================================================================
    // Targeted re-fetches
    // ========================================================================

    fn source_of(&self, device: &DeviceId) -> Option<Arc<dyn StatusSource>> {
        self.sources.read().ok()?.get(device).cloned()
    }

    fn refetch_zone(&self, device: DeviceId, zone: ZoneId) {
        let Some(source) = self.source_of(&device) else {
            tracing::debug!(%device, "no status source for zone re-fetch");
            return;
        };
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            match source.zone_status(zone).await {
                Ok(status) => {
                    let _ = tx
                        .send(ReconcileInput::ZoneStatus {
                            device,
                            zone,
                            status,
                            received_at: Instant::now(),
                        })
                        .await;
                }
                Err(error) => tracing::debug!(%device, %zone, %error, "zone re-fetch failed"),
            }
        });
    }

    fn refetch_playback(&self, device: DeviceId) {
        let Some(source) = self.source_of(&device) else {
            tracing::debug!(%device, "no status source for playback re-fetch");
            return;
        };
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            match source.play_info().await {
                Ok(info) => {
                    let _ = tx
                        .send(ReconcileInput::Playback {
                            device,
                            info,
                            received_at: Instant::now(),
                        })
                        .await;
                }
                Err(error) => tracing::debug!(%device, %error, "playback re-fetch failed"),
            }
        });
    }

    fn refetch_distribution(&self, device: DeviceId) {
        let Some(source) = self.source_of(&device) else {
            tracing::debug!(%device, "no status source for distribution re-fetch");
            return;
        };
        let tx = self.input_tx.clone();
        tokio::spawn(async move {
            match source.distribution_info().await {
                Ok(info) => {
                    let _ = tx.send(ReconcileInput::Distribution { device, info }).await;
                }
                Err(error) => tracing::debug!(%device, %error, "distribution re-fetch failed"),
            }
        });
    }
}
