//! The engine: lifecycle, discovery, and the wiring between listener,
//! pollers, reconciler and dispatcher.
//!
//! A [`MusicCastEngine`] is an explicitly constructed instance — no global
//! session state — so several engines (say, one per test) can coexist.
//! `start` binds the UDP socket, spawns one setup+poll task per configured
//! device and the reconciler loop; `stop` tears everything down
//! deterministically: producers are signalled first, the in-flight merges
//! complete, then the socket is released.
//!
//! ```text
//!  poll task (per device) ──┐
//!                           ├── input channel ──> Reconciler ──> Dispatcher
//!  UDP listener ─ forwarder ┘        ^
//!                                    └── targeted re-fetch tasks
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use event_listener::{EventListener, ListenerStats, RegistrationHandle};
use musiccast_api::DeviceClient;
use musiccast_state::{
    ChangeFilter, DeviceCapabilities, DeviceId, Dispatcher, GroupCoordinator, GroupId, Power,
    Resource, Snapshot, StateStore, Subscription, SubscriptionHandle, ZoneFeature, ZoneId,
};

use crate::config::{BackoffConfig, DeviceEntry, EngineConfig};
use crate::error::{EngineError, Result};
use crate::poller::{run_poll_loop, PollContext};
use crate::reconciler::{ReconcileInput, Reconciler, SourceMap, INPUT_CHANNEL_CAPACITY};
use crate::transport::StatusSource;

type ClientMap = Arc<RwLock<HashMap<DeviceId, DeviceClient>>>;

/// A running device task and the knobs to stop it.
struct DeviceTask {
    host: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Running {
    listener: EventListener,
    input_tx: mpsc::Sender<ReconcileInput>,
    reconciler: JoinHandle<()>,
    forwarder: JoinHandle<()>,
    reconciler_shutdown: watch::Sender<bool>,
    device_tasks: Vec<DeviceTask>,
    notify_port: u16,
}

/// The device state synchronization engine.
///
/// # Example
///
/// ```rust,ignore
/// use musiccast_sdk::{EngineConfig, MusicCastEngine};
/// use musiccast_state::ChangeFilter;
///
/// let mut config = EngineConfig::default();
/// config.devices.push("192.168.1.50".into());
///
/// let mut engine = MusicCastEngine::new(config);
/// let mut changes = engine.subscribe(ChangeFilter::all());
/// engine.start().await?;
///
/// while let Some(change) = changes.recv().await {
///     println!("{}: {:?} {:?}", change.device_id, change.resource, change.changed_fields);
/// }
/// ```
pub struct MusicCastEngine {
    config: EngineConfig,
    pending_devices: Vec<DeviceEntry>,
    store: StateStore,
    coordinator: GroupCoordinator,
    dispatcher: Dispatcher,
    sources: SourceMap,
    clients: ClientMap,
    running: Option<Running>,
}

impl MusicCastEngine {
    pub fn new(config: EngineConfig) -> Self {
        let store = StateStore::new();
        let coordinator = GroupCoordinator::new(store.clone());
        let dispatcher = Dispatcher::new(config.dispatch_queue_capacity);
        let pending_devices = config.devices.clone();
        Self {
            config,
            pending_devices,
            store,
            coordinator,
            dispatcher,
            sources: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Register a subscriber. Works before `start`; notifications begin
    /// flowing once the engine runs.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.dispatcher.subscribe(filter)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    /// Read the current state without polling.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    /// Devices that completed discovery.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.store.device_ids()
    }

    /// A command handle for one discovered device.
    pub fn device(&self, id: &DeviceId) -> Result<DeviceHandle> {
        let client = self
            .clients
            .read()
            .ok()
            .and_then(|clients| clients.get(id).cloned())
            .ok_or_else(|| EngineError::UnknownDevice(id.clone()))?;
        Ok(DeviceHandle {
            id: id.clone(),
            client,
            store: self.store.clone(),
        })
    }

    /// UDP listener counters, while running.
    pub fn listener_stats(&self) -> Option<ListenerStats> {
        self.running.as_ref().map(|running| running.listener.stats())
    }

    /// The bound UDP notification port, while running.
    pub fn notification_port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.notify_port)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the notification socket and start all loops.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let mut listener = EventListener::bind(self.config.listen_addr).await?;
        let notify_port = listener.local_addr()?.port();
        let mut events_rx = listener.start()?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (reconciler_shutdown, shutdown_rx) = watch::channel(false);

        let reconciler = Reconciler::new(
            self.store.clone(),
            self.coordinator.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.sources),
            input_tx.clone(),
            self.config.backoff.failure_threshold,
        );
        let reconciler_handle = tokio::spawn(reconciler.run(input_rx, shutdown_rx));

        let forwarder = {
            let tx = input_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    if tx.send(ReconcileInput::Event(event)).await.is_err() {
                        break;
                    }
                }
            })
        };

        let registration = listener.registration_handle();
        let mut device_tasks = Vec::new();
        for entry in std::mem::take(&mut self.pending_devices) {
            device_tasks.push(self.spawn_device_task(
                entry.host,
                registration.clone(),
                input_tx.clone(),
                notify_port,
            ));
        }

        self.running = Some(Running {
            listener,
            input_tx,
            reconciler: reconciler_handle,
            forwarder,
            reconciler_shutdown,
            device_tasks,
            notify_port,
        });
        tracing::info!(port = notify_port, "engine started");
        Ok(())
    }

    /// Stop every loop and release the UDP socket.
    ///
    /// Producers stop first; inputs they already queued are merged before
    /// the reconciler exits, so the store is never left mid-update.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(EngineError::NotRunning);
        };
        let Running {
            mut listener,
            input_tx,
            reconciler,
            forwarder,
            reconciler_shutdown,
            device_tasks,
            ..
        } = running;

        for task in &device_tasks {
            let _ = task.shutdown_tx.send(true);
        }
        let _ = reconciler_shutdown.send(true);

        for task in device_tasks {
            let _ = task.handle.await;
        }
        listener.stop().await;
        let _ = forwarder.await;
        drop(input_tx);
        let _ = reconciler.await;

        tracing::info!("engine stopped");
        Ok(())
    }

    /// Track an additional device. Spawns its setup task immediately when
    /// running, otherwise the host is picked up by the next `start`.
    pub fn track_device(&mut self, host: impl Into<String>) {
        let host = host.into();
        let params = self.running.as_ref().map(|running| {
            (
                running.listener.registration_handle(),
                running.input_tx.clone(),
                running.notify_port,
            )
        });
        match params {
            Some((registration, input_tx, notify_port)) => {
                let task = self.spawn_device_task(host, registration, input_tx, notify_port);
                if let Some(running) = self.running.as_mut() {
                    running.device_tasks.push(task);
                }
            }
            None => self.pending_devices.push(DeviceEntry { host }),
        }
    }

    /// Stop tracking a device and drop its state.
    ///
    /// This is the only way a device leaves the store; transient errors
    /// never remove one.
    pub async fn untrack_device(&mut self, id: &DeviceId) -> Result<()> {
        let host = self
            .store
            .host_of(id)
            .ok_or_else(|| EngineError::UnknownDevice(id.clone()))?;

        if let Some(running) = self.running.as_mut() {
            if let Some(position) = running.device_tasks.iter().position(|task| task.host == host)
            {
                let task = running.device_tasks.remove(position);
                let _ = task.shutdown_tx.send(true);
                let _ = task.handle.await;
            }
            if let Some(ip) = host_ip(&host) {
                running.listener.unregister_device(&ip);
            }
        }

        // group membership first, so subscribers see the member leave
        for diff in self.coordinator.remove_device(id) {
            self.dispatcher.dispatch(musiccast_state::ChangeNotification {
                device_id: id.clone(),
                resource: Resource::Group(diff.group),
                changed_fields: diff.changed,
                snapshot: self.store.snapshot(),
            });
        }

        if let Ok(mut sources) = self.sources.write() {
            sources.remove(id);
        }
        if let Ok(mut clients) = self.clients.write() {
            clients.remove(id);
        }
        self.store.remove_device(id);
        tracing::info!(device = %id, "device untracked");
        Ok(())
    }

    fn spawn_device_task(
        &self,
        host: String,
        registration: RegistrationHandle,
        input_tx: mpsc::Sender<ReconcileInput>,
        notify_port: u16,
    ) -> DeviceTask {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runtime = DeviceRuntime {
            store: self.store.clone(),
            sources: Arc::clone(&self.sources),
            clients: Arc::clone(&self.clients),
            registration,
            input_tx,
            interval: self.config.poll_interval(),
            backoff: self.config.backoff.clone(),
            notify_port,
        };
        let task_host = host.clone();
        let handle = tokio::spawn(async move {
            run_device(task_host, runtime, shutdown_rx).await;
        });
        DeviceTask {
            host,
            shutdown_tx,
            handle,
        }
    }
}

struct DeviceRuntime {
    store: StateStore,
    sources: SourceMap,
    clients: ClientMap,
    registration: RegistrationHandle,
    input_tx: mpsc::Sender<ReconcileInput>,
    interval: Duration,
    backoff: BackoffConfig,
    notify_port: u16,
}

struct Discovered {
    device_id: DeviceId,
    capabilities: DeviceCapabilities,
    model_name: Option<String>,
    network_name: Option<String>,
}

/// Setup-then-poll task for one device: discover (with backoff) until the
/// capability handshake succeeds, establish the device in the store and the
/// event routing table, then poll until shutdown.
async fn run_device(host: String, runtime: DeviceRuntime, mut shutdown: watch::Receiver<bool>) {
    let client = match DeviceClient::new(&host) {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%host, %error, "cannot construct device client");
            return;
        }
    };
    client.set_notification_port(runtime.notify_port);
    let source: Arc<dyn StatusSource> = Arc::new(client.clone());

    let mut failures: u32 = 0;
    let discovered = loop {
        if *shutdown.borrow() {
            return;
        }
        match discover(source.as_ref()).await {
            Ok(discovered) => break discovered,
            Err(error) => {
                failures = failures.saturating_add(1);
                tracing::warn!(%host, %error, failures, "discovery failed");
                let delay = runtime.backoff.delay(failures);
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    let Discovered {
        device_id,
        capabilities,
        model_name,
        network_name,
    } = discovered;

    let is_new = runtime.store.add_device(
        device_id.clone(),
        host.clone(),
        capabilities.clone(),
        model_name,
        network_name,
    );
    if is_new {
        tracing::info!(device = %device_id, %host, "device discovered");
    }

    match host_ip(&host) {
        Some(ip) => runtime.registration.register(ip, device_id.clone()),
        None => tracing::warn!(
            host,
            "host is not an address, event routing falls back to embedded device ids"
        ),
    }
    if let Ok(mut sources) = runtime.sources.write() {
        sources.insert(device_id.clone(), Arc::clone(&source));
    }
    if let Ok(mut clients) = runtime.clients.write() {
        clients.insert(device_id.clone(), client);
    }

    let zones: Vec<ZoneId> = capabilities.zone_ids().collect();
    run_poll_loop(
        PollContext {
            device: device_id,
            source,
            zones,
            has_netusb: capabilities.has_netusb,
            interval: runtime.interval,
            backoff: runtime.backoff,
            tx: runtime.input_tx,
        },
        shutdown,
    )
    .await;
}

/// The discovery handshake: identity, capabilities, display names, network
/// info — all four must succeed before a device exists in the store.
async fn discover(source: &dyn StatusSource) -> Result<Discovered> {
    let info = source.device_info().await?;
    let features = source.features().await?;
    let names = source.name_text().await?;
    let network = source.network_status().await?;

    let capabilities = DeviceCapabilities::from_features(&features, Some(&names))?;
    Ok(Discovered {
        device_id: DeviceId::new(info.device_id),
        capabilities,
        model_name: info.model_name,
        network_name: network.network_name,
    })
}

fn host_ip(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    host.parse::<SocketAddr>().ok().map(|addr| addr.ip())
}

// ============================================================================
// DeviceHandle - typed command surface
// ============================================================================

/// Playback transport commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
}

impl PlaybackCommand {
    fn as_str(&self) -> &'static str {
        match self {
            PlaybackCommand::Play => "play",
            PlaybackCommand::Pause => "pause",
            PlaybackCommand::Stop => "stop",
            PlaybackCommand::Next => "next",
            PlaybackCommand::Previous => "previous",
        }
    }
}

/// Commands for one device, validated against its advertised capabilities
/// before any request goes out.
///
/// Commands do not write the store: the device's own notification (or the
/// next poll) carries the resulting state, keeping the device authoritative.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    id: DeviceId,
    client: DeviceClient,
    store: StateStore,
}

impl DeviceHandle {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    fn capabilities(&self) -> Result<DeviceCapabilities> {
        self.store
            .capabilities(&self.id)
            .ok_or_else(|| EngineError::UnknownDevice(self.id.clone()))
    }

    fn require_zone_feature(&self, zone: ZoneId, feature: ZoneFeature) -> Result<()> {
        let capabilities = self.capabilities()?;
        let zone_caps =
            capabilities
                .zone(zone)
                .ok_or_else(|| EngineError::State(musiccast_state::StateError::UnknownZone {
                    device: self.id.clone(),
                    zone,
                }))?;
        if zone_caps.supports(feature) {
            Ok(())
        } else {
            Err(EngineError::Unsupported {
                device: self.id.clone(),
                zone: Some(zone),
                capability: feature_name(feature),
            })
        }
    }

    pub async fn set_power(&self, zone: ZoneId, power: Power) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Power)?;
        self.client
            .set_power(zone.as_str(), &power.to_string())
            .await?;
        Ok(())
    }

    pub async fn set_volume(&self, zone: ZoneId, volume: i32) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Volume)?;
        let capabilities = self.capabilities()?;
        if let Some(range) = capabilities.zone(zone).and_then(|caps| caps.volume) {
            if !range.contains(volume) {
                return Err(EngineError::VolumeOutOfRange {
                    volume,
                    min: range.min,
                    max: range.max,
                });
            }
        }
        self.client.set_volume(zone.as_str(), volume).await?;
        Ok(())
    }

    pub async fn volume_up(&self, zone: ZoneId, step: Option<u32>) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Volume)?;
        self.client.set_volume_step(zone.as_str(), "up", step).await?;
        Ok(())
    }

    pub async fn volume_down(&self, zone: ZoneId, step: Option<u32>) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Volume)?;
        self.client
            .set_volume_step(zone.as_str(), "down", step)
            .await?;
        Ok(())
    }

    pub async fn set_mute(&self, zone: ZoneId, mute: bool) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Mute)?;
        self.client.set_mute(zone.as_str(), mute).await?;
        Ok(())
    }

    pub async fn select_input(&self, zone: ZoneId, input: &str) -> Result<()> {
        let capabilities = self.capabilities()?;
        let zone_caps =
            capabilities
                .zone(zone)
                .ok_or_else(|| EngineError::State(musiccast_state::StateError::UnknownZone {
                    device: self.id.clone(),
                    zone,
                }))?;
        if !zone_caps.has_input(input) {
            return Err(EngineError::UnknownInput {
                device: self.id.clone(),
                zone,
                input: input.to_string(),
            });
        }
        self.client.set_input(zone.as_str(), input, "").await?;
        Ok(())
    }

    pub async fn set_sleep(&self, zone: ZoneId, minutes: u32) -> Result<()> {
        self.require_zone_feature(zone, ZoneFeature::Sleep)?;
        self.client.set_sleep(zone.as_str(), minutes).await?;
        Ok(())
    }

    pub async fn playback(&self, command: PlaybackCommand) -> Result<()> {
        if !self.capabilities()?.has_netusb {
            return Err(EngineError::Unsupported {
                device: self.id.clone(),
                zone: None,
                capability: "playback",
            });
        }
        self.client.set_playback(command.as_str()).await?;
        Ok(())
    }

    // ========================================================================
    // Group operations
    // ========================================================================

    /// Create or extend a group led by this device (leader side).
    pub async fn group_extend(
        &self,
        zone: ZoneId,
        group_id: &str,
        client_hosts: &[String],
        link_num: u32,
    ) -> Result<()> {
        self.client
            .set_server_info(group_id, Some(zone.as_str()), Some("add"), Some(client_hosts))
            .await?;
        self.client.start_distribution(link_num).await?;
        Ok(())
    }

    /// Remove clients from the group this device leads.
    pub async fn group_reduce(&self, zone: ZoneId, client_hosts: &[String], link_num: u32) -> Result<()> {
        let group_id = self.led_group_id()?;
        self.client
            .set_server_info(
                group_id.as_str(),
                Some(zone.as_str()),
                Some("remove"),
                Some(client_hosts),
            )
            .await?;
        // restart distribution only while clients remain
        let snapshot = self.store.snapshot();
        let remaining = snapshot
            .group(&group_id)
            .map(|group| group.members.len().saturating_sub(1 + client_hosts.len()))
            .unwrap_or(0);
        if remaining > 0 {
            self.client.start_distribution(link_num).await?;
        }
        Ok(())
    }

    /// Dissolve the group this device leads.
    pub async fn group_close(&self) -> Result<()> {
        self.client.stop_distribution().await?;
        self.client.set_server_info("", None, None, None).await?;
        Ok(())
    }

    /// Join a group as a client and switch the zone to the link input.
    pub async fn group_join(&self, zone: ZoneId, group_id: &str, leader_host: &str) -> Result<()> {
        self.client
            .set_client_info(group_id, Some(zone.as_str()), Some(leader_host))
            .await?;
        self.client
            .set_input(zone.as_str(), musiccast_api::MC_LINK_INPUT, "")
            .await?;
        Ok(())
    }

    /// Leave the group this device is a client of.
    pub async fn group_leave(&self) -> Result<()> {
        self.client.set_client_info("", None, None).await?;
        Ok(())
    }

    fn led_group_id(&self) -> Result<GroupId> {
        let snapshot = self.store.snapshot();
        snapshot
            .groups
            .iter()
            .find(|(_, group)| group.leader.as_ref() == Some(&self.id))
            .map(|(group_id, _)| group_id.clone())
            .ok_or(EngineError::Unsupported {
                device: self.id.clone(),
                zone: None,
                capability: "group leadership",
            })
    }
}

fn feature_name(feature: ZoneFeature) -> &'static str {
    match feature {
        ZoneFeature::Power => "power",
        ZoneFeature::Sleep => "sleep",
        ZoneFeature::Volume => "volume",
        ZoneFeature::Mute => "mute",
        _ => "zone feature",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn local_config() -> EngineConfig {
        EngineConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_host_ip() {
        assert_eq!(host_ip("192.168.1.50"), Some("192.168.1.50".parse().unwrap()));
        assert_eq!(host_ip("127.0.0.1:8080"), Some("127.0.0.1".parse().unwrap()));
        assert_eq!(host_ip("living-room.local"), None);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut engine = MusicCastEngine::new(local_config());
        assert!(!engine.is_running());

        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert!(engine.listener_stats().is_some());

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        assert!(engine.listener_stats().is_none());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let mut engine = MusicCastEngine::new(local_config());
        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::AlreadyRunning)
        ));
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_not_running_rejected() {
        let mut engine = MusicCastEngine::new(local_config());
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_engines_coexist_and_restart() {
        let mut first = MusicCastEngine::new(local_config());
        let mut second = MusicCastEngine::new(local_config());
        first.start().await.unwrap();
        second.start().await.unwrap();
        first.stop().await.unwrap();
        second.stop().await.unwrap();

        // an engine can start again after stopping
        first.start().await.unwrap();
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_device_handle() {
        let engine = MusicCastEngine::new(local_config());
        let err = engine.device(&DeviceId::new("nope")).unwrap_err();
        assert!(matches!(err, EngineError::UnknownDevice(_)));
    }
}
