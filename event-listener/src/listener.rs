//! UDP receive loop.
//!
//! One `EventListener` serves every tracked device: devices address their
//! notifications to the port we advertised via the `X-AppPort` header, and
//! the listener demultiplexes incoming datagrams by source address (falling
//! back to the embedded `device_id`). Datagrams that cannot be parsed, or
//! that come from a source no tracked device matches, are counted and
//! dropped — they are never fatal.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use musiccast_state::DeviceId;

use crate::error::{ListenerError, Result};
use crate::event::{parse_datagram, DeviceEvent};

/// Largest datagram we accept; MusicCast notifications are far smaller.
const MAX_DATAGRAM: usize = 8 * 1024;

/// Capacity of the channel from the receive loop to the reconciler.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An event attributed to its source device, with the local receipt time
/// that drives last-writer-wins merging downstream.
#[derive(Debug, Clone)]
pub struct SourcedEvent {
    pub device_id: DeviceId,
    pub event: DeviceEvent,
    pub received_at: Instant,
}

/// Counters exposed for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Datagrams received, including dropped ones.
    pub received: u64,
    /// Datagrams dropped because they could not be parsed.
    pub malformed: u64,
    /// Datagrams dropped because no tracked device matched the source.
    pub unknown_source: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    unknown_source: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_source: self.unknown_source.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable handle for maintaining the source→device routing table while
/// the listener runs, e.g. from per-device setup tasks.
#[derive(Clone)]
pub struct RegistrationHandle {
    registry: Arc<RwLock<HashMap<IpAddr, DeviceId>>>,
}

impl RegistrationHandle {
    pub fn register(&self, addr: IpAddr, device_id: DeviceId) {
        if let Ok(mut registry) = self.registry.write() {
            registry.insert(addr, device_id);
        }
    }

    pub fn unregister(&self, addr: &IpAddr) {
        if let Ok(mut registry) = self.registry.write() {
            registry.remove(addr);
        }
    }
}

/// Shared UDP listener for unsolicited device notifications.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let mut listener = EventListener::bind("0.0.0.0:41100".parse()?).await?;
/// listener.register_device("192.168.1.50".parse()?, DeviceId::new("00A0DEADBEEF"));
/// let mut events = listener.start()?;
/// while let Some(event) = events.recv().await {
///     // hand to the reconciler
/// }
/// listener.stop().await; // socket released here, deterministically
/// ```
pub struct EventListener {
    socket: Option<Arc<UdpSocket>>,
    registry: Arc<RwLock<HashMap<IpAddr, DeviceId>>>,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
}

impl EventListener {
    /// Bind the notification socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        Ok(Self {
            socket: Some(Arc::new(socket)),
            registry: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            task: None,
        })
    }

    /// The bound local address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(ListenerError::Stopped)?;
        Ok(socket.local_addr()?)
    }

    /// Route datagrams from `addr` to `device_id`.
    pub fn register_device(&self, addr: IpAddr, device_id: DeviceId) {
        if let Ok(mut registry) = self.registry.write() {
            registry.insert(addr, device_id);
        }
    }

    /// Stop routing datagrams from `addr`.
    pub fn unregister_device(&self, addr: &IpAddr) {
        if let Ok(mut registry) = self.registry.write() {
            registry.remove(addr);
        }
    }

    /// A cloneable handle onto the routing table.
    pub fn registration_handle(&self) -> RegistrationHandle {
        RegistrationHandle {
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    /// Spawn the receive loop and return the event stream.
    pub fn start(&mut self) -> Result<mpsc::Receiver<SourcedEvent>> {
        if self.task.is_some() {
            return Err(ListenerError::AlreadyStarted);
        }
        let socket = Arc::clone(self.socket.as_ref().ok_or(ListenerError::Stopped)?);
        let registry = Arc::clone(&self.registry);
        let counters = Arc::clone(&self.counters);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.task = Some(tokio::spawn(async move {
            receive_loop(socket, registry, counters, tx).await;
        }));
        Ok(rx)
    }

    /// Stop the receive loop and release the socket.
    ///
    /// After `stop` returns the port is free again; a new listener can bind
    /// it immediately.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        // Dropping the last Arc closes the socket. The receive task held a
        // clone; it is gone once the abort has been awaited.
        self.socket = None;
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<HashMap<IpAddr, DeviceId>>>,
    counters: Arc<Counters>,
    tx: mpsc::Sender<SourcedEvent>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    tracing::info!("event listener started");

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                tracing::error!(%error, "UDP receive failed, listener exiting");
                break;
            }
        };
        let received_at = Instant::now();
        counters.received.fetch_add(1, Ordering::Relaxed);

        let parsed = match parse_datagram(&buf[..len]) {
            Ok(parsed) => parsed,
            Err(error) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%peer, %error, "dropping malformed datagram");
                continue;
            }
        };

        let device_id = resolve_source(&registry, peer.ip(), parsed.device_id.as_deref());
        let Some(device_id) = device_id else {
            counters.unknown_source.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%peer, "dropping datagram from unknown source");
            continue;
        };

        for event in parsed.events {
            let sourced = SourcedEvent {
                device_id: device_id.clone(),
                event,
                received_at,
            };
            if tx.send(sourced).await.is_err() {
                tracing::debug!("event receiver dropped, listener exiting");
                return;
            }
        }
    }
}

/// Source IP wins; the embedded device id is the fallback for devices
/// answering from an unexpected interface. Either way the device must be
/// registered — deltas cannot apply without an established baseline.
fn resolve_source(
    registry: &RwLock<HashMap<IpAddr, DeviceId>>,
    source: IpAddr,
    embedded_id: Option<&str>,
) -> Option<DeviceId> {
    let registry = registry.read().ok()?;
    if let Some(device_id) = registry.get(&source) {
        return Some(device_id.clone());
    }
    let embedded_id = embedded_id?;
    registry
        .values()
        .find(|device_id| device_id.as_str() == embedded_id)
        .cloned()
}
