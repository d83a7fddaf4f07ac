//! Change notification fan-out.
//!
//! The reconciler produces one [`ChangeNotification`] per merged diff; the
//! dispatcher delivers it to every matching subscriber exactly once. Each
//! subscriber owns a bounded queue, so a slow consumer can never block the
//! merge loop or starve other subscribers — when a queue is full the
//! notification is dropped for that subscriber and its lag counter
//! increments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::{DeviceId, GroupId, ZoneId};
use crate::snapshot::Snapshot;
use crate::store::ChangedFields;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// The sub-resource a change applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Zone(ZoneId),
    Playback,
    Device,
    Group(GroupId),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Zone(_) => ResourceKind::Zone,
            Resource::Playback => ResourceKind::Playback,
            Resource::Device => ResourceKind::Device,
            Resource::Group(_) => ResourceKind::Group,
        }
    }
}

/// Resource category, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Zone,
    Playback,
    Device,
    Group,
}

/// One observed change: which device reported it, which resource changed,
/// which fields actually changed value, and the state frozen right after
/// the merge.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    pub device_id: DeviceId,
    pub resource: Resource,
    pub changed_fields: ChangedFields,
    pub snapshot: Arc<Snapshot>,
}

/// Selects which notifications a subscriber receives.
#[derive(Debug, Clone, Default)]
pub struct ChangeFilter {
    device: Option<DeviceId>,
    resource: Option<ResourceKind>,
}

impl ChangeFilter {
    /// Match everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to one device.
    pub fn for_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Restrict to one resource kind.
    pub fn for_resource(mut self, kind: ResourceKind) -> Self {
        self.resource = Some(kind);
        self
    }

    fn matches(&self, notification: &ChangeNotification) -> bool {
        if let Some(device) = &self.device {
            if device != &notification.device_id {
                return false;
            }
        }
        if let Some(kind) = self.resource {
            if kind != notification.resource.kind() {
                return false;
            }
        }
        true
    }
}

/// Opaque id identifying a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// A subscriber's receiving end.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<ChangeNotification>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Wait for the next notification. Returns `None` once unsubscribed and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }

    /// Take a notification if one is queued.
    pub fn try_recv(&mut self) -> Option<ChangeNotification> {
        self.rx.try_recv().ok()
    }

    /// Notifications dropped for this subscriber because its queue was full.
    pub fn lagged(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SubscriberEntry {
    filter: ChangeFilter,
    tx: mpsc::Sender<ChangeNotification>,
    dropped: Arc<AtomicU64>,
}

#[derive(Default)]
struct DispatchInner {
    subscribers: HashMap<u64, SubscriberEntry>,
    next_id: u64,
}

/// Fan-out point between the reconciler and subscribers; clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Mutex<DispatchInner>>,
    capacity: usize,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DispatchInner::default())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(
            id,
            SubscriberEntry {
                filter,
                tx,
                dropped: Arc::clone(&dropped),
            },
        );

        Subscription {
            handle: SubscriptionHandle(id),
            rx,
            dropped,
        }
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.lock().subscribers.remove(&handle.0).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Deliver one notification to every matching subscriber.
    ///
    /// Never blocks: full queues drop the notification for that subscriber
    /// only. Subscribers whose receiving end is gone are pruned.
    pub fn dispatch(&self, notification: ChangeNotification) {
        let mut inner = self.inner.lock();
        let mut closed = Vec::new();

        for (id, entry) in &inner.subscribers {
            if !entry.filter.matches(&notification) {
                continue;
            }
            match entry.tx.try_send(notification.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = id,
                        device = %notification.device_id,
                        "subscriber queue full, dropping notification"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            inner.subscribers.remove(&id);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
