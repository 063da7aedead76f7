//! In-process message bus for classified daemon messages
//!
//! Listeners are plain callbacks registered per [`Channel`]. Dispatch is
//! synchronous and follows registration order. The listener list is
//! snapshotted before dispatch, so a callback may subscribe or unsubscribe
//! (itself included) while it runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use frogmon_core::events::{Channel, DaemonMessage};

type Listener = Arc<dyn Fn(&DaemonMessage) + Send + Sync>;

/// Handle returned by [`MessageBus::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    channel: Channel,
    listener: Listener,
}

struct BusInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration>>,
}

impl BusInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        // A panicking listener must not wedge the bus
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }
}

/// Cloneable handle to a shared set of channel listeners
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("listeners", &self.inner.lock().len())
            .finish()
    }
}

/// Non-owning bus handle for listeners that need to publish or subscribe
#[derive(Clone)]
pub struct WeakMessageBus {
    inner: Weak<BusInner>,
}

impl WeakMessageBus {
    pub fn upgrade(&self) -> Option<MessageBus> {
        self.inner.upgrade().map(|inner| MessageBus { inner })
    }
}

/// Pending result of [`MessageBus::once`]
///
/// Resolves with the first extracted value, or with an error if the bus is
/// dropped first. Dropping it unresolved removes the listener.
#[must_use = "dropping a Once detaches its listener"]
pub struct Once<T> {
    rx: oneshot::Receiver<T>,
    id: ListenerId,
    bus: Weak<BusInner>,
}

impl<T> Once<T> {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<T> Future for Once<T> {
    type Output = Result<T, oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx)
    }
}

impl<T> Drop for Once<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl<T> std::fmt::Debug for Once<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Once").field("id", &self.id).finish()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener for every message published on `channel`
    pub fn on<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&DaemonMessage) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().push(Registration {
            id,
            channel,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    /// Resolve with the first message on `channel` for which `extract`
    /// returns a value, then detach.
    ///
    /// The listener is installed before this returns, so any message
    /// published afterwards is seen. Dropping the returned [`Once`] before
    /// it resolves detaches the listener.
    pub fn once<T, F>(&self, channel: Channel, extract: F) -> Once<T>
    where
        T: Send + 'static,
        F: Fn(&DaemonMessage) -> Option<T> + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let own_id = Arc::new(Mutex::new(None::<ListenerId>));
        let own_id_in_listener = Arc::clone(&own_id);

        let id = self.on(channel, move |message| {
            let Some(value) = extract(message) else {
                return;
            };
            let sender = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(sender) = sender {
                let _ = sender.send(value);
            }
            let id = *own_id_in_listener.lock().unwrap_or_else(|e| e.into_inner());
            if let (Some(inner), Some(id)) = (weak.upgrade(), id) {
                inner.remove(id);
            }
        });

        *own_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
        Once {
            rx,
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// A handle that does not keep the bus alive
    pub fn downgrade(&self) -> WeakMessageBus {
        WeakMessageBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Dispatch a message to every listener on its channel
    pub fn publish(&self, message: &DaemonMessage) {
        let channel = message.channel();
        let targets: Vec<(ListenerId, Listener)> = self
            .inner
            .lock()
            .iter()
            .filter(|r| r.channel == channel)
            .map(|r| (r.id, Arc::clone(&r.listener)))
            .collect();

        for (id, listener) in targets {
            // Skip listeners removed by an earlier callback in this dispatch
            if !self.is_registered(id) {
                continue;
            }
            listener(message);
        }
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.inner.lock().iter().any(|r| r.id == id)
    }

    /// Number of listeners currently registered on `channel`
    pub fn listener_count(&self, channel: Channel) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|r| r.channel == channel)
            .count()
    }
}
