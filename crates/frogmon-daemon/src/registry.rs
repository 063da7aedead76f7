//! Live registry of dev server applications
//!
//! An application's identity arrives in pieces. The `dev_server.start`
//! request carries its project path and ports; the id, VM service URI and
//! server address then arrive in three separate events, in any order, each
//! tagged with the id of the originating request. The registry joins those
//! pieces and only lists an application once all of them are known.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use tokio::sync::broadcast;

use frogmon_core::events::{Channel, DaemonMessage};
use frogmon_core::prelude::*;

use crate::application::DartFrogApplication;
use crate::bus::{ListenerId, MessageBus};
use crate::protocol;

/// Prefix of the `loggerInfo` line announcing the VM service
pub const VM_SERVICE_PREFIX: &str = "The Dart VM service is listening on ";

/// Prefix of the `progressComplete` line announcing the server address
pub const ADDRESS_PREFIX: &str = "Running on ";

/// `http(s)://` up to the first whitespace, control or escape character
static URI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s\x00-\x1f\x7f]+").expect("Invalid URI regex")
});

/// Extract the first http(s) URI from a line
pub fn extract_uri(text: &str) -> Option<&str> {
    URI_REGEX.find(text).map(|m| m.as_str())
}

/// Notification emitted when the set of applications changes
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Added(DartFrogApplication),
    Removed(DartFrogApplication),
}

#[derive(Default)]
struct Applications {
    by_id: HashMap<String, DartFrogApplication>,
    order: Vec<String>,
}

struct RegistryInner {
    applications: Mutex<Applications>,
    events_tx: broadcast::Sender<RegistryEvent>,
}

impl RegistryInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Applications> {
        self.applications.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, application: DartFrogApplication) -> bool {
        let Some(id) = application.id().map(str::to_string) else {
            debug!("Skipping registration of an application without id");
            return false;
        };

        {
            let mut applications = self.lock();
            if applications.by_id.contains_key(&id) {
                debug!("Application {} already registered", id);
                return false;
            }
            applications.by_id.insert(id.clone(), application.clone());
            applications.order.push(id.clone());
        }

        info!("Application {} registered", id);
        // No subscribers is fine
        let _ = self.events_tx.send(RegistryEvent::Added(application));
        true
    }

    fn deregister(&self, id: &str) -> Option<DartFrogApplication> {
        let removed = {
            let mut applications = self.lock();
            let removed = applications.by_id.remove(id);
            if removed.is_some() {
                applications.order.retain(|known| known != id);
            }
            removed
        };

        match &removed {
            Some(application) => {
                info!("Application {} deregistered", id);
                let _ = self.events_tx.send(RegistryEvent::Removed(application.clone()));
            }
            None => debug!("Ignoring exit of unknown application {}", id),
        }
        removed
    }
}

/// Tracks applications started through a daemon
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ApplicationRegistry {
    inner: Arc<RegistryInner>,
    bus: MessageBus,
    listeners: Arc<Mutex<Vec<ListenerId>>>,
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRegistry")
            .field("applications", &self.len())
            .finish()
    }
}

impl ApplicationRegistry {
    /// Create a registry fed by the messages published on `bus`.
    ///
    /// Must be called inside a tokio runtime; each observed
    /// `dev_server.start` request spawns a task that waits for the
    /// application's identity.
    pub fn attach(bus: &MessageBus) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        let inner = Arc::new(RegistryInner {
            applications: Mutex::new(Applications::default()),
            events_tx,
        });

        let on_request = {
            let bus = bus.downgrade();
            let inner = Arc::clone(&inner);
            move |message: &DaemonMessage| {
                let Some(bus) = bus.upgrade() else {
                    return;
                };
                if let Some(request) = message.as_request() {
                    if let Some(params) = protocol::as_start_dev_server_request(message) {
                        let application = DartFrogApplication::new(
                            params.working_directory,
                            params.port,
                            params.dart_vm_service_port,
                        );
                        track_start(&bus, &inner, request.id.clone(), application);
                    }
                }
            }
        };

        let on_event = {
            let inner = Arc::clone(&inner);
            move |message: &DaemonMessage| {
                if let Some(exit) = protocol::as_application_exit_event(message) {
                    inner.deregister(&exit.application_id);
                }
            }
        };

        let listeners = vec![
            bus.on(Channel::Request, on_request),
            bus.on(Channel::Event, on_event),
        ];

        Self {
            inner,
            bus: bus.clone(),
            listeners: Arc::new(Mutex::new(listeners)),
        }
    }

    /// Stop following the bus. Known applications are kept.
    pub fn detach(&self) {
        let listeners: Vec<ListenerId> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for id in listeners {
            self.bus.off(id);
        }
    }

    /// All registered applications, in registration order
    pub fn all(&self) -> Vec<DartFrogApplication> {
        let applications = self.inner.lock();
        applications
            .order
            .iter()
            .filter_map(|id| applications.by_id.get(id).cloned())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<DartFrogApplication> {
        self.inner.lock().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to add/remove notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Insert an application with a known id.
    ///
    /// Returns `false` without notifying when the id is missing or already
    /// registered.
    pub fn register(&self, application: DartFrogApplication) -> bool {
        self.inner.register(application)
    }

    /// Remove an application by id, notifying subscribers if it was present
    pub fn deregister(&self, id: &str) -> Option<DartFrogApplication> {
        self.inner.deregister(id)
    }
}

/// Install the three resolvers for one start request, then register the
/// application once all of them have fired.
fn track_start(
    bus: &MessageBus,
    inner: &Arc<RegistryInner>,
    request_id: String,
    mut application: DartFrogApplication,
) {
    debug!("Tracking dev server start request #{}", request_id);

    let wanted = request_id.clone();
    let id_rx = bus.once(Channel::Event, move |message| {
        protocol::as_application_starting_event(message)
            .filter(|event| event.request_id == wanted)
            .map(|event| event.application_id)
    });

    let wanted = request_id.clone();
    let vm_service_rx = bus.once(Channel::Event, move |message| {
        protocol::as_logger_info_event(message)
            .filter(|event| event.request_id == wanted)
            .filter(|event| event.message.starts_with(VM_SERVICE_PREFIX))
            .and_then(|event| extract_uri(&event.message).map(str::to_string))
    });

    let wanted = request_id.clone();
    let address_rx = bus.once(Channel::Event, move |message| {
        protocol::as_progress_complete_event(message)
            .filter(|event| event.request_id == wanted)
            .filter(|event| event.progress_message.starts_with(ADDRESS_PREFIX))
            .and_then(|event| extract_uri(&event.progress_message).map(str::to_string))
    });

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let (id, vm_service_uri, address) = tokio::join!(id_rx, vm_service_rx, address_rx);
        let (Ok(id), Ok(vm_service_uri), Ok(address)) = (id, vm_service_uri, address) else {
            debug!("Start request #{} abandoned before it resolved", request_id);
            return;
        };

        application.identify(id);
        application.attach_vm_service_uri(vm_service_uri);
        application.attach_address(address);
        inner.register(application);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use std::time::Duration;

    async fn next_event(rx: &mut broadcast::Receiver<RegistryEvent>) -> RegistryEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("registry event in time")
            .expect("registry channel open")
    }

    async fn assert_no_event(rx: &mut broadcast::Receiver<RegistryEvent>) {
        let result = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "unexpected registry event: {:?}", result);
    }

    #[test]
    fn test_extract_uri_stops_at_whitespace_and_escapes() {
        assert_eq!(
            extract_uri("The Dart VM service is listening on http://127.0.0.1:8181/x=/ now"),
            Some("http://127.0.0.1:8181/x=/")
        );
        assert_eq!(
            extract_uri("Running on \u{1b}[1mhttp://localhost:8080\u{1b}[22m"),
            Some("http://localhost:8080")
        );
        assert_eq!(extract_uri("Running on https://example.com"), Some("https://example.com"));
        assert_eq!(extract_uri("no uri here"), None);
    }

    #[tokio::test]
    async fn test_concrete_registration_scenario() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&start_request("5", "/p", 8080, 8181));
        bus.publish(&application_starting("a1", "5"));
        bus.publish(&logger_info(
            "a1",
            "5",
            "The Dart VM service is listening on http://127.0.0.1:8181/x=/",
        ));
        bus.publish(&progress_complete("a1", "5", "Running on http://localhost:8080"));

        let RegistryEvent::Added(app) = next_event(&mut events).await else {
            panic!("expected Added");
        };
        assert_eq!(app.id(), Some("a1"));
        assert_eq!(app.vm_service_uri(), Some("http://127.0.0.1:8181/x=/"));
        assert_eq!(app.address(), Some("http://localhost:8080"));
        assert_eq!(app.port(), 8080);
        assert_eq!(app.vm_service_port(), 8181);
        assert_eq!(app.project_path(), std::path::Path::new("/p"));

        assert_eq!(registry.all(), vec![app.clone()]);
        assert_eq!(registry.get("a1"), Some(app));
        // All resolvers detached after firing
        assert_eq!(bus.listener_count(Channel::Event), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_resolution() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&start_request("7", "/q", 9090, 9191));
        bus.publish(&progress_complete("b2", "7", "Running on http://localhost:9090"));
        bus.publish(&logger_info(
            "b2",
            "7",
            "The Dart VM service is listening on http://127.0.0.1:9191/y=/",
        ));
        bus.publish(&application_starting("b2", "7"));

        let RegistryEvent::Added(app) = next_event(&mut events).await else {
            panic!("expected Added");
        };
        assert_eq!(app.id(), Some("b2"));
        assert_eq!(app.vm_service_uri(), Some("http://127.0.0.1:9191/y=/"));
        assert_eq!(app.address(), Some("http://localhost:9090"));
        assert!(app.is_ready());
    }

    #[tokio::test]
    async fn test_events_for_other_requests_are_ignored() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&start_request("5", "/p", 8080, 8181));
        bus.publish(&application_starting("zz", "6"));
        bus.publish(&logger_info("a1", "5", "Compiling routes"));
        bus.publish(&progress_complete("a1", "5", "Serving static assets"));
        assert_no_event(&mut events).await;

        bus.publish(&application_starting("a1", "5"));
        bus.publish(&logger_info(
            "a1",
            "5",
            "The Dart VM service is listening on http://127.0.0.1:8181/x=/",
        ));
        bus.publish(&progress_complete("a1", "5", "Running on http://localhost:8080"));

        let RegistryEvent::Added(app) = next_event(&mut events).await else {
            panic!("expected Added");
        };
        assert_eq!(app.id(), Some("a1"));
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        // Two start requests sharing an id resolve from the same triple
        bus.publish(&start_request("5", "/p", 8080, 8181));
        bus.publish(&start_request("5", "/p", 8080, 8181));
        bus.publish(&application_starting("a1", "5"));
        bus.publish(&logger_info(
            "a1",
            "5",
            "The Dart VM service is listening on http://127.0.0.1:8181/x=/",
        ));
        bus.publish(&progress_complete("a1", "5", "Running on http://localhost:8080"));

        assert!(matches!(next_event(&mut events).await, RegistryEvent::Added(_)));
        assert_no_event(&mut events).await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_triple_registers_once() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&start_request("5", "/p", 8080, 8181));
        for _ in 0..2 {
            bus.publish(&application_starting("a1", "5"));
            bus.publish(&logger_info(
                "a1",
                "5",
                "The Dart VM service is listening on http://127.0.0.1:8181/x=/",
            ));
            bus.publish(&progress_complete("a1", "5", "Running on http://localhost:8080"));
        }

        let RegistryEvent::Added(app) = next_event(&mut events).await else {
            panic!("expected Added");
        };
        assert_eq!(app.id(), Some("a1"));
        assert_no_event(&mut events).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.all(), vec![app]);
    }

    #[tokio::test]
    async fn test_register_requires_an_id() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);

        assert!(!registry.register(DartFrogApplication::new("/p", 8080, 8181)));
        assert!(registry.is_empty());

        let mut app = DartFrogApplication::new("/p", 8080, 8181);
        app.identify("a1");
        assert!(registry.register(app.clone()));
        assert!(!registry.register(app));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_deregistration_on_exit() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&start_request("5", "/p", 8080, 8181));
        bus.publish(&application_starting("a1", "5"));
        bus.publish(&logger_info(
            "a1",
            "5",
            "The Dart VM service is listening on http://127.0.0.1:8181/x=/",
        ));
        bus.publish(&progress_complete("a1", "5", "Running on http://localhost:8080"));
        let RegistryEvent::Added(added) = next_event(&mut events).await else {
            panic!("expected Added");
        };

        bus.publish(&application_exit("a1", "5", 0));

        assert_eq!(next_event(&mut events).await, RegistryEvent::Removed(added));
        assert!(registry.all().is_empty());
        assert_no_event(&mut events).await;
    }

    #[tokio::test]
    async fn test_exit_of_unknown_application_is_ignored() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        let mut events = registry.subscribe();

        bus.publish(&application_exit("ghost", "1", 1));

        assert_no_event(&mut events).await;
        assert!(registry.deregister("ghost").is_none());
    }

    #[tokio::test]
    async fn test_all_keeps_registration_order() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);

        for id in ["c", "a", "b"] {
            let mut app = DartFrogApplication::new("/p", 8080, 8181);
            app.identify(id);
            registry.register(app);
        }

        let ids: Vec<String> = registry
            .all()
            .iter()
            .map(|app| app.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_detach_stops_tracking() {
        let bus = MessageBus::new();
        let registry = ApplicationRegistry::attach(&bus);
        assert_eq!(bus.listener_count(Channel::Request), 1);

        registry.detach();
        assert_eq!(bus.listener_count(Channel::Request), 0);
        assert_eq!(bus.listener_count(Channel::Event), 0);

        bus.publish(&start_request("5", "/p", 8080, 8181));
        assert_eq!(bus.listener_count(Channel::Event), 0);
    }
}
