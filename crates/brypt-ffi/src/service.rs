//! `BryptService` — the Rust-side runtime `brypt-ffi`'s `extern "C"`
//! functions operate on. It owns one instance of every `brypt-core`
//! subsystem and wires them together: the proxy store publishes peer
//! lifecycle onto the event bus, the scheduler carries periodic
//! housekeeping (tracker sweeps, deferred resolver detachment), and routes
//! are dispatched through the tracking service when they expect a reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use brypt_core::bootstrap::BootstrapCache;
use brypt_core::event::BroadcastEventBus;
use brypt_core::log_bridge::{self, LogRecord};
use brypt_core::scheduler::{Delegate, DelegateId, Service as SchedulerService};
use brypt_core::security::CipherService;
use brypt_core::tracking::TrackingService;
use brypt_core::message::NextAction;
use brypt_core::{Destination, Error, EventPublisher, Next, NodeIdentifier, Parcel, ProxyStore, Result, RuntimeEvent};
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;

use crate::options::ServiceOptions;

static LOG_SUBSCRIBER_INSTALLED: std::sync::Once = std::sync::Once::new();

/// A registered route handler receives the parcel and a `Next` continuation
/// to record its decision on, rather than returning a value directly — the
/// same contract `brypt-ffi`'s C callers get through `brypt_next_*`.
type RouteHandler = Box<dyn Fn(&Parcel, &mut Next) + Send + Sync>;

pub struct BryptService {
    identifier: NodeIdentifier,
    events: Arc<BroadcastEventBus>,
    proxies: Arc<ProxyStore>,
    cipher: Arc<CipherService>,
    tracking: Mutex<TrackingService>,
    bootstrap: Mutex<BootstrapCache>,
    scheduler: Mutex<SchedulerService>,
    routes: RwLock<HashMap<String, RouteHandler>>,
    running: std::sync::atomic::AtomicBool,
    log_sender: broadcast::Sender<LogRecord>,
}

impl BryptService {
    pub fn create(options: ServiceOptions) -> Arc<Self> {
        let events = Arc::new(BroadcastEventBus::new());
        let proxies = Arc::new(ProxyStore::new(events.clone() as Arc<dyn EventPublisher>));
        let cipher = Arc::new(CipherService::new(options.algorithms));

        let mut scheduler = SchedulerService::new();
        let tick_proxies = Arc::clone(&proxies);
        scheduler.register(Delegate::recurring(DelegateId::new("proxy-store-detach"), move || {
            tick_proxies.process_deferred_detachments()
        }));

        let (log_layer, _log_rx) = log_bridge::build_log_channel();
        let log_sender = log_layer.sender();
        LOG_SUBSCRIBER_INSTALLED.call_once(|| {
            let subscriber = tracing_subscriber::registry().with(log_layer);
            // Installs once per process; a second `BryptService` created
            // later shares this subscriber rather than getting its own.
            let _ = tracing::subscriber::set_global_default(subscriber);
        });

        Arc::new(Self {
            identifier: NodeIdentifier::generate(),
            events,
            proxies,
            cipher,
            tracking: Mutex::new(TrackingService::new()),
            bootstrap: Mutex::new(BootstrapCache::new()),
            scheduler: Mutex::new(scheduler),
            routes: RwLock::new(HashMap::new()),
            running: std::sync::atomic::AtomicBool::new(false),
            log_sender,
        })
    }

    /// Subscribes to this service's log stream. Note that because the
    /// global `tracing` subscriber installs only once per process, only
    /// the first `BryptService` created actually receives log events;
    /// later instances' receivers stay empty.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.log_sender.subscribe()
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, std::sync::atomic::Ordering::SeqCst) {
            tracing::warn!(identifier = %self.identifier, "service already started");
            return Err(Error::AlreadyStarted);
        }
        self.scheduler.lock().unwrap().initialize()?;
        tracing::info!(identifier = %self.identifier, "service started");
        self.events.publish(RuntimeEvent::RuntimeStarted);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, std::sync::atomic::Ordering::SeqCst) {
            tracing::warn!(identifier = %self.identifier, "service was not running");
            return Err(Error::NotStarted);
        }
        tracing::info!(identifier = %self.identifier, "service stopped");
        self.events.publish(RuntimeEvent::RuntimeStopped);
        Ok(())
    }

    pub fn restart(&self) -> Result<()> {
        let _ = self.stop();
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn identifier(&self) -> &NodeIdentifier {
        &self.identifier
    }

    pub fn register_route(&self, route: impl Into<String>, handler: RouteHandler) {
        self.routes.write().unwrap().insert(route.into(), handler);
    }

    /// Runs one scheduler tick (deferred detachments, and anything else
    /// registered) and sweeps any fulfilled or expired trackers.
    pub fn tick(&self) -> Result<usize> {
        let executed = self.scheduler.lock().unwrap().execute()?;
        self.tracking.lock().unwrap().process_fulfilled();
        Ok(executed)
    }

    pub fn proxies(&self) -> &Arc<ProxyStore> {
        &self.proxies
    }

    pub fn cipher_service(&self) -> &Arc<CipherService> {
        &self.cipher
    }

    pub fn events(&self) -> &Arc<BroadcastEventBus> {
        &self.events
    }

    pub fn bootstrap(&self) -> &Mutex<BootstrapCache> {
        &self.bootstrap
    }

    /// Dispatches a parcel to its destination and, if a route handler
    /// expects a reply, stages it with the tracking service over the peers
    /// actually reached.
    pub fn dispatch(&self, parcel: Parcel, expects_reply: bool) -> Result<Option<brypt_core::TrackerKey>> {
        if !self.is_running() {
            return Err(Error::NotStarted);
        }
        let key = if expects_reply {
            let mut tracking = self.tracking.lock().unwrap();
            let (key, _dispatched, _skipped) = self.proxies.request(&parcel, Some(&mut tracking));
            key
        } else {
            let (_, _dispatched, _skipped) = self.proxies.request(&parcel, None);
            None
        };
        Ok(key)
    }

    /// Establishes a peer's endpoint directly, without running a handshake
    /// (the caller is expected to have authenticated it out of band, or to
    /// be reattaching a peer whose cipher package survives from an earlier
    /// session).
    pub fn connect(
        &self,
        peer: NodeIdentifier,
        protocol: &str,
        endpoint: Arc<dyn brypt_core::endpoint::Endpoint>,
    ) -> Arc<brypt_core::PeerProxy> {
        self.proxies.connect(peer, protocol, endpoint)
    }

    pub fn disconnect_by_identifier(&self, peer: &NodeIdentifier) -> Result<()> {
        self.proxies.disconnect(peer)
    }

    pub fn disconnect_by_address(&self, protocol: &str, remote_address: &str) -> Result<()> {
        let Some(proxy) = self.proxies.find_by_endpoint(protocol, remote_address) else {
            return Err(Error::NotFound(format!("no peer reachable at {protocol}:{remote_address}")));
        };
        self.proxies.disconnect(proxy.identifier())
    }

    /// Invokes the handler registered for `route`, if any, with the given
    /// parcel, returning whatever action it recorded on its `Next`.
    pub fn handle(&self, route: &str, parcel: &Parcel) -> Option<NextAction> {
        let handler = self.routes.read().unwrap();
        let handler = handler.get(route)?;
        let mut next = Next::new();
        handler(parcel, &mut next);
        next.into_action()
    }

    /// Carries out a `Next` action a route handler recorded: a `Respond`
    /// yields its payload directly; a `Dispatch` is sent on and yields
    /// nothing; a `Defer` with an already-known response yields that
    /// response immediately, otherwise nothing (the caller resumes it
    /// later by correlating against the returned tracker key).
    pub fn resolve_next_action(&self, action: NextAction) -> Result<Option<Vec<u8>>> {
        match action {
            NextAction::Respond { payload, .. } => Ok(Some(payload)),
            NextAction::Dispatch { destination, route, payload } => {
                let parcel = Parcel::new(self.identifier.clone(), destination, route, payload);
                self.dispatch(parcel, false)?;
                Ok(None)
            }
            NextAction::Defer { response, .. } => Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_twice_without_stop_is_an_error() {
        let service = BryptService::create(ServiceOptions::default());
        service.start().unwrap();
        assert!(service.start().is_err());
    }

    #[test]
    fn dispatch_before_start_is_rejected() {
        let service = BryptService::create(ServiceOptions::default());
        let parcel = Parcel::new(
            service.identifier().clone(),
            Destination::Network,
            "/ping",
            b"hi".to_vec(),
        );
        assert!(service.dispatch(parcel, false).is_err());
    }

    #[test]
    fn tick_runs_the_registered_scheduler_delegates() {
        let service = BryptService::create(ServiceOptions::default());
        service.start().unwrap();
        assert!(service.tick().is_ok());
    }
}
