//! `ProxyStore` — the node's table of known peers: peers pass through a
//! resolving phase (handshake in progress) before being linked into the
//! main table, and a resolved resolver is detached lazily on the next
//! scheduler tick rather than inline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::event::{EventPublisher, RuntimeEvent};
use crate::identifier::NodeIdentifier;
use crate::message::{Destination, Parcel};
use crate::tracking::{TrackerKey, TrackingService};

use super::proxy::{Authorization, PeerProxy};
use super::resolver::PeerResolver;

pub struct ProxyStore {
    proxies: RwLock<HashMap<NodeIdentifier, Arc<PeerProxy>>>,
    resolving: Mutex<HashMap<NodeIdentifier, PeerResolver>>,
    pending_detach: Mutex<Vec<NodeIdentifier>>,
    events: Arc<dyn EventPublisher>,
}

impl ProxyStore {
    pub fn new(events: Arc<dyn EventPublisher>) -> Self {
        Self {
            proxies: RwLock::new(HashMap::new()),
            resolving: Mutex::new(HashMap::new()),
            pending_detach: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Begins resolving a newly-connected peer: its handshake has started
    /// but it is not yet in the main table. Returns the resolver's initial
    /// message, if it carries one (a stage 0 message or a heartbeat), for
    /// the caller to send immediately.
    pub fn declare_resolving_peer(&self, mut resolver: PeerResolver) -> Option<Vec<u8>> {
        let initial_message = resolver.take_initial_message();
        self.resolving.lock().unwrap().insert(resolver.peer().clone(), resolver);
        initial_message
    }

    /// Abandons an in-progress resolve (the peer disconnected or the
    /// handshake failed verification).
    pub fn rescind_resolving_peer(&self, peer: &NodeIdentifier) -> Option<PeerResolver> {
        self.resolving.lock().unwrap().remove(peer)
    }

    /// Promotes a peer whose resolver has reached `Ready` into the main
    /// table, merging into an existing proxy's endpoint table if one is
    /// already present for this peer rather than discarding it. The
    /// resolver itself is not removed here; it is queued for the next
    /// `process_deferred_detachments` call.
    pub fn link_peer(&self, peer: &NodeIdentifier, protocol: &str) -> Result<Arc<PeerProxy>> {
        let ready = {
            let resolving = self.resolving.lock().unwrap();
            let resolver = resolving
                .get(peer)
                .ok_or_else(|| Error::NotFound(format!("no resolving peer {peer:?}")))?;
            resolver.is_ready()
        };
        if !ready {
            return Err(Error::NotSynchronized);
        }

        let synchronizer = {
            let mut resolving = self.resolving.lock().unwrap();
            resolving.remove(peer).expect("checked above").into_synchronizer()
        };
        let package = synchronizer.finalize()?;

        let proxy = {
            let mut proxies = self.proxies.write().unwrap();
            match proxies.get(peer) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let proxy = Arc::new(PeerProxy::new(peer.clone()));
                    proxies.insert(peer.clone(), Arc::clone(&proxy));
                    proxy
                }
            }
        };
        proxy.attach_cipher(package);
        proxy.set_authorization(Authorization::Authorized);
        self.pending_detach.lock().unwrap().push(peer.clone());

        self.events.publish(RuntimeEvent::PeerConnected { peer: peer.clone(), protocol: protocol.to_string() });
        Ok(proxy)
    }

    /// Called from a scheduler delegate tick: clears any resolver entries
    /// left behind by `link_peer` (there should be none, since `link_peer`
    /// already removes them, but a resolver that was rescinded concurrently
    /// could still be queued — this makes the detach idempotent).
    pub fn process_deferred_detachments(&self) -> usize {
        let mut pending = self.pending_detach.lock().unwrap();
        let mut resolving = self.resolving.lock().unwrap();
        let count = pending.len();
        for peer in pending.drain(..) {
            resolving.remove(&peer);
        }
        count
    }

    pub fn on_endpoint_registered(&self, peer: &NodeIdentifier, endpoint: Arc<dyn Endpoint>) -> Result<()> {
        let proxy = self.find(peer).ok_or_else(|| Error::NotFound(format!("{peer:?}")))?;
        let protocol = endpoint.protocol().to_string();
        let remote_address = endpoint.remote_address();
        proxy.register_endpoint(endpoint);
        self.events.publish(RuntimeEvent::EndpointStarted { protocol, remote_address });
        Ok(())
    }

    pub fn on_endpoint_withdrawn(&self, peer: &NodeIdentifier, protocol: &str) -> Result<()> {
        let proxy = self.find(peer).ok_or_else(|| Error::NotFound(format!("{peer:?}")))?;
        let remote_address = proxy.endpoint(protocol).map(|endpoint| endpoint.remote_address()).unwrap_or_default();
        proxy.withdraw_endpoint(protocol);
        self.events.publish(RuntimeEvent::EndpointStopped { protocol: protocol.to_string(), remote_address });
        if !proxy.is_active() {
            self.events.publish(RuntimeEvent::PeerDisconnected { peer: peer.clone(), protocol: protocol.to_string() });
        }
        Ok(())
    }

    pub fn find(&self, peer: &NodeIdentifier) -> Option<Arc<PeerProxy>> {
        self.proxies.read().unwrap().get(peer).cloned()
    }

    /// Finds a peer by its printable external identifier alone, for a
    /// caller (an FFI boundary, typically) that only has the string form
    /// and not the full `NodeIdentifier` including its process-local
    /// internal handle.
    pub fn find_by_external(&self, external: &str) -> Option<Arc<PeerProxy>> {
        self.proxies
            .read()
            .unwrap()
            .values()
            .find(|proxy| proxy.identifier().external.as_str() == external)
            .cloned()
    }

    pub fn contains(&self, peer: &NodeIdentifier) -> bool {
        self.proxies.read().unwrap().contains_key(peer)
    }

    pub fn is_active(&self, peer: &NodeIdentifier) -> bool {
        self.find(peer).map(|proxy| proxy.is_active()).unwrap_or(false)
    }

    /// Establishes a peer directly, bypassing the resolver/handshake path:
    /// for a caller that has already authenticated the peer out of band
    /// (or is reconnecting a peer whose cipher package is still attached
    /// from an earlier session) and just needs its endpoint registered.
    /// Merges into an existing proxy the same way `link_peer` does.
    pub fn connect(&self, peer: NodeIdentifier, protocol: &str, endpoint: Arc<dyn Endpoint>) -> Arc<PeerProxy> {
        let remote_address = endpoint.remote_address();
        let proxy = {
            let mut proxies = self.proxies.write().unwrap();
            match proxies.get(&peer) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let proxy = Arc::new(PeerProxy::new(peer.clone()));
                    proxies.insert(peer.clone(), Arc::clone(&proxy));
                    proxy
                }
            }
        };
        proxy.register_endpoint(endpoint);
        proxy.set_authorization(Authorization::Authorized);

        self.events.publish(RuntimeEvent::PeerConnected { peer: peer.clone(), protocol: protocol.to_string() });
        self.events.publish(RuntimeEvent::EndpointStarted { protocol: protocol.to_string(), remote_address });
        proxy
    }

    /// Withdraws every endpoint of a peer and drops it from the main table,
    /// publishing `PeerDisconnected` once. A peer not currently in the table
    /// is not an error — disconnecting twice is idempotent.
    pub fn disconnect(&self, peer: &NodeIdentifier) -> Result<()> {
        let Some(proxy) = self.proxies.write().unwrap().remove(peer) else {
            return Ok(());
        };
        for protocol in proxy.protocols() {
            proxy.withdraw_endpoint(&protocol);
        }
        self.events.publish(RuntimeEvent::PeerDisconnected { peer: peer.clone(), protocol: String::new() });
        Ok(())
    }

    /// Finds the peer currently reachable over `protocol` at
    /// `remote_address`, for a caller that only has endpoint-level identity
    /// (e.g. an inbound connection before its handshake resolves).
    pub fn find_by_endpoint(&self, protocol: &str, remote_address: &str) -> Option<Arc<PeerProxy>> {
        self.proxies
            .read()
            .unwrap()
            .values()
            .find(|proxy| {
                proxy.endpoint(protocol).map(|endpoint| endpoint.remote_address()).as_deref() == Some(remote_address)
            })
            .cloned()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<PeerProxy>)) {
        for proxy in self.proxies.read().unwrap().values() {
            f(proxy);
        }
    }

    pub fn active_count(&self) -> usize {
        self.proxies.read().unwrap().values().filter(|p| p.is_active()).count()
    }

    pub fn dispatch(&self, peer: &NodeIdentifier, bytes: &[u8]) -> Result<usize> {
        let proxy = self.find(peer).ok_or_else(|| Error::NotFound(format!("{peer:?}")))?;
        if !proxy.is_active() {
            return Err(Error::NotConnected);
        }
        Ok(proxy.dispatch(bytes))
    }

    /// Resolves `parcel`'s destination into the set of peers it fans out
    /// to, dispatching to every one that is currently active and skipping
    /// the rest. If at least one peer was actually dispatched to and
    /// `tracking` is given, stages a tracker over exactly those recipients
    /// (never the merely-named ones) and returns its key; if nothing was
    /// dispatched, no tracker is staged. Returns `(tracker_key, dispatched,
    /// skipped)`.
    pub fn request(
        &self,
        parcel: &Parcel,
        tracking: Option<&mut TrackingService>,
    ) -> (Option<TrackerKey>, usize, usize) {
        let mut dispatched = 0;
        let mut skipped = 0;
        let mut recipients = Vec::new();

        match &parcel.destination {
            Destination::Direct(peer) => match self.dispatch(peer, &parcel.payload) {
                Ok(_) => {
                    dispatched += 1;
                    recipients.push(peer.clone());
                }
                Err(_) => skipped += 1,
            },
            Destination::Cluster(peers) => {
                for peer in peers {
                    match self.dispatch(peer, &parcel.payload) {
                        Ok(_) => {
                            dispatched += 1;
                            recipients.push(peer.clone());
                        }
                        Err(_) => skipped += 1,
                    }
                }
            }
            Destination::Network => {
                self.for_each(|proxy| {
                    if proxy.is_active() {
                        proxy.dispatch(&parcel.payload);
                        dispatched += 1;
                        recipients.push(proxy.identifier().clone());
                    }
                });
            }
        }

        let key = match (dispatched > 0, tracking) {
            (true, Some(tracking)) => Some(tracking.stage(parcel, recipients)),
            _ => None,
        };
        (key, dispatched, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BroadcastEventBus;
    use crate::options::SupportedAlgorithms;
    use crate::security::{CipherService, ExchangeRole, PackageSynchronizer};

    fn ready_pair() -> (PackageSynchronizer, PackageSynchronizer) {
        let service = CipherService::new(SupportedAlgorithms::default());
        let (mut initiator, stage_zero) = service
            .create_synchronizer(ExchangeRole::Initiator)
            .map(|(s, m)| (s, m.unwrap()))
            .unwrap();
        let (mut acceptor, _) = service.create_synchronizer(ExchangeRole::Acceptor).unwrap();
        let stage_one = acceptor.receive_stage_zero(&stage_zero).unwrap();
        let stage_two = initiator.receive_stage_one(&stage_one).unwrap();
        acceptor.receive_stage_two(&stage_two).unwrap();
        (initiator, acceptor)
    }

    #[test]
    fn linking_a_peer_requires_a_ready_resolver() {
        let store = ProxyStore::new(Arc::new(BroadcastEventBus::new()));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
        let proxy = store.link_peer(&peer, "tcp").unwrap();
        assert!(store.contains(&peer));
        assert_eq!(proxy.authorization(), Authorization::Authorized);
    }

    #[test]
    fn linking_an_unresolved_peer_fails() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), PackageSynchronizer::accept(Arc::new(SupportedAlgorithms::default()))));
        assert!(store.link_peer(&peer, "tcp").is_err());
    }

    #[test]
    fn deferred_detachment_clears_the_resolving_table() {
        let store = ProxyStore::new(Arc::new(BroadcastEventBus::new()));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
        store.link_peer(&peer, "tcp").unwrap();
        assert_eq!(store.process_deferred_detachments(), 1);
        assert_eq!(store.process_deferred_detachments(), 0);
    }

    #[test]
    fn declaring_a_resolving_peer_returns_its_initial_message() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        let resolver = PeerResolver::new(peer, acceptor).with_initial_message(b"stage-0".to_vec());
        assert_eq!(store.declare_resolving_peer(resolver), Some(b"stage-0".to_vec()));
    }

    #[test]
    fn linking_a_peer_merges_into_its_existing_proxy_rather_than_overwriting() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();

        let (_, first_acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), first_acceptor));
        let first_proxy = store.link_peer(&peer, "tcp").unwrap();
        first_proxy.register_endpoint(Arc::new(crate::endpoint::RecordingEndpoint::new("tcp")));

        let (_, second_acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), second_acceptor));
        let second_proxy = store.link_peer(&peer, "udp").unwrap();

        assert!(Arc::ptr_eq(&first_proxy, &second_proxy));
        assert!(second_proxy.endpoint("tcp").is_some());
    }

    fn sample_parcel(destination: Destination) -> Parcel {
        Parcel::new(NodeIdentifier::generate(), destination, "/ping", b"payload".to_vec())
    }

    #[test]
    fn request_stages_a_tracker_over_peers_actually_dispatched_to() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
        let proxy = store.link_peer(&peer, "tcp").unwrap();
        proxy.register_endpoint(Arc::new(crate::endpoint::RecordingEndpoint::new("tcp")));

        let mut tracking = TrackingService::new();
        let parcel = sample_parcel(Destination::Direct(peer));
        let (key, dispatched, skipped) = store.request(&parcel, Some(&mut tracking));
        assert!(key.is_some());
        assert_eq!(dispatched, 1);
        assert_eq!(skipped, 0);
        assert_eq!(tracking.outstanding_count(), 1);
    }

    #[test]
    fn connect_registers_an_authorized_endpoint_directly() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        let proxy = store.connect(peer.clone(), "tcp", Arc::new(crate::endpoint::RecordingEndpoint::new("tcp")));
        assert!(proxy.is_active());
        assert!(store.is_active(&peer));
    }

    #[test]
    fn find_by_external_locates_a_peer_by_its_printable_identifier() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        store.connect(peer.clone(), "tcp", Arc::new(crate::endpoint::RecordingEndpoint::new("tcp")));
        let found = store.find_by_external(peer.external.as_str()).unwrap();
        assert_eq!(found.identifier(), &peer);
        assert!(store.find_by_external("not-a-real-identifier").is_none());
    }

    #[test]
    fn disconnect_withdraws_endpoints_and_drops_the_peer() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
        let proxy = store.link_peer(&peer, "tcp").unwrap();
        proxy.register_endpoint(Arc::new(crate::endpoint::RecordingEndpoint::new("tcp")));

        store.disconnect(&peer).unwrap();
        assert!(!store.contains(&peer));
        assert!(store.disconnect(&peer).is_ok());
    }

    #[test]
    fn find_by_endpoint_locates_a_peer_by_its_remote_address() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let peer = NodeIdentifier::generate();
        let (_, acceptor) = ready_pair();
        store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
        let proxy = store.link_peer(&peer, "tcp").unwrap();
        proxy.register_endpoint(Arc::new(
            crate::endpoint::RecordingEndpoint::new("tcp").with_remote_address("10.0.0.5:9000"),
        ));

        let found = store.find_by_endpoint("tcp", "10.0.0.5:9000").unwrap();
        assert_eq!(found.identifier(), &peer);
        assert!(store.find_by_endpoint("tcp", "nowhere").is_none());
    }

    #[test]
    fn request_with_nothing_dispatched_stages_no_tracker() {
        let store = ProxyStore::new(Arc::new(crate::event::NullEventPublisher));
        let mut tracking = TrackingService::new();
        let parcel = sample_parcel(Destination::Direct(NodeIdentifier::generate()));
        let (key, dispatched, skipped) = store.request(&parcel, Some(&mut tracking));
        assert!(key.is_none());
        assert_eq!(dispatched, 0);
        assert_eq!(skipped, 1);
        assert_eq!(tracking.outstanding_count(), 0);
    }
}
