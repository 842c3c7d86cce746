//! `PeerResolver` — the in-progress handshake attached to a peer while it
//! resolves from a bare connection into an authorized `PeerProxy`. Detached
//! lazily by the scheduler rather than inline, since an in-progress
//! handshake may still be waiting on a wire message when the store wants
//! to move on.

use crate::identifier::NodeIdentifier;
use crate::security::{PackageSynchronizer, SynchronizationStatus};

pub struct PeerResolver {
    peer: NodeIdentifier,
    synchronizer: PackageSynchronizer,
    initial_message: Option<Vec<u8>>,
}

impl PeerResolver {
    pub fn new(peer: NodeIdentifier, synchronizer: PackageSynchronizer) -> Self {
        Self { peer, synchronizer, initial_message: None }
    }

    /// Attaches the bytes that should be sent to the peer the moment it is
    /// declared resolving (a stage 0 message, or a heartbeat).
    pub fn with_initial_message(mut self, message: Vec<u8>) -> Self {
        self.initial_message = Some(message);
        self
    }

    /// Takes the initial message, if any, leaving `None` behind so it is
    /// only ever handed out once.
    pub fn take_initial_message(&mut self) -> Option<Vec<u8>> {
        self.initial_message.take()
    }

    pub fn peer(&self) -> &NodeIdentifier {
        &self.peer
    }

    pub fn synchronizer(&mut self) -> &mut PackageSynchronizer {
        &mut self.synchronizer
    }

    pub fn is_ready(&self) -> bool {
        self.synchronizer.status() == SynchronizationStatus::Ready
    }

    pub fn is_failed(&self) -> bool {
        self.synchronizer.status() == SynchronizationStatus::Error
    }

    pub fn into_synchronizer(self) -> PackageSynchronizer {
        self.synchronizer
    }
}
