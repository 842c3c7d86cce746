//! The awaitable request tracker: stages an outstanding request's expected
//! responders, records responses as they arrive, and sweeps completed or
//! expired trackers.

pub mod tracker;

pub use tracker::{ResponseTracker, TrackerKey, UpdateStatus};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::identifier::NodeIdentifier;
use crate::message::Parcel;

/// How long a tracked request waits for responses before it is swept as
/// expired.
pub const EXPIRATION: Duration = Duration::from_millis(1500);

/// Coordinates the outstanding `ResponseTracker`s for a node: generates
/// tracker keys, records responses as they arrive, and periodically sweeps
/// expired trackers.
pub struct TrackingService {
    trackers: HashMap<TrackerKey, ResponseTracker>,
}

impl TrackingService {
    pub fn new() -> Self {
        Self { trackers: HashMap::new() }
    }

    /// Starts tracking a request sent to `expected` peers, keyed by a digest
    /// over the originating parcel so responses can be correlated back to it.
    pub fn stage(&mut self, parcel: &Parcel, expected: Vec<NodeIdentifier>) -> TrackerKey {
        let key = generate_tracker_key(parcel);
        self.trackers.insert(key, ResponseTracker::new(expected, EXPIRATION));
        key
    }

    /// Records a response from `source`. Returns how the tracker's status
    /// changed as a result.
    pub fn update(&mut self, key: TrackerKey, source: &NodeIdentifier, payload: Vec<u8>) -> Result<UpdateStatus> {
        let tracker = self
            .trackers
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(format!("no tracker for key {key}")))?;
        Ok(tracker.record_response(source, payload))
    }

    pub fn response_count(&self, key: TrackerKey) -> Option<usize> {
        self.trackers.get(&key).map(ResponseTracker::response_count)
    }

    pub fn check_status(&self, key: TrackerKey) -> Option<tracker::ResponseStatus> {
        self.trackers.get(&key).map(ResponseTracker::status)
    }

    /// Drains and returns every tracker that is fulfilled (every expected
    /// peer responded) or whose deadline has passed, removing them from the
    /// service.
    pub fn process_fulfilled(&mut self) -> Vec<(TrackerKey, ResponseTracker)> {
        let now = Instant::now();
        let ready: Vec<TrackerKey> = self
            .trackers
            .iter()
            .filter(|(_, tracker)| tracker.is_fulfilled() || tracker.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        ready
            .into_iter()
            .filter_map(|key| self.trackers.remove(&key).map(|tracker| (key, tracker)))
            .collect()
    }

    pub fn outstanding_count(&self) -> usize {
        self.trackers.len()
    }
}

impl Default for TrackingService {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_tracker_key(parcel: &Parcel) -> TrackerKey {
    let mut seed = Vec::with_capacity(parcel.source.external.as_str().len() + parcel.payload.len());
    seed.extend_from_slice(parcel.source.external.as_str().as_bytes());
    seed.extend_from_slice(&parcel.payload);
    TrackerKey::generate_from(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Destination;

    fn sample_parcel() -> Parcel {
        Parcel::new(
            NodeIdentifier::generate(),
            Destination::Direct(NodeIdentifier::generate()),
            "/ping",
            b"payload".to_vec(),
        )
    }

    #[test]
    fn staged_tracker_is_fulfilled_once_every_peer_responds() {
        let mut service = TrackingService::new();
        let peer = NodeIdentifier::generate();
        let key = service.stage(&sample_parcel(), vec![peer.clone()]);
        let status = service.update(key, &peer, b"pong".to_vec()).unwrap();
        assert_eq!(status, UpdateStatus::Fulfilled);
        let completed = service.process_fulfilled();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].1.response_count(), 1);
    }

    #[test]
    fn update_for_unknown_key_is_an_error() {
        let mut service = TrackingService::new();
        let peer = NodeIdentifier::generate();
        assert!(service.update(TrackerKey::from_bytes([0u8; 16]), &peer, vec![]).is_err());
    }
}
