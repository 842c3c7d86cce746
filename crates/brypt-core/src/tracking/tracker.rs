//! `ResponseTracker` — the per-request bookkeeping a `TrackingService`
//! stages. Tracker keys are 128 bits, wide enough to draw at random without
//! a meaningful collision risk.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::identifier::NodeIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerKey([u8; 16]);

impl TrackerKey {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Derives a tracker key from `seed` salted with fresh randomness, so
    /// repeated calls with the same seed never collide.
    pub fn generate_from(seed: &[u8]) -> Self {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(seed);
        let mut salt = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        hasher.update(salt);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }
}

impl std::fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// The result of recording one response against a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// The tracker's deadline had already passed.
    Expired,
    /// A response arrived from a peer that was not in the expected set.
    Unexpected,
    /// The response was recorded and more are still outstanding.
    Success,
    /// The response was recorded and every expected peer has now responded.
    Fulfilled,
}

/// Coarse tracker status for external queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Unfulfilled,
    Fulfilled,
    Completed,
}

struct ResponseEntry {
    payload: Vec<u8>,
}

pub struct ResponseTracker {
    expected: HashMap<NodeIdentifier, Option<ResponseEntry>>,
    deadline: Instant,
    fulfilled: bool,
}

impl ResponseTracker {
    pub fn new(expected: Vec<NodeIdentifier>, expiration: Duration) -> Self {
        let expected = expected.into_iter().map(|peer| (peer, None)).collect();
        Self {
            expected,
            deadline: Instant::now() + expiration,
            fulfilled: false,
        }
    }

    pub fn record_response(&mut self, source: &NodeIdentifier, payload: Vec<u8>) -> UpdateStatus {
        if self.is_expired(Instant::now()) {
            return UpdateStatus::Expired;
        }
        let Some(slot) = self.expected.get_mut(source) else {
            return UpdateStatus::Unexpected;
        };
        *slot = Some(ResponseEntry { payload });

        if self.expected.values().all(Option::is_some) {
            self.fulfilled = true;
            UpdateStatus::Fulfilled
        } else {
            UpdateStatus::Success
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Number of peers that have responded so far.
    pub fn response_count(&self) -> usize {
        self.expected.values().filter(|entry| entry.is_some()).count()
    }

    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    pub fn status(&self) -> ResponseStatus {
        if self.fulfilled {
            ResponseStatus::Completed
        } else if self.response_count() > 0 {
            ResponseStatus::Fulfilled
        } else {
            ResponseStatus::Unfulfilled
        }
    }

    /// Every response payload collected so far, in no particular order.
    pub fn responses(&self) -> Vec<&[u8]> {
        self.expected
            .values()
            .filter_map(|entry| entry.as_ref().map(|entry| entry.payload.as_slice()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_source_does_not_fulfill_the_tracker() {
        let expected = NodeIdentifier::generate();
        let stranger = NodeIdentifier::generate();
        let mut tracker = ResponseTracker::new(vec![expected], Duration::from_millis(1500));
        let status = tracker.record_response(&stranger, vec![1]);
        assert_eq!(status, UpdateStatus::Unexpected);
        assert!(!tracker.is_fulfilled());
    }

    #[test]
    fn expired_tracker_rejects_further_responses() {
        let expected = NodeIdentifier::generate();
        let mut tracker = ResponseTracker::new(vec![expected.clone()], Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let status = tracker.record_response(&expected, vec![1]);
        assert_eq!(status, UpdateStatus::Expired);
    }
}
