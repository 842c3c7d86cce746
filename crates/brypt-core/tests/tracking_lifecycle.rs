//! Tracker fulfillment and expiration under a paused clock, standing in for
//! the original `UT_Await` suite's synthetic clock.

use brypt_core::identifier::NodeIdentifier;
use brypt_core::message::{Destination, Parcel};
use brypt_core::tracking::{TrackingService, UpdateStatus};

fn sample_parcel(source: &NodeIdentifier) -> Parcel {
    Parcel::new(source.clone(), Destination::Network, "/status", b"query".to_vec())
}

#[tokio::test(start_paused = true)]
async fn an_unanswered_tracker_expires_after_the_fixed_deadline() {
    let mut service = TrackingService::new();
    let source = NodeIdentifier::generate();
    let peer = NodeIdentifier::generate();
    let key = service.stage(&sample_parcel(&source), vec![peer]);

    assert_eq!(service.outstanding_count(), 1);
    assert!(service.process_fulfilled().is_empty());

    tokio::time::advance(brypt_core::tracking::EXPIRATION + std::time::Duration::from_millis(1)).await;

    let completed = service.process_fulfilled();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0, key);
    assert_eq!(service.outstanding_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn responses_from_every_expected_peer_fulfill_before_the_deadline() {
    let mut service = TrackingService::new();
    let source = NodeIdentifier::generate();
    let first = NodeIdentifier::generate();
    let second = NodeIdentifier::generate();
    let key = service.stage(&sample_parcel(&source), vec![first.clone(), second.clone()]);

    assert_eq!(service.update(key, &first, b"a".to_vec()).unwrap(), UpdateStatus::Success);
    assert_eq!(service.update(key, &second, b"b".to_vec()).unwrap(), UpdateStatus::Fulfilled);

    let completed = service.process_fulfilled();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].1.response_count(), 2);
}
