//! End-to-end handshake and peer-linking scenarios, exercising
//! `CipherService`, `PackageSynchronizer`, and `ProxyStore` together the way
//! two real nodes would.

use std::sync::Arc;

use brypt_core::event::BroadcastEventBus;
use brypt_core::identifier::NodeIdentifier;
use brypt_core::options::SupportedAlgorithms;
use brypt_core::peer::{PeerResolver, ProxyStore};
use brypt_core::security::{CipherService, ExchangeRole};
use brypt_core::EventPublisher;

#[test]
fn two_nodes_negotiate_and_exchange_an_encrypted_message() {
    let service = CipherService::new(SupportedAlgorithms::default());

    let (mut initiator, stage_zero) = service.create_synchronizer(ExchangeRole::Initiator).unwrap();
    let stage_zero = stage_zero.expect("initiator always emits a stage 0 message");

    let (mut acceptor, _) = service.create_synchronizer(ExchangeRole::Acceptor).unwrap();

    let stage_one = acceptor.receive_stage_zero(&stage_zero).unwrap();
    assert!(stage_one.accepted);

    let stage_two = initiator.receive_stage_one(&stage_one).unwrap();
    acceptor.receive_stage_two(&stage_two).unwrap();

    let initiator_package = initiator.finalize().unwrap();
    let acceptor_package = acceptor.finalize().unwrap();

    let ciphertext = initiator_package.encrypt(b"mesh handshake complete");
    let plaintext = acceptor_package.decrypt(&ciphertext).unwrap();
    assert_eq!(plaintext, b"mesh handshake complete");
}

#[test]
fn acceptor_rejects_a_proposal_with_no_mutually_supported_algorithm() {
    use brypt_core::security::wire::{LevelOffer, StageZeroMessage};
    use brypt_core::security::ConfidentialityLevel;

    let mut acceptor = brypt_core::security::PackageSynchronizer::accept(Arc::new(SupportedAlgorithms::default()));
    let bogus = StageZeroMessage {
        levels: vec![LevelOffer {
            level: ConfidentialityLevel::Low,
            key_agreement: vec!["rot13-exchange".into()],
            cipher: vec!["aes-256-ctr".into()],
            hash_function: vec!["sha256".into()],
        }],
        public_material: vec![("rot13-exchange".into(), vec![1, 2, 3])],
    };
    let reply = acceptor.receive_stage_zero(&bogus).unwrap();
    assert!(!reply.accepted);
}

#[test]
fn a_ready_resolver_links_into_an_authorized_active_proxy() {
    let events: Arc<dyn EventPublisher> = Arc::new(BroadcastEventBus::new());
    let store = ProxyStore::new(events);

    let service = CipherService::new(SupportedAlgorithms::default());
    let (mut initiator, stage_zero) =
        service.create_synchronizer(ExchangeRole::Initiator).map(|(s, m)| (s, m.unwrap())).unwrap();
    let (mut acceptor, _) = service.create_synchronizer(ExchangeRole::Acceptor).unwrap();

    let stage_one = acceptor.receive_stage_zero(&stage_zero).unwrap();
    let stage_two = initiator.receive_stage_one(&stage_one).unwrap();
    acceptor.receive_stage_two(&stage_two).unwrap();

    let peer = NodeIdentifier::generate();
    store.declare_resolving_peer(PeerResolver::new(peer.clone(), acceptor));
    let proxy = store.link_peer(&peer, "tcp").unwrap();

    use brypt_core::endpoint::RecordingEndpoint;
    proxy.register_endpoint(Arc::new(RecordingEndpoint::new("tcp")));
    assert!(store.is_active(&peer));
}
