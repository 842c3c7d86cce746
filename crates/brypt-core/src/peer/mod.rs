//! Peer lifecycle: a proxy per known peer, an in-progress resolver for
//! peers mid-handshake, and the store tying both together.

pub mod proxy;
pub mod resolver;
pub mod store;

pub use proxy::{Authorization, PeerProxy};
pub use resolver::PeerResolver;
pub use store::ProxyStore;
