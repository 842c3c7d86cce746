//! The bootstrap cache's staged-update and file-persistence behavior across
//! process boundaries (simulated by constructing a second `BootstrapCache`
//! bound to the same path).

use brypt_core::bootstrap::{BootstrapCache, Origin};

#[test]
fn updates_from_multiple_origins_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peers.json");

    {
        let mut cache = BootstrapCache::with_file(&path);
        cache.stage("tcp", "203.0.113.5:9000", Origin::User);
        cache.stage("tcp", "203.0.113.6:9000", Origin::Network);
        let result = cache.update_cache().unwrap();
        assert_eq!(result.applied, 2);
        assert_eq!(result.difference, 2);
    }

    let mut reloaded = BootstrapCache::with_file(&path);
    reloaded.load().unwrap();
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.contains("tcp", "203.0.113.5:9000"));
    assert!(reloaded.contains("tcp", "203.0.113.6:9000"));
}

#[test]
fn restaging_an_existing_address_does_not_grow_the_cache() {
    let mut cache = BootstrapCache::new();
    cache.stage("tcp", "198.51.100.1:9000", Origin::Cache);
    cache.update_cache().unwrap();
    cache.stage("tcp", "198.51.100.1:9000", Origin::Network);
    let result = cache.update_cache().unwrap();
    assert_eq!(result.difference, 0);
    assert_eq!(cache.len(), 1);
}
