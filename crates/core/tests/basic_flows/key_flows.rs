//! Basic key lifecycle flows.
//! These tests verify rotation, overlap and revocation through the key store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use trustgate_crypto::{KeyStatus, KeyStoreConfig, KeyVersionStore, PrivateKey};
use trustgate_types::EntityId;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

#[test]
fn test_rotation_overlap_then_revocation() {
    let mut store = KeyVersionStore::new(KeyStoreConfig::default());
    let entity = EntityId::new("svc-billing");
    store.register_initial_at(&entity, PrivateKey::generate(), t0()).unwrap();

    // Signed by v1 before any rotation
    let t_before = t0() + Duration::days(1);
    let (sig_v1, version) = store.sign(&entity, b"invoice-42").unwrap();
    assert_eq!(version, 1);

    let t_rotate = t0() + Duration::days(10);
    let v2 = store
        .rotate_at(&entity, PrivateKey::generate(), Duration::days(30), "scheduled", t_rotate)
        .unwrap();
    assert_eq!(v2.version, 2);

    let v1 = &store.key_history(&entity)[0];
    assert_eq!(v1.status, KeyStatus::Overlapping);
    assert_eq!(v1.expires_at, Some(t_rotate + Duration::days(30)));
    assert_eq!(v1.superseded_by, Some(2));

    assert!(store.verify_signature(&entity, b"invoice-42", &sig_v1, t_before));

    // New signatures come from v2
    let (sig_v2, version) = store.sign(&entity, b"invoice-43").unwrap();
    assert_eq!(version, 2);
    assert!(store.verify_signature(&entity, b"invoice-43", &sig_v2, t_rotate + Duration::days(1)));

    // Revocation applies even inside the overlap window
    store.revoke_at(&entity, 1, "compromised", t_rotate + Duration::days(2)).unwrap();
    assert!(!store.verify_signature(&entity, b"invoice-42", &sig_v1, t_before));
    assert!(store.key_valid_at(&entity, t_before).is_none());
}

#[test]
fn test_old_key_after_rotation_is_not_accepted() {
    let mut store = KeyVersionStore::new(KeyStoreConfig::default());
    let entity = EntityId::new("svc-billing");
    let old_key = PrivateKey::generate();
    store.register_initial_at(&entity, old_key.clone(), t0()).unwrap();
    store
        .rotate_at(&entity, PrivateKey::generate(), Duration::days(30), "scheduled", t0() + Duration::days(1))
        .unwrap();

    let late_sig = old_key.sign(b"after-rotation");
    assert!(!store.verify_signature(&entity, b"after-rotation", &late_sig, t0() + Duration::days(2)));
}

#[test]
fn test_unknown_entity_and_version_errors() {
    let mut store = KeyVersionStore::new(KeyStoreConfig::default());
    let ghost = EntityId::new("ghost");
    assert!(store.rotate(&ghost, PrivateKey::generate(), None, "x").is_err());
    assert!(store.revoke(&ghost, 1, "x").is_err());
    assert!(!store.verify_signature(&ghost, b"m", &PrivateKey::generate().sign(b"m"), t0()));

    store.register_initial_at(&ghost, PrivateKey::generate(), t0()).unwrap();
    assert!(store.revoke(&ghost, 9, "x").is_err());
}

#[test]
fn test_key_valid_at_picks_single_non_revoked_key() {
    let mut store = KeyVersionStore::new(KeyStoreConfig::default());
    let entity = EntityId::new("svc");
    store.register_initial_at(&entity, PrivateKey::generate(), t0()).unwrap();
    for i in 1..=3 {
        store
            .rotate_at(&entity, PrivateKey::generate(), Duration::days(30), "cycle", t0() + Duration::days(i))
            .unwrap();
    }

    let at = t0() + Duration::days(5);
    assert_eq!(store.key_valid_at(&entity, at).unwrap().version, 4);

    store.revoke_at(&entity, 4, "lost", at).unwrap();
    let fallback = store.key_valid_at(&entity, at).unwrap();
    assert_eq!(fallback.version, 3);
    assert_ne!(fallback.status, KeyStatus::Revoked);
}
