//! Session value lifecycle tests
//!
//! Single-threaded behavior of the manager and its sections: reads, commits,
//! change tracking, failure propagation and lock timeouts.

mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cart_sync_core::{
    ErrorCategory, ReadPolicy, Scopes, SessionId, SessionStore, SyncConfig, SyncError,
    has_active_update,
};
use common::{CART_ATTR, Harness, StoreOp, TestCart};
use proptest::prelude::*;

// =============================================================================
// Reads and Commits
// =============================================================================

#[test]
fn test_add_line_to_empty_cart() {
    let harness = Harness::new();
    let ctx = harness.request("S1");

    {
        let section = harness.manager.open_update_section(&ctx).unwrap();
        let mut cart = section.get_for_update();
        assert!(cart.lines.is_empty());
        cart.lines.push(("SKU-1".to_string(), 3));
        section.commit(cart).unwrap();
    }

    let cart = harness.manager.get_current_value(&ctx, false).unwrap().unwrap();
    assert_eq!(cart.lines, vec![("SKU-1".to_string(), 3)]);
    assert!(harness.manager.is_changed(&ctx));

    // A later request of the same session sees the committed cart.
    let next = harness.request("S1");
    let cart = harness.manager.get_current_value(&next, false).unwrap().unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert!(!harness.manager.is_changed(&next));
}

#[test]
fn test_missing_value_without_create_is_none() {
    let harness = Harness::new();
    let ctx = harness.request("S-empty");

    assert!(harness.manager.get_current_value_if_exists(&ctx).unwrap().is_none());
    assert_eq!(harness.creations(), 0);
    assert!(harness.store.cart("S-empty").is_none());
}

#[test]
fn test_create_on_read_stores_in_both_scopes() {
    let harness = Harness::new();
    let ctx = harness.request("S-new");

    let cart = harness.manager.get_current_value(&ctx, true).unwrap().unwrap();
    assert_eq!(*cart, TestCart::default());
    assert_eq!(harness.creations(), 1);
    assert!(harness.store.cart("S-new").is_some());
    assert!(ctx.attribute(CART_ATTR).is_some());

    // Second read is served from the request cache.
    let gets = harness.store.call_count(StoreOp::Get);
    harness.manager.get_current_value(&ctx, true).unwrap();
    assert_eq!(harness.store.call_count(StoreOp::Get), gets);
    assert_eq!(harness.creations(), 1);
}

#[test]
fn test_session_first_read_caches_into_empty_request() {
    let harness = Harness::new();
    harness.seed("S-copy", TestCart::with_total(7));
    let ctx = harness.request("S-copy");

    let cart = harness
        .manager
        .get(&ctx, ReadPolicy::SessionFirst, false, Scopes::ALL)
        .unwrap()
        .unwrap();
    assert_eq!(cart.total, 7);
    assert!(ctx.attribute(CART_ATTR).is_some());
    assert!(!harness.manager.is_changed(&ctx));
}

#[test]
fn test_session_only_read_leaves_request_empty() {
    let harness = Harness::new();
    harness.seed("S-peek", TestCart::with_total(4));
    let ctx = harness.request("S-peek");

    let cart = harness
        .manager
        .get(&ctx, ReadPolicy::SessionFirst, false, Scopes::SESSION)
        .unwrap();
    assert_eq!(cart.unwrap().total, 4);
    assert!(ctx.attribute(CART_ATTR).is_none());
}

#[test]
fn test_request_only_write_does_not_mark_changed() {
    let harness = Harness::new();
    let ctx = harness.request("S-req");

    harness
        .manager
        .set_current_value(&ctx, TestCart::with_total(9), Scopes::REQUEST)
        .unwrap();

    assert!(!harness.manager.is_changed(&ctx));
    assert!(harness.store.cart("S-req").is_none());
    let cart = harness.manager.get_current_value(&ctx, false).unwrap().unwrap();
    assert_eq!(cart.total, 9);
}

#[test]
fn test_remove_clears_both_scopes() {
    let harness = Harness::new();
    harness.seed("S-rm", TestCart::with_total(2));
    let ctx = harness.request("S-rm");
    harness.manager.get_current_value(&ctx, false).unwrap();

    {
        let _sync = harness.manager.open_sync_section(&ctx).unwrap();
        harness.manager.remove(&ctx, Scopes::ALL).unwrap();
    }

    assert!(harness.store.cart("S-rm").is_none());
    assert!(ctx.attribute(CART_ATTR).is_none());
    assert!(harness.manager.is_changed(&ctx));
}

#[test]
fn test_foreign_type_under_attribute_is_reported() {
    let harness = Harness::new();
    harness
        .store
        .set_attribute(&SessionId::new("S-odd"), CART_ATTR, Arc::new("not a cart".to_string()))
        .unwrap();
    let ctx = harness.request("S-odd");

    let err = harness.manager.get_current_value(&ctx, false).unwrap_err();
    assert!(matches!(err, SyncError::TypeMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Usage);
}

// =============================================================================
// Section Lifecycle
// =============================================================================

#[test]
fn test_close_is_idempotent_and_releases_lock() {
    let harness = Harness::new();
    let ctx = harness.request("S-close");
    let sid = SessionId::new("S-close");

    let mut section = harness.manager.open_update_section(&ctx).unwrap();
    assert!(harness.manager.locks().is_locked(&sid));
    assert!(has_active_update(&sid, CART_ATTR));

    section.close().unwrap();
    section.close().unwrap();
    drop(section);

    assert!(!harness.manager.locks().is_locked(&sid));
    assert!(!has_active_update(&sid, CART_ATTR));
}

#[test]
fn test_section_without_commit_persists_nothing() {
    let harness = Harness::new();
    harness.seed("S-lost", TestCart::with_total(5));
    let ctx = harness.request("S-lost");

    {
        let section = harness.manager.open_update_section(&ctx).unwrap();
        let mut cart = section.get_for_update();
        cart.total = 500;
    }

    assert_eq!(harness.store.cart("S-lost").unwrap().total, 5);
}

#[test]
fn test_abandoned_section_on_new_session_stores_nothing() {
    let harness = Harness::new();
    let ctx = harness.request("S-fresh");

    {
        let section = harness.manager.open_update_section(&ctx).unwrap();
        let mut cart = section.get_for_update();
        cart.lines.push(("SKU-9".to_string(), 1));
    }

    assert!(harness.store.cart("S-fresh").is_none());
    assert_eq!(harness.store.call_count(StoreOp::Set), 0);
    assert!(ctx.attribute(CART_ATTR).is_none());
    assert!(!harness.manager.is_changed(&ctx));
    assert_eq!(harness.creations(), 1);
}

#[test]
fn test_strict_mode_reports_abandoned_copy() {
    let harness = Harness::with_config(SyncConfig::default().with_strict_commit(true));
    let ctx = harness.request("S-strict");

    let mut section = harness.manager.open_update_section(&ctx).unwrap();
    let _copy = section.get_for_update();
    let err = section.close().unwrap_err();
    assert!(matches!(err, SyncError::UncommittedUpdate { .. }));
    assert!(!harness.manager.locks().is_locked(&SessionId::new("S-strict")));

    // Discarding on purpose is not an error.
    let mut section = harness.manager.open_update_section(&ctx).unwrap();
    let _copy = section.get_for_update();
    section.discard();
    assert!(section.close().is_ok());
}

#[test]
fn test_nested_section_shares_outer_working_value() {
    let harness = Harness::new();
    let ctx = harness.request("S-nest");

    let outer = harness.manager.open_update_section(&ctx).unwrap();
    {
        let inner = harness.manager.open_update_section(&ctx).unwrap();
        assert!(inner.is_nested());
        inner.commit(TestCart::with_total(11)).unwrap();
    }
    // The outer section still holds the lock and sees the inner commit.
    assert!(harness.manager.locks().is_locked(&SessionId::new("S-nest")));
    assert_eq!(outer.get_for_update().total, 11);
    assert!(outer.is_committed());
}

#[test]
fn test_set_inside_section_updates_working_value() {
    let harness = Harness::new();
    let ctx = harness.request("S-redirect");

    let section = harness.manager.open_update_section(&ctx).unwrap();
    harness
        .manager
        .set_current_value(&ctx, TestCart::with_total(42), Scopes::ALL)
        .unwrap();

    assert_eq!(section.current().unwrap().total, 42);
    assert_eq!(section.get_for_update().total, 42);
    assert_eq!(harness.store.cart("S-redirect").unwrap().total, 42);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_store_failure_propagates_without_marking_changed() {
    let harness = Harness::new();
    harness.seed("S-fail", TestCart::with_total(1));
    let ctx = harness.request("S-fail");

    let section = harness.manager.open_update_section(&ctx).unwrap();
    harness.store.fail_on(StoreOp::Set);
    let err = section.commit(TestCart::with_total(2)).unwrap_err();
    drop(section);

    assert!(matches!(err, SyncError::Store(_)));
    assert!(err.is_retryable());
    assert!(!harness.manager.is_changed(&ctx));

    harness.store.heal();
    assert_eq!(harness.store.cart("S-fail").unwrap().total, 1);
    // The lock was released despite the failure.
    assert!(!harness.manager.locks().is_locked(&SessionId::new("S-fail")));
}

#[test]
fn test_read_failure_aborts_section_open() {
    let harness = Harness::new();
    let ctx = harness.request("S-down");
    harness.store.fail_on(StoreOp::Get);

    let err = harness.manager.open_update_section(&ctx).unwrap_err();
    assert!(matches!(err, SyncError::Store(_)));
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(!harness.manager.locks().is_locked(&SessionId::new("S-down")));
}

#[test]
fn test_lock_timeout_when_session_is_held() {
    let harness = Arc::new(Harness::with_config(
        SyncConfig::default().with_lock_timeout(Duration::from_millis(30)),
    ));
    let (locked_tx, locked_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let holder_harness = Arc::clone(&harness);
    let holder = thread::spawn(move || {
        let ctx = holder_harness.request("S-held");
        let _section = holder_harness.manager.open_update_section(&ctx).unwrap();
        locked_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).ok();
    });

    locked_rx.recv().unwrap();
    let ctx = harness.request("S-held");
    let err = harness.manager.open_update_section(&ctx).unwrap_err();
    match &err {
        SyncError::LockTimeout { session_id, waited } => {
            assert_eq!(session_id, "S-held");
            assert!(*waited >= Duration::from_millis(30));
        }
        other => panic!("expected lock timeout, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(!err.suggestion().is_empty());

    done_tx.send(()).unwrap();
    holder.join().unwrap();

    // Once released, the same request gets through.
    assert!(harness.manager.open_update_section(&ctx).is_ok());
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sequential_sections_apply_every_delta(deltas in prop::collection::vec(0u32..100, 1..20)) {
        let harness = Harness::new();
        for delta in &deltas {
            let ctx = harness.request("S-prop");
            let section = harness.manager.open_update_section(&ctx).unwrap();
            let mut cart = section.get_for_update();
            cart.total += delta;
            section.commit(cart).unwrap();
        }
        let expected: u32 = deltas.iter().sum();
        prop_assert_eq!(harness.store.cart("S-prop").unwrap().total, expected);
        prop_assert_eq!(harness.creations(), 1);
    }
}
