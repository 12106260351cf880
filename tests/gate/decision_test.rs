//! Tests for `src/gate/mod.rs` — the blocking decision.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use applock::gate::Gate;
use applock::store::LockStore;

const GRACE_SECS: u64 = 30;

fn store_with_locked(pkgs: &[&str]) -> Arc<LockStore> {
    let store = LockStore::open_in_memory().expect("should open store");
    let set: BTreeSet<String> = pkgs.iter().map(|p| (*p).to_owned()).collect();
    store.set_locked_set(&set).expect("should write");
    Arc::new(store)
}

fn t(secs_past_noon: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 24, 12, 0, 0).unwrap() + Duration::seconds(secs_past_noon)
}

#[test]
fn unlocked_package_is_never_blocked() {
    let store = store_with_locked(&["com.example.locked"]);
    let gate = Gate::new(Arc::clone(&store), GRACE_SECS);

    for at in [t(0), t(60), t(86_400)] {
        assert!(!gate.should_block("com.example.free", at).expect("decision"));
    }

    // Even with a stale ledger entry, non-membership dominates.
    store
        .record_unlock_at("com.example.free", t(-3600))
        .expect("should record");
    assert!(!gate.should_block("com.example.free", t(0)).expect("decision"));
}

#[test]
fn locked_package_with_no_ledger_entry_is_always_blocked() {
    let store = store_with_locked(&["com.example.a"]);
    let gate = Gate::new(store, GRACE_SECS);

    for at in [t(0), t(60), t(86_400)] {
        assert!(gate.should_block("com.example.a", at).expect("decision"));
    }
}

#[test]
fn grace_window_allows_until_exact_boundary() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");

    // Fresh gate per probe so the session shortcut does not mask the
    // time comparison.
    for (offset, expect_block) in [(0, false), (5, false), (29, false), (30, true), (31, true)] {
        let gate = Gate::new(Arc::clone(&store), GRACE_SECS);
        assert_eq!(
            gate.should_block("com.example.a", t(offset)).expect("decision"),
            expect_block,
            "offset {offset}s"
        );
    }
}

#[test]
fn session_shortcut_holds_regardless_of_elapsed_time() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");
    let gate = Gate::new(store, GRACE_SECS);

    // First allow goes through the grace window and arms the shortcut.
    assert!(!gate.should_block("com.example.a", t(5)).expect("decision"));

    // Repeated events for the same app stay allowed well past the window.
    assert!(!gate.should_block("com.example.a", t(31)).expect("decision"));
    assert!(!gate.should_block("com.example.a", t(600)).expect("decision"));
}

#[test]
fn evaluating_another_package_drops_the_shortcut() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");
    let gate = Gate::new(store, GRACE_SECS);

    assert!(!gate.should_block("com.example.a", t(5)).expect("decision"));

    // The user switches to another app; its evaluation ends the session.
    assert!(!gate.should_block("com.example.home", t(20)).expect("decision"));

    // Back inside the window the ledger still allows...
    assert!(!gate.should_block("com.example.a", t(25)).expect("decision"));
    assert!(!gate.should_block("com.example.home", t(28)).expect("decision"));
    // ...but once the window has passed, the app blocks again.
    assert!(gate.should_block("com.example.a", t(31)).expect("decision"));
}

#[test]
fn reset_session_forces_revalidation() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");
    let gate = Gate::new(store, GRACE_SECS);

    assert!(!gate.should_block("com.example.a", t(5)).expect("decision"));
    gate.reset_session();
    assert!(gate.should_block("com.example.a", t(31)).expect("decision"));
}

#[test]
fn toggling_out_and_back_in_keeps_stale_entry_blocking() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");

    store.toggle_locked("com.example.a").expect("should toggle");
    store.toggle_locked("com.example.a").expect("should toggle");
    assert!(store.is_locked("com.example.a").expect("should read"));

    let gate = Gate::new(store, GRACE_SECS);
    assert!(gate.should_block("com.example.a", t(60)).expect("decision"));
}

#[test]
fn removal_from_registry_overrides_ledger() {
    let store = store_with_locked(&["com.example.a"]);
    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");
    store.toggle_locked("com.example.a").expect("should toggle");

    let gate = Gate::new(store, GRACE_SECS);
    // Fresh unlock or stale, an unlisted package is always allowed.
    assert!(!gate.should_block("com.example.a", t(5)).expect("decision"));
    assert!(!gate.should_block("com.example.a", t(600)).expect("decision"));
}

#[test]
fn end_to_end_unlock_cycle() {
    let store = store_with_locked(&["com.example.a"]);
    let gate = Gate::new(Arc::clone(&store), GRACE_SECS);

    assert!(gate.should_block("com.example.a", t(0)).expect("decision"));

    store
        .record_unlock_at("com.example.a", t(0))
        .expect("should record");
    assert!(!gate.should_block("com.example.a", t(5)).expect("decision"));

    // The user leaves for the launcher and comes back after the window.
    assert!(!gate.should_block("com.example.home", t(10)).expect("decision"));
    assert!(gate.should_block("com.example.a", t(31)).expect("decision"));
}
