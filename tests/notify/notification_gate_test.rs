//! Tests for `src/notify/mod.rs` — per-notification suppression.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use applock::auth::{ChallengeOrigin, ChallengeRequest};
use applock::gate::Gate;
use applock::notify::{NotificationGate, NotificationHost, NotificationVerdict, PostedNotification};
use applock::store::LockStore;

const SELF_PACKAGE: &str = "org.applock.host";

/// Host fake that records cancelled notification keys.
#[derive(Default)]
struct RecordingHost {
    cancelled: Mutex<Vec<String>>,
}

impl RecordingHost {
    fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().expect("lock").clone()
    }
}

#[async_trait]
impl NotificationHost for RecordingHost {
    async fn cancel(&self, key: &str) -> anyhow::Result<()> {
        self.cancelled.lock().expect("lock").push(key.to_owned());
        Ok(())
    }
}

fn gate_with_locked(locked: &[&str]) -> (Arc<Gate>, Arc<LockStore>) {
    let store = Arc::new(LockStore::open_in_memory().expect("should open store"));
    let set: BTreeSet<String> = locked.iter().map(|p| (*p).to_owned()).collect();
    store.set_locked_set(&set).expect("should write");
    (Arc::new(Gate::new(Arc::clone(&store), 30)), store)
}

fn posted(pkg: &str, key: &str) -> PostedNotification {
    PostedNotification {
        package: pkg.to_owned(),
        key: key.to_owned(),
    }
}

fn notification_gate(
    gate: Arc<Gate>,
    host: Arc<RecordingHost>,
) -> (NotificationGate, mpsc::Receiver<ChallengeRequest>) {
    let (challenge_tx, challenge_rx) = mpsc::channel(8);
    let ngate = NotificationGate::new(gate, host, challenge_tx, SELF_PACKAGE.to_owned());
    (ngate, challenge_rx)
}

#[tokio::test]
async fn locked_package_notification_is_suppressed() {
    let (gate, _store) = gate_with_locked(&["com.example.a"]);
    let host = Arc::new(RecordingHost::default());
    let (ngate, mut challenge_rx) = notification_gate(gate, Arc::clone(&host));

    let verdict = ngate
        .on_posted(&posted("com.example.a", "0|com.example.a|7"))
        .await
        .expect("verdict");

    assert_eq!(verdict, NotificationVerdict::Suppressed);
    assert_eq!(host.cancelled(), vec!["0|com.example.a|7".to_owned()]);

    let request = challenge_rx.try_recv().expect("should challenge");
    assert_eq!(request.package, "com.example.a");
    assert_eq!(request.origin, ChallengeOrigin::Notification);
}

#[tokio::test]
async fn unlocked_package_notification_is_left_alone() {
    let (gate, _store) = gate_with_locked(&["com.example.a"]);
    let host = Arc::new(RecordingHost::default());
    let (ngate, mut challenge_rx) = notification_gate(gate, Arc::clone(&host));

    let verdict = ngate
        .on_posted(&posted("com.example.free", "0|com.example.free|1"))
        .await
        .expect("verdict");

    assert_eq!(verdict, NotificationVerdict::Delivered);
    assert!(host.cancelled().is_empty());
    assert!(challenge_rx.try_recv().is_err());
}

#[tokio::test]
async fn recently_unlocked_package_notification_is_delivered() {
    let (gate, store) = gate_with_locked(&["com.example.a"]);
    store
        .record_unlock("com.example.a")
        .expect("should record");
    let host = Arc::new(RecordingHost::default());
    let (ngate, mut challenge_rx) = notification_gate(gate, Arc::clone(&host));

    let verdict = ngate
        .on_posted(&posted("com.example.a", "0|com.example.a|2"))
        .await
        .expect("verdict");

    assert_eq!(verdict, NotificationVerdict::Delivered);
    assert!(host.cancelled().is_empty());
    assert!(challenge_rx.try_recv().is_err());
}

#[tokio::test]
async fn own_notifications_are_exempt() {
    // The host package never reaches the gate, locked or not.
    let (gate, store) = gate_with_locked(&[SELF_PACKAGE]);
    assert!(store.is_locked(SELF_PACKAGE).expect("should read"));

    let host = Arc::new(RecordingHost::default());
    let (ngate, mut challenge_rx) = notification_gate(gate, Arc::clone(&host));

    let verdict = ngate
        .on_posted(&posted(SELF_PACKAGE, "0|self|1"))
        .await
        .expect("verdict");

    assert_eq!(verdict, NotificationVerdict::Delivered);
    assert!(host.cancelled().is_empty());
    assert!(challenge_rx.try_recv().is_err());
}

#[tokio::test]
async fn suppression_decision_uses_the_shared_gate_state() {
    let (gate, store) = gate_with_locked(&["com.example.a"]);
    let host = Arc::new(RecordingHost::default());
    let (ngate, _challenge_rx) = notification_gate(Arc::clone(&gate), Arc::clone(&host));

    // Foreground path allowed the app moments ago; notifications from it
    // ride the same session.
    store.record_unlock("com.example.a").expect("should record");
    assert!(!gate
        .should_block("com.example.a", Utc::now())
        .expect("decision"));

    let verdict = ngate
        .on_posted(&posted("com.example.a", "0|com.example.a|3"))
        .await
        .expect("verdict");
    assert_eq!(verdict, NotificationVerdict::Delivered);
}
