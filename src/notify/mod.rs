//! Notification gate: suppresses notifications from locked apps.
//!
//! Unlike the foreground monitor this path has no polling latency — the
//! platform hands over each posted notification and the verdict is decided
//! synchronously with respect to that event. A suppressed notification is
//! cancelled at the host and a challenge request is queued so the user can
//! release the app.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::auth::{ChallengeOrigin, ChallengeRequest};
use crate::gate::Gate;
use crate::store::StoreError;

/// A notification the platform is about to show.
#[derive(Debug, Clone)]
pub struct PostedNotification {
    /// Originating package.
    pub package: String,
    /// Host-side key used to cancel the notification.
    pub key: String,
}

/// Platform facility that can cancel a pending notification by key.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Cancel the notification before it reaches the user.
    async fn cancel(&self, key: &str) -> anyhow::Result<()>;
}

/// Verdict for a posted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationVerdict {
    /// The notification was left alone.
    Delivered,
    /// The notification was cancelled and a challenge was queued.
    Suppressed,
}

/// Per-notification gating over the shared [`Gate`].
pub struct NotificationGate {
    gate: Arc<Gate>,
    host: Arc<dyn NotificationHost>,
    challenge_tx: mpsc::Sender<ChallengeRequest>,
    self_package: String,
}

impl NotificationGate {
    /// Create a notification gate.
    pub fn new(
        gate: Arc<Gate>,
        host: Arc<dyn NotificationHost>,
        challenge_tx: mpsc::Sender<ChallengeRequest>,
        self_package: String,
    ) -> Self {
        Self {
            gate,
            host,
            challenge_tx,
            self_package,
        }
    }

    /// Decide one posted notification.
    ///
    /// The daemon host's own notifications (including the challenge prompt
    /// itself) are never evaluated.
    ///
    /// # Errors
    ///
    /// Returns an error if the gate cannot read the store; the notification
    /// is then left delivered, consistent with "never block an app that is
    /// not known to be locked".
    pub async fn on_posted(
        &self,
        posted: &PostedNotification,
    ) -> Result<NotificationVerdict, StoreError> {
        let pkg = posted.package.as_str();
        if pkg == self.self_package {
            return Ok(NotificationVerdict::Delivered);
        }

        if !self.gate.should_block(pkg, Utc::now())? {
            debug!(package = %pkg, "notification delivered");
            return Ok(NotificationVerdict::Delivered);
        }

        if let Err(e) = self.host.cancel(&posted.key).await {
            warn!(package = %pkg, key = %posted.key, error = %e, "failed to cancel notification");
        }
        let request = ChallengeRequest {
            package: pkg.to_owned(),
            origin: ChallengeOrigin::Notification,
            done: None,
        };
        if let Err(e) = self.challenge_tx.send(request).await {
            warn!(error = %e, "authenticator channel closed");
        }
        info!(package = %pkg, key = %posted.key, "notification suppressed");
        Ok(NotificationVerdict::Suppressed)
    }
}

/// Run the notification worker loop: drain postings from the bridge until
/// the channel closes or shutdown is signalled.
pub async fn run_notification_gate(
    gate: NotificationGate,
    mut postings: mpsc::Receiver<PostedNotification>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("notification gate started");
    loop {
        tokio::select! {
            posted = postings.recv() => {
                let Some(posted) = posted else {
                    info!("notification channel closed, gate stopping");
                    break;
                };
                if let Err(e) = gate.on_posted(&posted).await {
                    warn!(package = %posted.package, error = %e, "notification decision failed");
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("notification gate shutting down");
                    break;
                }
            }
        }
    }
}
