//! Foreground monitor: polls the platform's foreground-event stream and
//! routes locked-app activations to the authenticator.
//!
//! Runs as a background Tokio task, ticking at a fixed interval. Each tick
//! consumes the event window since the previous cursor, keeps the most
//! recent "resumed" package, and asks the gate whether it must be
//! challenged. The cursor always advances, so a failed read never replays
//! stale events on the next tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::auth::{ChallengeOrigin, ChallengeRequest};
use crate::gate::Gate;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Kind of a foreground event.
///
/// Only [`ForegroundEventKind::Resumed`] matters to the monitor; other
/// kinds are carried so the event source does not have to pre-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundEventKind {
    /// An activity of the package became the visible, active app.
    Resumed,
    /// The package left the foreground.
    Paused,
    /// Any other transition reported by the platform.
    Other,
}

/// A platform-reported foreground transition.
#[derive(Debug, Clone)]
pub struct ForegroundEvent {
    /// Package the transition belongs to.
    pub package: String,
    /// Transition kind.
    pub kind: ForegroundEventKind,
    /// When the platform observed the transition.
    pub at: DateTime<Utc>,
}

/// Time-range queryable source of foreground transitions.
#[async_trait]
pub trait ForegroundEvents: Send + Sync {
    /// Events observed in `[from, to)`, in chronological order.
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ForegroundEvent>>;
}

/// Dependencies for the monitor loop.
pub struct MonitorDeps {
    /// Gating decision function.
    pub gate: Arc<Gate>,
    /// Foreground event source.
    pub events: Arc<dyn ForegroundEvents>,
    /// Channel to the authenticator worker.
    pub challenge_tx: mpsc::Sender<ChallengeRequest>,
    /// The daemon host's own package identifier, never challenged.
    pub self_package: String,
    /// Tick interval.
    pub poll_interval: Duration,
}

/// The package of the last resumed-kind event in a window, if any.
///
/// Earlier events in the same window are irrelevant — only one app can be
/// in front at the end of the interval.
pub fn last_resumed(events: &[ForegroundEvent]) -> Option<&str> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == ForegroundEventKind::Resumed)
        .map(|e| e.package.as_str())
}

/// Run the foreground monitor loop until shutdown.
///
/// The poll cursor starts at "now": events from before the daemon started
/// are nobody's business. Trigger-once tracking lives here, separate from
/// the gate's grace-window memory: a candidate already challenged is not
/// re-challenged until a different candidate has been observed.
pub async fn run_monitor(deps: MonitorDeps, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        interval_secs = deps.poll_interval.as_secs(),
        "foreground monitor started"
    );

    let mut interval = tokio::time::interval(deps.poll_interval);
    let mut cursor = Utc::now();
    let mut last_triggered: Option<String> = None;

    // Skip the first immediate tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                run_tick(&deps, cursor, now, &mut last_triggered).await;
                // Unconditional: a read failure must not replay the window.
                cursor = now;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("foreground monitor shutting down");
                    break;
                }
            }
        }
    }

    info!("foreground monitor stopped");
}

/// Execute a single poll tick.
pub async fn run_tick(
    deps: &MonitorDeps,
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
    last_triggered: &mut Option<String>,
) {
    let events = match deps.events.query(cursor, now).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "failed to read foreground events");
            return;
        }
    };

    let Some(candidate) = last_resumed(&events) else {
        return;
    };
    debug!(candidate = %candidate, "foreground candidate");

    if candidate == deps.self_package {
        return;
    }

    // The user switched away from whatever we last challenged; a return to
    // it is a fresh foreground transition and may challenge again.
    if last_triggered.as_deref() != Some(candidate) {
        *last_triggered = None;
    }

    if last_triggered.is_some() {
        return;
    }

    match deps.gate.should_block(candidate, now) {
        Ok(true) => {
            *last_triggered = Some(candidate.to_owned());
            let request = ChallengeRequest {
                package: candidate.to_owned(),
                origin: ChallengeOrigin::Foreground,
                done: None,
            };
            if let Err(e) = deps.challenge_tx.send(request).await {
                warn!(error = %e, "authenticator channel closed");
            }
        }
        Ok(false) => {}
        Err(e) => warn!(candidate = %candidate, error = %e, "gate decision failed"),
    }
}
