//! Authenticator: runs credential challenges and releases blocked actions.
//!
//! The gate decides *whether* a challenge is needed; this module only runs
//! it. A worker loop drains [`ChallengeRequest`]s from the monitor and the
//! notification gate, awaits the platform's challenge result, and on a grant
//! records the unlock and launches the package (foreground-origin requests
//! only). Denial and cancellation mutate nothing, so the gate keeps
//! blocking.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::store::LockStore;

// ── Errors ──────────────────────────────────────────────────────

/// Credential challenge transport errors.
///
/// Denial and cancellation are outcomes, not errors; this covers only the
/// cases where no outcome could be obtained at all.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The platform connection was lost before an outcome arrived.
    #[error("challenge channel closed")]
    ChannelClosed,
}

/// App launch errors.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The package is not installed or not launchable.
    #[error("package not found: {0}")]
    NotFound(String),
    /// The platform connection was lost before a result arrived.
    #[error("launch channel closed")]
    ChannelClosed,
}

// ── Platform seams ──────────────────────────────────────────────

/// Outcome of a credential challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The user passed the biometric/device-credential challenge.
    Granted,
    /// The challenge was attempted and failed.
    Denied,
    /// The user dismissed the challenge, or the platform went away.
    Cancelled,
}

/// Platform facility that presents a credential challenge for a package.
///
/// The returned future resolves when the user acts or the prompt is
/// cancelled; there is no timeout on this side.
#[async_trait]
pub trait CredentialChallenge: Send + Sync {
    /// Present a challenge for `pkg` and await its outcome.
    async fn challenge(&self, pkg: &str) -> Result<ChallengeOutcome, AuthError>;
}

/// Platform facility that brings a package to the foreground.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    /// Launch `pkg`, or report [`LaunchError::NotFound`] if it cannot be.
    async fn launch(&self, pkg: &str) -> Result<(), LaunchError>;
}

// ── Requests ────────────────────────────────────────────────────

/// Which trigger asked for the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOrigin {
    /// A locked app surfaced in the foreground.
    Foreground,
    /// A locked app posted a notification (already suppressed).
    Notification,
}

/// A request for the authenticator worker.
#[derive(Debug)]
pub struct ChallengeRequest {
    /// Package to challenge for.
    pub package: String,
    /// Trigger that produced the request.
    pub origin: ChallengeOrigin,
    /// Optional completion signal for callers that await the outcome.
    pub done: Option<oneshot::Sender<ChallengeOutcome>>,
}

// ── Authenticator ───────────────────────────────────────────────

/// Dependencies for the authenticator worker.
pub struct AuthenticatorDeps {
    /// Store receiving ledger writes on granted challenges.
    pub store: Arc<LockStore>,
    /// Challenge facility.
    pub challenge: Arc<dyn CredentialChallenge>,
    /// Launch facility for foreground-origin grants.
    pub launcher: Arc<dyn AppLauncher>,
}

/// Handle one challenge request end to end.
///
/// On `Granted`, records the unlock before signalling completion, so a
/// caller re-evaluating the gate right after sees the fresh ledger entry.
///
/// # Errors
///
/// Returns an error only when the challenge transport fails; challenge
/// denial and cancellation resolve normally.
pub async fn authenticate(
    deps: &AuthenticatorDeps,
    request: ChallengeRequest,
) -> Result<ChallengeOutcome, AuthError> {
    let pkg = request.package.as_str();
    info!(package = %pkg, origin = ?request.origin, "challenge started");

    let outcome = deps.challenge.challenge(pkg).await?;

    match outcome {
        ChallengeOutcome::Granted => {
            if let Err(e) = deps.store.record_unlock(pkg) {
                warn!(package = %pkg, error = %e, "failed to record unlock");
            }
            info!(package = %pkg, "challenge granted");
            if request.origin == ChallengeOrigin::Foreground {
                match deps.launcher.launch(pkg).await {
                    Ok(()) => {}
                    Err(LaunchError::NotFound(p)) => {
                        // Non-fatal: the registry and ledger stay as they are.
                        warn!(package = %p, "unlocked package is not launchable");
                    }
                    Err(e) => warn!(package = %pkg, error = %e, "launch failed"),
                }
            }
        }
        ChallengeOutcome::Denied => info!(package = %pkg, "challenge denied"),
        ChallengeOutcome::Cancelled => info!(package = %pkg, "challenge cancelled"),
    }

    if let Some(done) = request.done {
        // The caller may have gone away; that only drops the signal.
        let _ = done.send(outcome);
    }
    Ok(outcome)
}

/// Run the authenticator worker loop.
///
/// Drains challenge requests until the channel closes or shutdown is
/// signalled. Requests for a package whose challenge is already in flight
/// are dropped — the platform can only show one prompt at a time.
pub async fn run_authenticator(
    deps: AuthenticatorDeps,
    mut requests: mpsc::Receiver<ChallengeRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("authenticator started");
    let deps = Arc::new(deps);
    let in_flight: Arc<std::sync::Mutex<HashSet<String>>> =
        Arc::new(std::sync::Mutex::new(HashSet::new()));

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    info!("challenge channel closed, authenticator stopping");
                    break;
                };
                let pkg = request.package.clone();
                {
                    let Ok(mut set) = in_flight.lock() else { continue };
                    if !set.insert(pkg.clone()) {
                        warn!(package = %pkg, "challenge already in flight, dropping request");
                        continue;
                    }
                }
                let deps = Arc::clone(&deps);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    if let Err(e) = authenticate(&deps, request).await {
                        warn!(package = %pkg, error = %e, "challenge did not complete");
                    }
                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&pkg);
                    }
                });
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("authenticator shutting down");
                    break;
                }
            }
        }
    }
}
