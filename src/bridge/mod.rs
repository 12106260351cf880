//! Host bridge — newline-delimited JSON over a Unix domain socket.
//!
//! The platform shim (the process with usage-stats, notification, and
//! credential-prompt access) connects to the daemon's socket and streams
//! inbound events: foreground transitions, posted notifications, and the
//! results of challenges and launches it was asked to perform. The daemon
//! streams back commands: cancel a notification, show a credential
//! challenge, launch a package.
//!
//! The bridge is the concrete implementation of all four platform seams:
//! [`ForegroundEvents`], [`NotificationHost`],
//! [`CredentialChallenge`](crate::auth::CredentialChallenge), and
//! [`AppLauncher`](crate::auth::AppLauncher). Challenge and launch commands
//! are correlated with their results by UUID.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AppLauncher, AuthError, ChallengeOutcome, CredentialChallenge, LaunchError};
use crate::monitor::{ForegroundEvent, ForegroundEventKind, ForegroundEvents};
use crate::notify::{NotificationHost, PostedNotification};

/// Bound on the buffered foreground events awaiting a poll.
const EVENT_BUFFER_CAP: usize = 1024;

// ── Errors ──────────────────────────────────────────────────────

/// Bridge transport errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket setup or I/O failure.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    /// A command could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

// ── Wire types ──────────────────────────────────────────────────

/// Foreground transition kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEventKind {
    /// The package became the active, visible app.
    Resumed,
    /// The package left the foreground.
    Paused,
    /// Any other transition the shim chooses to forward.
    Other,
}

impl From<WireEventKind> for ForegroundEventKind {
    fn from(kind: WireEventKind) -> Self {
        match kind {
            WireEventKind::Resumed => ForegroundEventKind::Resumed,
            WireEventKind::Paused => ForegroundEventKind::Paused,
            WireEventKind::Other => ForegroundEventKind::Other,
        }
    }
}

/// Challenge outcome on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOutcome {
    /// Challenge passed.
    Granted,
    /// Challenge attempted and failed.
    Denied,
    /// Challenge dismissed.
    Cancelled,
}

impl From<WireOutcome> for ChallengeOutcome {
    fn from(outcome: WireOutcome) -> Self {
        match outcome {
            WireOutcome::Granted => ChallengeOutcome::Granted,
            WireOutcome::Denied => ChallengeOutcome::Denied,
            WireOutcome::Cancelled => ChallengeOutcome::Cancelled,
        }
    }
}

/// Events the shim sends to the daemon, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A foreground transition was observed.
    Foreground {
        /// Package the transition belongs to.
        package: String,
        /// Transition kind.
        kind: WireEventKind,
        /// Observation time, ms since the Unix epoch.
        at_ms: i64,
    },
    /// A notification was posted.
    Notification {
        /// Originating package.
        package: String,
        /// Host-side cancellation key.
        key: String,
    },
    /// Result of a previously requested credential challenge.
    ChallengeResult {
        /// Correlation id from the `show_challenge` command.
        id: Uuid,
        /// What the user did.
        outcome: WireOutcome,
    },
    /// Result of a previously requested launch.
    LaunchResult {
        /// Correlation id from the `launch` command.
        id: Uuid,
        /// Whether the package was resolvable and launched.
        found: bool,
    },
}

/// Commands the daemon sends to the shim, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// Cancel a posted notification before it is shown.
    CancelNotification {
        /// Host-side cancellation key.
        key: String,
    },
    /// Present a credential challenge for a package.
    ShowChallenge {
        /// Correlation id echoed back in `challenge_result`.
        id: Uuid,
        /// Package to challenge for.
        package: String,
    },
    /// Bring a package to the foreground.
    Launch {
        /// Correlation id echoed back in `launch_result`.
        id: Uuid,
        /// Package to launch.
        package: String,
    },
}

// ── PlatformBridge ──────────────────────────────────────────────

/// Shared bridge state: the command channel to the active connection's
/// writer, the buffered foreground events, and the in-flight round-trips.
pub struct PlatformBridge {
    cmd_tx: mpsc::Sender<HostCommand>,
    events: Mutex<VecDeque<ForegroundEvent>>,
    pending_challenges: Mutex<HashMap<Uuid, oneshot::Sender<ChallengeOutcome>>>,
    pending_launches: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl std::fmt::Debug for PlatformBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformBridge").finish()
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PlatformBridge {
    /// Create a bridge whose outbound commands go to `cmd_tx`.
    pub fn new(cmd_tx: mpsc::Sender<HostCommand>) -> Self {
        Self {
            cmd_tx,
            events: Mutex::new(VecDeque::new()),
            pending_challenges: Mutex::new(HashMap::new()),
            pending_launches: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound event from the shim.
    pub async fn ingest(&self, event: HostEvent, notif_tx: &mpsc::Sender<PostedNotification>) {
        match event {
            HostEvent::Foreground {
                package,
                kind,
                at_ms,
            } => {
                let at = Utc
                    .timestamp_millis_opt(at_ms)
                    .single()
                    .unwrap_or_else(Utc::now);
                let mut events = lock_ignore_poison(&self.events);
                if events.len() >= EVENT_BUFFER_CAP {
                    events.pop_front();
                }
                events.push_back(ForegroundEvent {
                    package,
                    kind: kind.into(),
                    at,
                });
            }
            HostEvent::Notification { package, key } => {
                debug!(package = %package, key = %key, "notification posted");
                if notif_tx
                    .send(PostedNotification { package, key })
                    .await
                    .is_err()
                {
                    warn!("notification channel closed");
                }
            }
            HostEvent::ChallengeResult { id, outcome } => {
                match lock_ignore_poison(&self.pending_challenges).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(outcome.into());
                    }
                    None => warn!(id = %id, "challenge result with no pending challenge"),
                }
            }
            HostEvent::LaunchResult { id, found } => {
                match lock_ignore_poison(&self.pending_launches).remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(found);
                    }
                    None => warn!(id = %id, "launch result with no pending launch"),
                }
            }
        }
    }

    /// Drop every in-flight round-trip, resolving waiting challenges as
    /// cancelled. Called when the shim connection goes away.
    pub fn abort_in_flight(&self) {
        lock_ignore_poison(&self.pending_challenges).clear();
        lock_ignore_poison(&self.pending_launches).clear();
    }
}

#[async_trait]
impl ForegroundEvents for PlatformBridge {
    async fn query(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ForegroundEvent>> {
        let mut events = lock_ignore_poison(&self.events);
        let window: Vec<ForegroundEvent> = events
            .iter()
            .filter(|e| e.at >= from && e.at < to)
            .cloned()
            .collect();
        // The caller's cursor moves to `to`; anything older is consumed.
        events.retain(|e| e.at >= to);
        Ok(window)
    }
}

#[async_trait]
impl NotificationHost for PlatformBridge {
    async fn cancel(&self, key: &str) -> anyhow::Result<()> {
        self.cmd_tx
            .send(HostCommand::CancelNotification {
                key: key.to_owned(),
            })
            .await
            .map_err(|_| anyhow::anyhow!("bridge command channel closed"))
    }
}

#[async_trait]
impl CredentialChallenge for PlatformBridge {
    async fn challenge(&self, pkg: &str) -> Result<ChallengeOutcome, AuthError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock_ignore_poison(&self.pending_challenges).insert(id, tx);

        let command = HostCommand::ShowChallenge {
            id,
            package: pkg.to_owned(),
        };
        if self.cmd_tx.send(command).await.is_err() {
            lock_ignore_poison(&self.pending_challenges).remove(&id);
            return Err(AuthError::ChannelClosed);
        }

        // A dropped connection aborts the round-trip; treat it as the user
        // walking away, which mutates nothing.
        match rx.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(ChallengeOutcome::Cancelled),
        }
    }
}

#[async_trait]
impl AppLauncher for PlatformBridge {
    async fn launch(&self, pkg: &str) -> Result<(), LaunchError> {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock_ignore_poison(&self.pending_launches).insert(id, tx);

        let command = HostCommand::Launch {
            id,
            package: pkg.to_owned(),
        };
        if self.cmd_tx.send(command).await.is_err() {
            lock_ignore_poison(&self.pending_launches).remove(&id);
            return Err(LaunchError::ChannelClosed);
        }

        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(LaunchError::NotFound(pkg.to_owned())),
            Err(_) => Err(LaunchError::ChannelClosed),
        }
    }
}

// ── Socket loop ─────────────────────────────────────────────────

/// Run the bridge socket loop: accept one shim connection at a time, pump
/// inbound lines into the bridge and outbound commands onto the wire.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound; per-connection failures
/// are logged and survive into the next accept.
pub async fn run_bridge(
    bridge: Arc<PlatformBridge>,
    socket_path: PathBuf,
    mut cmd_rx: mpsc::Receiver<HostCommand>,
    notif_tx: mpsc::Sender<PostedNotification>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    // A stale socket file from a previous run would fail the bind.
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "bridge listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        info!("platform shim connected");
                        serve_connection(&bridge, stream, &mut cmd_rx, &notif_tx, &mut shutdown_rx)
                            .await;
                        bridge.abort_in_flight();
                        info!("platform shim disconnected");
                        // The connection may have ended because shutdown was
                        // signalled; that change is already consumed.
                        if *shutdown_rx.borrow() {
                            info!("bridge shutting down");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    info!("bridge shutting down");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Pump one shim connection until it closes or shutdown is signalled.
async fn serve_connection(
    bridge: &PlatformBridge,
    stream: UnixStream,
    cmd_rx: &mut mpsc::Receiver<HostCommand>,
    notif_tx: &mpsc::Sender<PostedNotification>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match serde_json::from_str::<HostEvent>(&line) {
                        Ok(event) => bridge.ingest(event, notif_tx).await,
                        Err(e) => warn!(error = %e, "unparseable event line"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                if let Err(e) = write_command(&mut write_half, &cmd).await {
                    warn!(error = %e, "write failed, dropping command");
                    break;
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Serialize one command as a JSON line and flush it.
async fn write_command(
    write_half: &mut OwnedWriteHalf,
    cmd: &HostCommand,
) -> Result<(), BridgeError> {
    let mut line = serde_json::to_vec(cmd)?;
    line.push(b'\n');
    write_half.write_all(&line).await?;
    write_half.flush().await?;
    Ok(())
}
