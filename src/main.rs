#![allow(missing_docs)]

//! applock — gating daemon for locked applications.
//!
//! `applock start` runs the daemon; the remaining subcommands inspect and
//! mutate the lock registry directly.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use applock::auth::{
    run_authenticator, AppLauncher, AuthenticatorDeps, ChallengeRequest, CredentialChallenge,
};
use applock::bridge::{run_bridge, HostCommand, PlatformBridge};
use applock::config::AppLockConfig;
use applock::gate::Gate;
use applock::monitor::{run_monitor, ForegroundEvents, MonitorDeps};
use applock::notify::{run_notification_gate, NotificationGate, NotificationHost, PostedNotification};
use applock::store::LockStore;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(name = "applock", version, about = "Lock chosen apps behind a credential challenge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the gating daemon.
    Start,
    /// Add a package to the locked set (or report it already locked).
    Lock {
        /// Package identifier, e.g. `com.example.mail`.
        package: String,
    },
    /// Remove a package from the locked set.
    Unlock {
        /// Package identifier.
        package: String,
    },
    /// Print the locked set, one package per line.
    List,
    /// Print registry size and per-package last-unlock times.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppLockConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Start => start_daemon(config).await,
        Command::Lock { package } => {
            applock::logging::init_cli();
            toggle(&config, &package, true)
        }
        Command::Unlock { package } => {
            applock::logging::init_cli();
            toggle(&config, &package, false)
        }
        Command::List => {
            applock::logging::init_cli();
            let store = open_store(&config)?;
            for pkg in store.locked_set()? {
                println!("{pkg}");
            }
            Ok(())
        }
        Command::Status => {
            applock::logging::init_cli();
            status(&config)
        }
    }
}

fn open_store(config: &AppLockConfig) -> Result<LockStore> {
    LockStore::open(Path::new(&config.paths.state_db)).context("failed to open lock store")
}

/// Move a package into or out of the locked set.
fn toggle(config: &AppLockConfig, package: &str, want_locked: bool) -> Result<()> {
    let store = open_store(config)?;
    let mut set = store.locked_set()?;
    let changed = if want_locked {
        set.insert(package.to_owned())
    } else {
        set.remove(package)
    };
    if changed {
        store.set_locked_set(&set)?;
        println!("{package}: {}", if want_locked { "locked" } else { "unlocked" });
    } else {
        println!(
            "{package}: already {}",
            if want_locked { "locked" } else { "not locked" }
        );
    }
    Ok(())
}

fn status(config: &AppLockConfig) -> Result<()> {
    let store = open_store(config)?;
    let locked: BTreeSet<String> = store.locked_set()?;
    println!("locked packages: {}", locked.len());
    for pkg in &locked {
        let last = store.last_unlock_time(pkg)?;
        if last.timestamp_millis() == 0 {
            println!("  {pkg}  (never unlocked)");
        } else {
            println!("  {pkg}  last unlocked {}", last.to_rfc3339());
        }
    }
    Ok(())
}

async fn start_daemon(config: AppLockConfig) -> Result<()> {
    let _logging_guard = applock::logging::init_daemon(Path::new(&config.paths.logs_dir))
        .context("failed to initialise logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "applock starting");

    let store = Arc::new(open_store(&config)?);
    info!(path = %config.paths.state_db, "lock store opened");

    let gate = Arc::new(Gate::new(Arc::clone(&store), config.gate.grace_window_secs));

    // Channels: daemon -> shim commands, shim -> notification worker,
    // triggers -> authenticator.
    let (cmd_tx, cmd_rx) = mpsc::channel::<HostCommand>(64);
    let (notif_tx, notif_rx) = mpsc::channel::<PostedNotification>(64);
    let (challenge_tx, challenge_rx) = mpsc::channel::<ChallengeRequest>(16);

    let bridge = Arc::new(PlatformBridge::new(cmd_tx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = tokio::spawn(run_monitor(
        MonitorDeps {
            gate: Arc::clone(&gate),
            events: Arc::clone(&bridge) as Arc<dyn ForegroundEvents>,
            challenge_tx: challenge_tx.clone(),
            self_package: config.monitor.self_package.clone(),
            poll_interval: Duration::from_secs(config.monitor.poll_interval_secs),
        },
        shutdown_rx.clone(),
    ));

    let notification_handle = tokio::spawn(run_notification_gate(
        NotificationGate::new(
            Arc::clone(&gate),
            Arc::clone(&bridge) as Arc<dyn NotificationHost>,
            challenge_tx.clone(),
            config.monitor.self_package.clone(),
        ),
        notif_rx,
        shutdown_rx.clone(),
    ));

    let authenticator_handle = tokio::spawn(run_authenticator(
        AuthenticatorDeps {
            store: Arc::clone(&store),
            challenge: Arc::clone(&bridge) as Arc<dyn CredentialChallenge>,
            launcher: Arc::clone(&bridge) as Arc<dyn AppLauncher>,
        },
        challenge_rx,
        shutdown_rx.clone(),
    ));

    let bridge_handle = tokio::spawn(run_bridge(
        Arc::clone(&bridge),
        PathBuf::from(&config.bridge.socket_path),
        cmd_rx,
        notif_tx,
        shutdown_rx,
    ));

    // The senders held here would otherwise keep worker channels open after
    // shutdown.
    drop(challenge_tx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let (monitor_res, notification_res, authenticator_res, bridge_res) = tokio::join!(
        monitor_handle,
        notification_handle,
        authenticator_handle,
        bridge_handle
    );
    for res in [monitor_res, notification_res, authenticator_res] {
        if let Err(e) = res {
            error!(error = %e, "worker task panicked");
        }
    }
    match bridge_res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "bridge exited with error"),
        Err(e) => error!(error = %e, "bridge task panicked"),
    }

    info!("applock stopped");
    Ok(())
}
