//! The gate: decides whether a package event must be challenged.
//!
//! A decision combines three inputs — locked-set membership, the
//! last-allowed-foreground session memory, and the unlock ledger timestamp —
//! plus the caller-supplied current time. The gate never consults the clock
//! itself, which keeps every decision replayable in tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::store::{LockStore, StoreError};

/// Default grace window after a successful unlock.
pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 30;

/// Gating decision function over the lock store plus one piece of session
/// memory: the package most recently allowed through under the grace window.
///
/// The session memory is a cache of one decision, not a correctness
/// mechanism. Losing it on restart costs one extra challenge; the ledger
/// check still re-validates every package.
pub struct Gate {
    store: Arc<LockStore>,
    grace_window: Duration,
    last_allowed_foreground: Mutex<Option<String>>,
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("grace_window", &self.grace_window)
            .finish()
    }
}

impl Gate {
    /// Create a gate over a store with the given grace window in seconds.
    pub fn new(store: Arc<LockStore>, grace_window_secs: u64) -> Self {
        Self {
            store,
            grace_window: Duration::seconds(i64::try_from(grace_window_secs).unwrap_or(i64::MAX)),
            last_allowed_foreground: Mutex::new(None),
        }
    }

    /// Whether an event for `pkg` observed at `now` must be blocked pending
    /// a credential challenge.
    ///
    /// Evaluation order:
    /// 1. not in the locked set → allow (the dominant case);
    /// 2. equals the last-allowed-foreground package → allow, skipping the
    ///    ledger lookup for repeated events from the app in active use;
    /// 3. unlocked within the grace window → allow, and remember the package
    ///    so rule 2 short-circuits the next event;
    /// 4. otherwise → block.
    ///
    /// Evaluating any other package ends the current foreground session and
    /// drops the rule-2 shortcut, so returning to an app re-validates
    /// against the ledger. An elapsed time of exactly the grace window
    /// blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn should_block(&self, pkg: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let same_session = self.last_allowed(|last| match last.as_deref() {
            Some(last) => last == pkg,
            None => false,
        });
        if !same_session {
            // A different package surfaced; the previous session is over.
            self.set_last_allowed(None);
        }

        if !self.store.is_locked(pkg)? {
            return Ok(false);
        }

        if same_session {
            debug!(package = %pkg, "allow: same foreground session");
            return Ok(false);
        }

        let last_unlock = self.store.last_unlock_time(pkg)?;
        let elapsed = now.signed_duration_since(last_unlock);
        if elapsed < self.grace_window {
            debug!(
                package = %pkg,
                elapsed_ms = elapsed.num_milliseconds(),
                "allow: within grace window"
            );
            self.set_last_allowed(Some(pkg.to_owned()));
            return Ok(false);
        }

        debug!(package = %pkg, "block: challenge required");
        Ok(true)
    }

    /// Forget the last-allowed-foreground package.
    ///
    /// Harmless at any time; the next grace-window allow repopulates it.
    pub fn reset_session(&self) {
        self.set_last_allowed(None);
    }

    fn last_allowed<R>(&self, f: impl FnOnce(&Option<String>) -> R) -> R {
        match self.last_allowed_foreground.lock() {
            Ok(guard) => f(&guard),
            // A poisoned mutex here only risks an extra challenge.
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn set_last_allowed(&self, value: Option<String>) {
        match self.last_allowed_foreground.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}
