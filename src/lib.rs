//! applock — a gating daemon for locked applications.
//!
//! Keeps a durable registry of "locked" package identifiers and challenges
//! the user with a credential prompt before a locked app may come to the
//! foreground or post a notification. The platform (usage events,
//! notification host, credential UI, launcher) sits behind trait seams and
//! is reached over a Unix-socket bridge.
//!
//! See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod auth;
pub mod gate;
pub mod monitor;
pub mod notify;

pub mod bridge;
