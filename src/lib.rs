//! Outreach: WhatsApp/SMS campaign sending and delivery reconciliation.
//!
//! The crate is built around two append-only logs. A batch appends one row
//! per recipient to the send log; delivery callbacks append to the status
//! log. Reconciliation joins snapshots of both into follow-up lists.

pub mod channels;
pub mod cli;
pub mod config;
pub mod contacts;
pub mod error;
pub mod logs;
pub mod message;
pub mod reconcile;
pub mod sender;

pub use config::Config;
pub use error::{Error, Result};
