#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Encrypted mailbox backup and restore
//!
//! Core library behind a mailbox backup tool: a login state machine
//! feeds two pipelines with authenticated, key-unlocked access.
//! Export downloads, decrypts, and archives every message; Restore
//! replays an archive back to the service as new messages.
//!
//! The remote wire protocol and the OpenPGP primitives are
//! capability traits ([`client::Client`], [`crypto::KeyUnlocker`])
//! implemented by the embedding host; tests substitute fakes.

mod batch;
pub mod client;
pub mod crypto;
mod error;
pub mod export;
pub mod fileio;
pub mod keyring;
pub mod reporter;
pub mod restore;
pub mod retry;
pub mod session;
pub mod types;

#[cfg(feature = "cli")]
pub mod app;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use export::ExportTask;
pub use keyring::UnlockedKeyRing;
pub use reporter::{NullReporter, Reporter};
pub use restore::RestoreTask;
pub use retry::AutoRetryClient;
pub use session::{LoginState, Session};
