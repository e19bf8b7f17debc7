//! Progress and error reporting
//!
//! Reporters are explicit dependencies passed into the tasks; there
//! is no process-global state.

use crate::error::Error;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Progress sink for export and restore runs.
///
/// `on_progress` deltas include messages skipped because they are
/// already archived, so a fully resumed run still reaches the total.
pub trait Reporter: Send + Sync {
    fn set_message_total(&self, total: u64);

    fn set_message_processed(&self, processed: u64);

    fn on_progress(&self, delta: usize);
}

/// Reporter that discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn set_message_total(&self, _total: u64) {}

    fn set_message_processed(&self, _processed: u64) {}

    fn on_progress(&self, _delta: usize) {}
}

/// Collects stage errors behind a lock. The first report cancels the
/// pipeline scope so the remaining stages unwind.
pub(crate) struct ErrorReporter {
    errors: Mutex<Vec<Error>>,
    cancel: CancellationToken,
}

impl ErrorReporter {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub(crate) fn report(&self, err: Error) {
        let mut errors = self
            .errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        error!(error = %err, "stage error");
        if errors.is_empty() {
            self.cancel.cancel();
        }
        errors.push(err);
    }

    /// The first recorded error, consuming the reporter.
    pub(crate) fn into_first(self) -> Option<Error> {
        self.errors
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .next()
    }
}
