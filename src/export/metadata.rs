//! Metadata stage: paginated cursor over the message listing
//!
//! Pages the remote metadata endpoint in descending time order and
//! feeds chunks of not-yet-archived message metadata downstream.
//! Already-archived messages count as progress so a resumed export
//! still reaches 100%.

use crate::batch::split_chunks;
use crate::client::Client;
use crate::error::Result;
use crate::reporter::{ErrorReporter, Reporter};
use crate::types::{MessageFilter, MessageId, MessageMetadata};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Checks whether a message is already fully present in the archive.
pub trait MetadataFileChecker: Send + Sync {
    fn has_message(&self, id: &MessageId) -> Result<bool>;
}

/// Checker that treats every message as missing, forcing a full
/// export.
pub struct AlwaysMissingChecker;

impl MetadataFileChecker for AlwaysMissingChecker {
    fn has_message(&self, _id: &MessageId) -> Result<bool> {
        Ok(false)
    }
}

pub(crate) struct MetadataStage {
    page_size: usize,
    split_size: usize,
}

impl MetadataStage {
    pub(crate) const fn new(page_size: usize, split_size: usize) -> Self {
        Self {
            page_size,
            split_size,
        }
    }

    pub(crate) async fn run<C: Client>(
        self,
        cancel: &CancellationToken,
        client: &C,
        checker: &dyn MetadataFileChecker,
        reporter: &dyn Reporter,
        errors: &ErrorReporter,
        output: mpsc::Sender<Vec<MessageMetadata>>,
    ) {
        debug!(stage = "metadata", "starting");
        self.run_inner(cancel, client, checker, reporter, errors, output)
            .await;
        debug!(stage = "metadata", "exiting");
    }

    async fn run_inner<C: Client>(
        self,
        cancel: &CancellationToken,
        client: &C,
        checker: &dyn MetadataFileChecker,
        reporter: &dyn Reporter,
        errors: &ErrorReporter,
        output: mpsc::Sender<Vec<MessageMetadata>>,
    ) {
        let mut last_message_id: Option<MessageId> = None;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let filter = MessageFilter {
                end_id: last_message_id.clone(),
                desc: true,
            };

            let mut page = match client
                .get_message_metadata_page(cancel, 0, self.page_size, &filter)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    errors.report(err);
                    return;
                }
            };

            // The cursor is inclusive: the first element repeats the
            // last one of the previous page.
            if let (Some(last), Some(first)) = (&last_message_id, page.first()) {
                if &first.id == last {
                    page.remove(0);
                }
            }

            // Nothing left to do.
            if page.is_empty() {
                return;
            }

            if let Some(last) = page.last() {
                last_message_id = Some(last.id.clone());
            }

            let initial_len = page.len();
            let mut remaining = Vec::with_capacity(page.len());
            for metadata in page {
                match checker.has_message(&metadata.id) {
                    Ok(true) => {}
                    Ok(false) => remaining.push(metadata),
                    Err(err) => {
                        errors.report(err);
                        return;
                    }
                }
            }

            let skipped = initial_len - remaining.len();
            if skipped > 0 {
                reporter.on_progress(skipped);
            }

            if remaining.is_empty() {
                continue;
            }

            for chunk in split_chunks(remaining, self.split_size) {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    sent = output.send(chunk) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
