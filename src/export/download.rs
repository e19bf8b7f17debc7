//! Download stage: parallel fetch of message bodies and attachments
//!
//! Consumes metadata chunks, splits them into memory-bounded
//! sub-batches, and fetches up to [`PARALLEL_DOWNLOADS`] messages of
//! a sub-batch concurrently. A message that no longer exists on the
//! remote side (HTTP 422) is dropped with a warning; any other
//! failure takes the stage down.

use crate::batch::chunk_by_memory;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::reporter::ErrorReporter;
use crate::types::{Message, MessageMetadata};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) const PARALLEL_DOWNLOADS: usize = 10;

/// The message stays alive through all four pipeline stages, so its
/// bytes are accounted four times against the download budget.
const DOWNLOAD_MEMORY_MULTIPLIER: u64 = 4;

/// A message with all of its attachment bytes fetched.
pub struct FullMessage {
    pub message: Message,
    pub attachments: Vec<Vec<u8>>,
}

pub(crate) struct DownloadStage {
    max_memory: u64,
    workers: usize,
}

impl DownloadStage {
    pub(crate) const fn new(max_memory: u64, workers: usize) -> Self {
        Self {
            max_memory,
            workers,
        }
    }

    pub(crate) async fn run<C: Client>(
        self,
        cancel: &CancellationToken,
        client: &C,
        mut input: mpsc::Receiver<Vec<MessageMetadata>>,
        output: mpsc::Sender<Vec<FullMessage>>,
        errors: &ErrorReporter,
    ) {
        debug!(stage = "download", "starting");

        while let Some(batch) = recv_cancellable(cancel, &mut input).await {
            let chunks = chunk_by_memory(batch, self.max_memory, DOWNLOAD_MEMORY_MULTIPLIER, |m| {
                m.size
            });

            for chunk in chunks {
                if cancel.is_cancelled() {
                    debug!(stage = "download", "exiting");
                    return;
                }

                let results: Vec<Result<Option<FullMessage>>> = futures::stream::iter(chunk)
                    .map(|metadata| download_message(client, cancel, metadata))
                    .buffered(self.workers)
                    .collect()
                    .await;

                let mut messages = Vec::with_capacity(results.len());
                for result in results {
                    match result {
                        Ok(Some(message)) => messages.push(message),
                        Ok(None) => {}
                        Err(err) => {
                            errors.report(err);
                            debug!(stage = "download", "exiting");
                            return;
                        }
                    }
                }

                if messages.is_empty() {
                    continue;
                }

                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(stage = "download", "exiting");
                        return;
                    }
                    sent = output.send(messages) => {
                        if sent.is_err() {
                            debug!(stage = "download", "exiting");
                            return;
                        }
                    }
                }
            }
        }

        debug!(stage = "download", "exiting");
    }
}

/// Fetch one message and its attachments into pre-sized buffers.
///
/// Returns `Ok(None)` when the message no longer exists (HTTP 422).
async fn download_message<C: Client>(
    client: &C,
    cancel: &CancellationToken,
    metadata: MessageMetadata,
) -> Result<Option<FullMessage>> {
    let message = match client.get_message(cancel, &metadata.id).await {
        Ok(message) => message,
        Err(Error::Api { status: 422, .. }) => {
            warn!(message = %metadata.id, "message no longer exists, skipping");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let mut attachments = Vec::with_capacity(message.attachments.len());
    for attachment in &message.attachments {
        let mut buf = Vec::with_capacity(usize::try_from(attachment.size).unwrap_or(0));
        client
            .get_attachment_into(cancel, &attachment.id, &mut buf)
            .await?;
        attachments.push(buf);
    }

    Ok(Some(FullMessage {
        message,
        attachments,
    }))
}

/// Receive from a stage input, aborting on cancellation. A closed
/// channel ends the stage normally.
pub(crate) async fn recv_cancellable<T>(
    cancel: &CancellationToken,
    input: &mut mpsc::Receiver<T>,
) -> Option<T> {
    tokio::select! {
        () = cancel.cancelled() => None,
        item = input.recv() => item,
    }
}
