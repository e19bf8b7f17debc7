//! Batched message import
//!
//! Walks the validated, time-sorted message list and submits batches
//! of ten (the server's hard upper bound). A failed batch falls back
//! to importing each message individually so one bad message cannot
//! sink its nine neighbours.

use crate::client::{Client, ClientBuilder};
use crate::crypto::KeyRing;
use crate::error::{Error, Result};
use crate::export::write::{eml_file_name, metadata_file_name};
use crate::reporter::Reporter;
use crate::restore::RestoreTask;
use crate::restore::validate::{ImportableMessage, load_metadata};
use crate::types::{
    ARCHIVE_LABEL, AddressId, DRAFTS_LABEL, IMPORT_OK_CODE, INBOX_LABEL, ImportMetadata,
    ImportReq, LabelId, MessageId, OUTBOX_LABEL, SENT_LABEL, SPAM_LABEL, STARRED_LABEL,
    TRASH_LABEL,
};
use mail_builder::MessageBuilder;
use mail_builder::headers::raw::Raw;
use mail_parser::{MessageParser, MimeHeaders};
use tracing::warn;

/// Hard upper bound imposed by the import endpoint.
pub(crate) const IMPORT_BATCH_SIZE: usize = 10;

/// System labels a restored message may carry. All Mail is excluded
/// on purpose: the server rejects imports tagged with it.
const ACCEPTED_SYSTEM_LABELS: [&str; 8] = [
    INBOX_LABEL,
    TRASH_LABEL,
    SPAM_LABEL,
    ARCHIVE_LABEL,
    SENT_LABEL,
    DRAFTS_LABEL,
    OUTBOX_LABEL,
    STARRED_LABEL,
];

pub(crate) fn is_acceptable_label(id: &LabelId) -> bool {
    !id.is_system() || ACCEPTED_SYSTEM_LABELS.contains(&id.as_str())
}

impl<B: ClientBuilder> RestoreTask<'_, B> {
    pub(crate) async fn import_messages(
        &mut self,
        client: &impl Client,
        keys: &dyn KeyRing,
        address_id: &AddressId,
        import_label: &LabelId,
        messages: Vec<ImportableMessage>,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let mut batch: Vec<(MessageId, ImportReq)> = Vec::with_capacity(IMPORT_BATCH_SIZE);

        for info in messages {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let eml_path = self.backup_dir.join(eml_file_name(&info.id));
            let literal = match std::fs::read(&eml_path) {
                Ok(literal) => literal,
                Err(err) => {
                    warn!(path = %eml_path.display(), error = %err, "could not read eml file, skipping");
                    self.skipped += 1;
                    continue;
                }
            };

            let metadata_path = self.backup_dir.join(metadata_file_name(&info.id));
            let metadata = match load_metadata(&metadata_path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %metadata_path.display(), error = %err, "could not load metadata file, skipping");
                    self.skipped += 1;
                    continue;
                }
            };

            let label_ids = match self.mapped_label_ids(import_label, &metadata.label_ids) {
                Ok(label_ids) => label_ids,
                Err(err) => {
                    warn!(message = %info.id, error = %err, "could not map labels, not importing");
                    self.failed += 1;
                    continue;
                }
            };

            let literal = match ensure_text_part(&literal) {
                Ok(Some(rewritten)) => rewritten,
                Ok(None) => literal,
                Err(err) => {
                    warn!(message = %info.id, error = %err, "could not parse message literal, not importing");
                    self.failed += 1;
                    continue;
                }
            };

            batch.push((
                info.id.clone(),
                ImportReq {
                    metadata: ImportMetadata {
                        address_id: address_id.clone(),
                        label_ids,
                        unread: metadata.unread,
                        flags: metadata.flags,
                    },
                    message: literal,
                },
            ));

            if batch.len() >= IMPORT_BATCH_SIZE {
                self.import_batch(client, keys, std::mem::take(&mut batch), reporter)
                    .await?;
            }
        }

        if !batch.is_empty() {
            self.import_batch(client, keys, batch, reporter).await?;
        }

        Ok(())
    }

    /// Submit one batch. Progress is reported per batch attempted,
    /// whatever the per-message outcomes.
    async fn import_batch(
        &mut self,
        client: &impl Client,
        keys: &dyn KeyRing,
        batch: Vec<(MessageId, ImportReq)>,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let (ids, reqs): (Vec<MessageId>, Vec<ImportReq>) = batch.into_iter().unzip();

        match client
            .import_messages(&self.cancel, keys, IMPORT_BATCH_SIZE, IMPORT_BATCH_SIZE, &reqs)
            .await
        {
            Ok(results) => {
                for (id, result) in ids.iter().zip(&results) {
                    if result.code == IMPORT_OK_CODE {
                        self.imported += 1;
                    } else {
                        warn!(
                            message = %id,
                            code = result.code,
                            error = result.error.as_deref().unwrap_or(""),
                            "failed to import message"
                        );
                        self.failed += 1;
                    }
                }
                reporter.on_progress(results.len());
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                let batch_err = Error::ImportBatchFailed(err.to_string());
                warn!(error = %batch_err, "retrying messages individually");
                self.import_one_by_one(client, keys, &ids, &reqs).await?;
                reporter.on_progress(reqs.len());
            }
        }

        Ok(())
    }

    async fn import_one_by_one(
        &mut self,
        client: &impl Client,
        keys: &dyn KeyRing,
        ids: &[MessageId],
        reqs: &[ImportReq],
    ) -> Result<()> {
        for (id, req) in ids.iter().zip(reqs) {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match client
                .import_messages(&self.cancel, keys, 1, 1, std::slice::from_ref(req))
                .await
            {
                Ok(results) => match results.first() {
                    Some(result) if result.code == IMPORT_OK_CODE => self.imported += 1,
                    Some(result) => {
                        warn!(message = %id, code = result.code, "failed to import message");
                        self.failed += 1;
                    }
                    None => {
                        warn!(message = %id, "import returned no result");
                        self.failed += 1;
                    }
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(message = %id, error = %err, "failed to import message");
                    self.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// The import label plus every accepted, mapped archive label.
    fn mapped_label_ids(
        &self,
        import_label: &LabelId,
        label_ids: &[LabelId],
    ) -> Result<Vec<LabelId>> {
        let mut result = Vec::with_capacity(label_ids.len() + 1);
        result.push(import_label.clone());

        for id in label_ids {
            if !is_acceptable_label(id) {
                continue;
            }
            let remote = self
                .label_mapping
                .get(id)
                .ok_or_else(|| Error::LabelMappingNotFound(id.clone()))?;
            result.push(remote.clone());
        }

        Ok(result)
    }
}

/// Make sure the literal has a text part: a multipart body needs at
/// least one for correct server-side encryption.
///
/// Returns `Ok(None)` when the literal is fine as-is, or the
/// reserialised message with an empty text part injected.
pub(crate) fn ensure_text_part(literal: &[u8]) -> Result<Option<Vec<u8>>> {
    let Some(parsed) = MessageParser::default().parse(literal) else {
        return Err(Error::Config("could not parse message literal".to_string()));
    };

    if !parsed.text_body.is_empty() || !parsed.html_body.is_empty() {
        return Ok(None);
    }

    let mut builder = MessageBuilder::new();

    if let Some(from) = parsed.from() {
        builder = builder.from(address_pairs(from));
    }
    if let Some(to) = parsed.to() {
        builder = builder.to(address_pairs(to));
    }
    if let Some(cc) = parsed.cc() {
        builder = builder.cc(address_pairs(cc));
    }
    if let Some(subject) = parsed.subject() {
        builder = builder.subject(subject.to_string());
    }
    if let Some(id) = parsed.message_id() {
        builder = builder.header("Message-ID", Raw::new(format!("<{id}>")));
    }
    if let Some(date) = parsed.date() {
        let rendered = chrono::DateTime::from_timestamp(date.to_timestamp(), 0)
            .unwrap_or_default()
            .to_rfc2822();
        builder = builder.header("Date", Raw::new(rendered));
    }

    builder = builder.text_body("");

    for part in parsed.attachments() {
        let name = part.attachment_name().unwrap_or("attachment").to_string();
        let content_type = part.content_type().map_or_else(
            || "application/octet-stream".to_string(),
            |ctype| match ctype.subtype() {
                Some(subtype) => format!("{}/{subtype}", ctype.ctype()),
                None => ctype.ctype().to_string(),
            },
        );
        builder = builder.attachment(content_type, name, part.contents().to_vec());
    }

    let mut rewritten = Vec::with_capacity(literal.len());
    builder.write_to(&mut rewritten)?;

    Ok(Some(rewritten))
}

fn address_pairs(address: &mail_parser::Address<'_>) -> Vec<(String, String)> {
    address
        .iter()
        .map(|addr| {
            (
                addr.name().unwrap_or_default().to_string(),
                addr.address().unwrap_or_default().to_string(),
            )
        })
        .collect()
}
