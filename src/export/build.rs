//! Build stage: decrypt and assemble messages
//!
//! For each downloaded message the stage picks one of three on-disk
//! representations, degrading per message instead of failing the
//! pipeline:
//!
//! 1. no keyring for the owning address -> `NoAddressKey` (original
//!    encrypted parts),
//! 2. decrypted parts assemble into a single RFC822 literal ->
//!    `DecryptedAndBuilt`,
//! 3. assembly fails -> `FailedToAssemble` (parts kept separate).

use crate::batch::chunk_by_memory;
use crate::export::download::FullMessage;
use crate::keyring::UnlockedKeyRing;
use crate::reporter::ErrorReporter;
use crate::types::{ArchivedMetadata, AttachmentId, Message, WriterType};
use futures::StreamExt;
use mail_builder::MessageBuilder;
use mail_builder::headers::raw::Raw;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) const PARALLEL_BUILDERS: usize = 4;

/// Past this stage the message lives through build and write, so its
/// bytes are accounted twice against the build budget.
const BUILD_MEMORY_MULTIPLIER: u64 = 2;

/// Messages dated before 1970 get this Date instead
/// (1982-08-13T00:00:00Z, the day RFC 822 was published).
const RFC822_EPOCH: i64 = 398_044_800;

const DECRYPT_PLACEHOLDER: &str =
    "This message could not be decrypted. Its encrypted parts are attached.";

/// One message part, decrypted when possible.
pub struct MessagePart {
    pub data: Vec<u8>,
    pub decrypted: bool,
}

pub struct AttachmentPart {
    pub id: AttachmentId,
    pub name: String,
    pub mime_type: String,
    pub part: MessagePart,
}

/// The chosen on-disk representation of one message.
pub enum MessageWriter {
    DecryptedAndBuilt {
        eml: Vec<u8>,
    },
    FailedToAssemble {
        body: MessagePart,
        attachments: Vec<AttachmentPart>,
    },
    NoAddressKey {
        body: MessagePart,
        attachments: Vec<AttachmentPart>,
    },
}

impl MessageWriter {
    pub(crate) const fn writer_type(&self) -> WriterType {
        match self {
            Self::DecryptedAndBuilt { .. } => WriterType::DecryptedAndBuilt,
            Self::FailedToAssemble { .. } => WriterType::FailedToAssemble,
            Self::NoAddressKey { .. } => WriterType::NoAddressKey,
        }
    }
}

pub struct BuiltMessage {
    pub metadata: ArchivedMetadata,
    pub writer: MessageWriter,
}

pub(crate) struct BuildStage {
    max_memory: u64,
    builders: usize,
}

impl BuildStage {
    pub(crate) const fn new(max_memory: u64, builders: usize) -> Self {
        Self {
            max_memory,
            builders,
        }
    }

    pub(crate) async fn run(
        self,
        cancel: &CancellationToken,
        keyring: &UnlockedKeyRing,
        mut input: mpsc::Receiver<Vec<FullMessage>>,
        output: mpsc::Sender<Vec<BuiltMessage>>,
        _errors: &ErrorReporter,
    ) {
        debug!(stage = "build", "starting");

        while let Some(batch) =
            crate::export::download::recv_cancellable(cancel, &mut input).await
        {
            let chunks = chunk_by_memory(batch, self.max_memory, BUILD_MEMORY_MULTIPLIER, |m| {
                m.message.size
            });

            for chunk in chunks {
                if cancel.is_cancelled() {
                    debug!(stage = "build", "exiting");
                    return;
                }

                let built: Vec<BuiltMessage> = futures::stream::iter(chunk)
                    .map(|message| async move { build_message(keyring, message) })
                    .buffered(self.builders)
                    .collect()
                    .await;

                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(stage = "build", "exiting");
                        return;
                    }
                    sent = output.send(built) => {
                        if sent.is_err() {
                            debug!(stage = "build", "exiting");
                            return;
                        }
                    }
                }
            }
        }

        debug!(stage = "build", "exiting");
    }
}

/// Decide the on-disk representation for one message. Never fails:
/// every problem degrades to a more conservative writer.
pub(crate) fn build_message(keyring: &UnlockedKeyRing, full: FullMessage) -> BuiltMessage {
    let Some(keys) = keyring.address_keys(&full.message.address_id) else {
        warn!(
            message = %full.message.id,
            address = %full.message.address_id,
            "no keyring for address, archiving encrypted parts"
        );
        let (body, attachments) = encrypted_parts(&full);
        return BuiltMessage {
            metadata: ArchivedMetadata::new(&full.message, WriterType::NoAddressKey),
            writer: MessageWriter::NoAddressKey { body, attachments },
        };
    };

    let (body, attachments) = decrypted_parts(keys, &full);

    match assemble_rfc822(&full.message, &body, &attachments) {
        Ok(eml) => BuiltMessage {
            metadata: ArchivedMetadata::new(&full.message, WriterType::DecryptedAndBuilt),
            writer: MessageWriter::DecryptedAndBuilt { eml },
        },
        Err(err) => {
            warn!(
                message = %full.message.id,
                error = %err,
                "failed to assemble message, archiving parts separately"
            );
            BuiltMessage {
                metadata: ArchivedMetadata::new(&full.message, WriterType::FailedToAssemble),
                writer: MessageWriter::FailedToAssemble { body, attachments },
            }
        }
    }
}

fn encrypted_parts(full: &FullMessage) -> (MessagePart, Vec<AttachmentPart>) {
    let body = MessagePart {
        data: full.message.body.clone().into_bytes(),
        decrypted: false,
    };

    let attachments = full
        .message
        .attachments
        .iter()
        .zip(&full.attachments)
        .map(|(descriptor, data)| AttachmentPart {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            mime_type: descriptor.mime_type.clone(),
            part: MessagePart {
                data: data.clone(),
                decrypted: false,
            },
        })
        .collect();

    (body, attachments)
}

/// Decrypt body and attachments, keeping undecryptable parts in their
/// encrypted form.
fn decrypted_parts(
    keys: &dyn crate::crypto::KeyRing,
    full: &FullMessage,
) -> (MessagePart, Vec<AttachmentPart>) {
    let body = match keys.decrypt(full.message.body.as_bytes()) {
        Ok(data) => MessagePart {
            data,
            decrypted: true,
        },
        Err(err) => {
            warn!(message = %full.message.id, error = %err, "failed to decrypt body");
            MessagePart {
                data: full.message.body.clone().into_bytes(),
                decrypted: false,
            }
        }
    };

    let attachments = full
        .message
        .attachments
        .iter()
        .zip(&full.attachments)
        .map(|(descriptor, data)| {
            let part = match keys.decrypt(data) {
                Ok(decrypted) => MessagePart {
                    data: decrypted,
                    decrypted: true,
                },
                Err(err) => {
                    warn!(
                        message = %full.message.id,
                        attachment = %descriptor.id,
                        error = %err,
                        "failed to decrypt attachment"
                    );
                    MessagePart {
                        data: data.clone(),
                        decrypted: false,
                    }
                }
            };
            AttachmentPart {
                id: descriptor.id.clone(),
                name: descriptor.name.clone(),
                mime_type: descriptor.mime_type.clone(),
                part,
            }
        })
        .collect();

    (body, attachments)
}

#[derive(Debug, thiserror::Error)]
enum AssembleError {
    #[error("message body is not valid UTF-8")]
    BodyNotText,

    #[error("failed to serialize message: {0}")]
    Write(#[from] std::io::Error),
}

/// Assemble one RFC822 literal from the (possibly partially)
/// decrypted parts.
///
/// Undecryptable parts degrade: the body becomes a placeholder text,
/// attachments stay encrypted and are attached under a `.pgp` name.
fn assemble_rfc822(
    message: &Message,
    body: &MessagePart,
    attachments: &[AttachmentPart],
) -> std::result::Result<Vec<u8>, AssembleError> {
    let mut references = String::new();
    let mut builder = MessageBuilder::new();

    for header in &message.headers {
        let name = header.name.as_str();
        if name.eq_ignore_ascii_case("references") {
            references.clone_from(&header.value);
        }
        if is_structural_header(name) {
            continue;
        }
        builder = builder.header(header.name.clone(), Raw::new(header.value.clone()));
    }

    let time = if message.time < 0 {
        RFC822_EPOCH
    } else {
        message.time
    };
    let date = chrono::DateTime::from_timestamp(time, 0)
        .unwrap_or_default()
        .to_rfc2822();

    builder = builder.header("Date", Raw::new(date.clone()));
    builder = builder.header("X-Pm-Internal-Id", Raw::new(message.id.as_str().to_string()));
    if let Some(external_id) = &message.external_id {
        builder = builder.header("X-Pm-External-Id", Raw::new(format!("<{external_id}>")));
    }
    builder = builder.header("X-Pm-Date", Raw::new(date));

    if !references.is_empty() {
        references.push(' ');
    }
    references.push_str(&format!("<{}>", message.id));
    builder = builder.header("References", Raw::new(references));

    let text = if body.decrypted {
        String::from_utf8(body.data.clone()).map_err(|_| AssembleError::BodyNotText)?
    } else {
        DECRYPT_PLACEHOLDER.to_string()
    };

    builder = if message.mime_type.eq_ignore_ascii_case("text/html") && body.decrypted {
        builder.html_body(text)
    } else {
        builder.text_body(text)
    };

    if !body.decrypted {
        builder = builder.attachment(
            "application/pgp-encrypted",
            "body.pgp",
            body.data.clone(),
        );
    }

    for attachment in attachments {
        if attachment.part.decrypted {
            builder = builder.attachment(
                attachment.mime_type.clone(),
                attachment.name.clone(),
                attachment.part.data.clone(),
            );
        } else {
            builder = builder.attachment(
                "application/pgp-encrypted",
                format!("{}.pgp", attachment.name),
                attachment.part.data.clone(),
            );
        }
    }

    let mut eml = Vec::with_capacity(usize::try_from(message.size).unwrap_or(0));
    builder.write_to(&mut eml)?;

    Ok(eml)
}

/// Headers regenerated by the builder, or injected by us.
fn is_structural_header(name: &str) -> bool {
    const STRUCTURAL: [&str; 8] = [
        "content-type",
        "content-transfer-encoding",
        "mime-version",
        "date",
        "references",
        "x-pm-internal-id",
        "x-pm-external-id",
        "x-pm-date",
    ];
    STRUCTURAL.iter().any(|h| name.eq_ignore_ascii_case(h))
}
