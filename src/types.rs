//! Data model shared between the remote client contract and the
//! on-disk archive format.
//!
//! The JSON field names (`ID`, `LabelIDs`, `AddressID`, ...) are part
//! of the archive format and must not change between releases; the
//! files additionally carry a format version (see [`crate::fileio`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the `<id>.metadata.json` payload.
pub const MESSAGE_METADATA_VERSION: u32 = 1;

/// Version of the `labels.json` payload.
pub const LABEL_FILE_VERSION: u32 = 1;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

id_type!(
    /// Identifier of a message on the remote service.
    MessageId
);
id_type!(
    /// Identifier of a label or folder.
    LabelId
);
id_type!(
    /// Identifier of one of the user's email addresses.
    AddressId
);
id_type!(
    /// Identifier of a message attachment.
    AttachmentId
);

// Built-in label ids. The remote service identifies system labels by
// small integer ids; user labels and folders get opaque string ids.
pub const INBOX_LABEL: &str = "0";
pub const ALL_DRAFTS_LABEL: &str = "1";
pub const ALL_SENT_LABEL: &str = "2";
pub const TRASH_LABEL: &str = "3";
pub const SPAM_LABEL: &str = "4";
pub const ALL_MAIL_LABEL: &str = "5";
pub const ARCHIVE_LABEL: &str = "6";
pub const SENT_LABEL: &str = "7";
pub const DRAFTS_LABEL: &str = "8";
pub const OUTBOX_LABEL: &str = "9";
pub const STARRED_LABEL: &str = "10";

impl LabelId {
    /// Whether this is a built-in label (Inbox, Trash, ...).
    ///
    /// System labels carry integer ids; everything else is base64-ish
    /// and never parses as one.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.parse::<i64>().is_ok()
    }
}

/// A private key as stored by the remote service: locked with the
/// user's (salted) mailbox password. Unlocking happens behind the
/// [`crate::crypto::KeyUnlocker`] capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockedKey {
    #[serde(rename = "ID")]
    pub id: String,
    pub primary: bool,
    pub private_key: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    #[serde(rename = "ID")]
    pub id: String,
    pub email: String,
    pub keys: Vec<LockedKey>,
    pub used_space: u64,
}

impl User {
    /// The key the salted key password is derived against.
    #[must_use]
    pub fn primary_key(&self) -> Option<&LockedKey> {
        self.keys
            .iter()
            .find(|k| k.primary)
            .or_else(|| self.keys.first())
    }
}

/// Per-key salt used to derive the salted key password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySalt {
    #[serde(rename = "ID")]
    pub id: String,
    pub key_salt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salts(pub Vec<KeySalt>);

impl Salts {
    #[must_use]
    pub fn for_key(&self, key_id: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|s| s.id == key_id)
            .map(|s| s.key_salt.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(rename = "ID")]
    pub id: AddressId,
    pub email: String,
    pub keys: Vec<LockedKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelType {
    System,
    Folder,
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Label {
    #[serde(rename = "ID")]
    pub id: LabelId,
    pub name: String,
    pub color: String,
    #[serde(rename = "Type")]
    pub label_type: LabelType,
    #[serde(rename = "ParentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<LabelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateLabelReq {
    pub name: String,
    pub color: String,
    #[serde(rename = "Type")]
    pub label_type: LabelType,
    #[serde(rename = "ParentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<LabelId>,
}

/// One header line of a message, as reported by the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    #[serde(rename = "ID")]
    pub id: AttachmentId,
    pub name: String,
    pub size: u64,
    #[serde(rename = "MIMEType")]
    pub mime_type: String,
}

/// Message listing entry returned by the metadata pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageMetadata {
    #[serde(rename = "ID")]
    pub id: MessageId,
    #[serde(rename = "AddressID")]
    pub address_id: AddressId,
    #[serde(rename = "LabelIDs")]
    pub label_ids: Vec<LabelId>,
    pub subject: String,
    pub unread: bool,
    pub flags: i64,
    pub time: i64,
    pub size: u64,
    pub num_attachments: u32,
}

/// Full message as returned by `get_message`. The body is still
/// encrypted; attachment bytes are fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(rename = "ID")]
    pub id: MessageId,
    #[serde(rename = "AddressID")]
    pub address_id: AddressId,
    #[serde(rename = "LabelIDs")]
    pub label_ids: Vec<LabelId>,
    #[serde(rename = "ExternalID", default)]
    pub external_id: Option<String>,
    pub subject: String,
    pub unread: bool,
    pub flags: i64,
    pub time: i64,
    pub size: u64,
    #[serde(rename = "MIMEType")]
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// How a message was laid out on disk, recorded in its metadata file
/// so readers know what to expect next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterType {
    /// A single `<id>.eml` with the decrypted, assembled message.
    DecryptedAndBuilt,
    /// A `<id>/` directory with the decrypted parts kept separate.
    FailedToAssemble,
    /// A `<id>/` directory with the original encrypted parts.
    NoAddressKey,
}

/// Payload of the `<id>.metadata.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchivedMetadata {
    #[serde(rename = "ID")]
    pub id: MessageId,
    #[serde(rename = "AddressID")]
    pub address_id: AddressId,
    #[serde(rename = "LabelIDs")]
    pub label_ids: Vec<LabelId>,
    pub subject: String,
    pub unread: bool,
    pub flags: i64,
    pub time: i64,
    pub size: u64,
    #[serde(rename = "MIMEType")]
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub attachments: Vec<Attachment>,
    pub writer_type: WriterType,
}

impl ArchivedMetadata {
    #[must_use]
    pub fn new(message: &Message, writer_type: WriterType) -> Self {
        Self {
            id: message.id.clone(),
            address_id: message.address_id.clone(),
            label_ids: message.label_ids.clone(),
            subject: message.subject.clone(),
            unread: message.unread,
            flags: message.flags,
            time: message.time,
            size: message.size,
            mime_type: message.mime_type.clone(),
            headers: message.headers.clone(),
            attachments: message.attachments.clone(),
            writer_type,
        }
    }
}

/// Cursor filter for the metadata pages.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Paging resumes from this id (inclusive on the remote side).
    pub end_id: Option<MessageId>,
    /// Descending time order.
    pub desc: bool,
}

/// Message count for one label, as returned by the grouped count
/// endpoint. The All Mail entry is the total over the whole mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LabelMessageCount {
    #[serde(rename = "LabelID")]
    pub label_id: LabelId,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct Auth2faReq {
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasswordMode {
    #[default]
    One,
    Two,
}

/// Outcome of a fresh authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthInfo {
    pub password_mode: PasswordMode,
    pub totp_enabled: bool,
}

/// A human-verification challenge issued by the remote service.
///
/// The challenge must be solved out-of-band (usually in a browser at
/// `url`); the token is then presented back with the repeated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HvChallenge {
    pub methods: Vec<String>,
    pub token: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ImportMetadata {
    pub address_id: AddressId,
    pub label_ids: Vec<LabelId>,
    pub unread: bool,
    pub flags: i64,
}

#[derive(Debug, Clone)]
pub struct ImportReq {
    pub metadata: ImportMetadata,
    pub message: Vec<u8>,
}

/// Per-message outcome of an import call.
#[derive(Debug, Clone)]
pub struct ImportRes {
    pub message_id: Option<MessageId>,
    pub code: i64,
    pub error: Option<String>,
}

/// Result code of a successfully imported message.
pub const IMPORT_OK_CODE: i64 = 1000;
