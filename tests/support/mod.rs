//! Fake remote service and stub crypto for integration testing
//!
//! The fake client serves a programmable in-memory account: metadata
//! pages follow the inclusive-cursor protocol, message and attachment
//! bytes come framed by the stub cipher, and imports are captured for
//! inspection. Error injection drives the failure-path tests.
//!
//! ## Module layout
//!
//! - `client` -- fake `Client`/`ClientBuilder` over shared state
//! - `crypto` -- stub `KeyUnlocker` with `ENC[...]` framing
//! - `archive` -- helpers that lay out backup directories on disk

pub mod archive;
pub mod client;
pub mod crypto;

#[allow(unused_imports)]
pub use archive::{write_archived_message, write_labels_file};
#[allow(unused_imports)]
pub use client::{FakeBuilder, FakeState, SharedState};
#[allow(unused_imports)]
pub use crypto::{TestCrypto, encrypt};

use mailvault::Session;
use mailvault::types::{
    Address, AddressId, Attachment, AttachmentId, KeySalt, LockedKey, Message, MessageId, Salts,
    User,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const TEST_EMAIL: &str = "user@example.com";

/// Minimal consistent account: one user key, one address, salts
/// matching the stub crypto.
pub fn base_state() -> FakeState {
    let key = LockedKey {
        id: "key-1".to_string(),
        primary: true,
        private_key: b"locked-key-material".to_vec(),
    };

    use mailvault::types::{Label, LabelId, LabelType};

    let system_label = |id: &str, name: &str| Label {
        id: LabelId::from(id),
        name: name.to_string(),
        color: String::new(),
        label_type: LabelType::System,
        parent_id: None,
    };

    FakeState {
        user: User {
            id: "user-1".to_string(),
            email: TEST_EMAIL.to_string(),
            keys: vec![key.clone()],
            used_space: 10_000,
        },
        salts: Salts(vec![KeySalt {
            id: "key-1".to_string(),
            key_salt: "c2FsdA==".to_string(),
        }]),
        addresses: vec![Address {
            id: AddressId::from("addr-1"),
            email: TEST_EMAIL.to_string(),
            keys: vec![key],
        }],
        labels: vec![
            system_label("0", "Inbox"),
            system_label("3", "Trash"),
            system_label("5", "All Mail"),
            system_label("6", "Archive"),
            system_label("7", "Sent"),
            system_label("8", "Drafts"),
        ],
        ..FakeState::default()
    }
}

/// Add a message (body and attachments framed by the stub cipher) to
/// the fake account.
pub fn seed_message(
    state: &mut FakeState,
    id: &str,
    time: i64,
    subject: &str,
    body: &str,
    label_ids: &[&str],
    attachments: &[(&str, &str, &[u8])],
) {
    let descriptors: Vec<Attachment> = attachments
        .iter()
        .map(|(att_id, name, data)| {
            state
                .attachment_data
                .insert(AttachmentId::from(*att_id), encrypt(data));
            Attachment {
                id: AttachmentId::from(*att_id),
                name: (*name).to_string(),
                size: data.len() as u64,
                mime_type: "application/octet-stream".to_string(),
            }
        })
        .collect();

    let body_cipher = String::from_utf8(encrypt(body.as_bytes())).expect("ascii framing");

    state.messages.push(Message {
        id: MessageId::from(id),
        address_id: AddressId::from("addr-1"),
        label_ids: label_ids.iter().map(|l| (*l).into()).collect(),
        external_id: None,
        subject: subject.to_string(),
        unread: false,
        flags: 0,
        time,
        size: (body.len() + 64) as u64,
        mime_type: "text/plain".to_string(),
        headers: vec![
            mailvault::types::Header {
                name: "Subject".to_string(),
                value: subject.to_string(),
            },
            mailvault::types::Header {
                name: "From".to_string(),
                value: format!("Sender <{TEST_EMAIL}>"),
            },
        ],
        body: body_cipher,
        attachments: descriptors,
    });
}

/// Log a session in against the fake account.
pub async fn logged_in_session(state: SharedState) -> Session<FakeBuilder> {
    let cancel = CancellationToken::new();
    let mut session = Session::new(FakeBuilder::new(state), Arc::new(TestCrypto));
    session
        .login(&cancel, TEST_EMAIL, b"password")
        .await
        .expect("login");
    assert!(matches!(
        session.login_state(),
        mailvault::LoginState::LoggedIn
    ));
    session
}
