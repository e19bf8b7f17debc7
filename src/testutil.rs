//! Shared unit-test fixtures: a stub crypto implementation and a
//! scripted fake client. Integration tests have their own richer
//! fake under `tests/support`.

use crate::client::{Client, ClientBuilder};
use crate::crypto::{CryptoError, KeyRing, KeyUnlocker, SaltedKeyPass};
use crate::error::{Error, Result};
use crate::types::{
    Address, AddressId, Attachment, AttachmentId, Auth2faReq, AuthInfo, CreateLabelReq,
    HvChallenge, ImportReq, ImportRes, Label, LabelMessageCount, LabelType, LockedKey, Message,
    MessageFilter, MessageId, MessageMetadata, Salts, User,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Frame plaintext the way [`StubKeyRing`] expects ciphertext.
pub fn stub_encrypt(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    out.extend_from_slice(b"ENC[");
    out.extend_from_slice(data);
    out.push(b']');
    out
}

/// Hex-framed variant of [`stub_encrypt`]: the ciphertext is always
/// valid UTF-8, whatever the plaintext bytes.
pub fn stub_encrypt_hex(data: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(data.len() * 2 + 6);
    out.push_str("ENCX[");
    for byte in data {
        write!(out, "{byte:02x}").expect("write to string");
    }
    out.push(']');
    out
}

fn hex_decode(data: &[u8]) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 {
        return None;
    }
    data.chunks(2)
        .map(|pair| {
            let hi = char::from(pair[0]).to_digit(16)?;
            let lo = char::from(pair[1]).to_digit(16)?;
            u8::try_from(hi * 16 + lo).ok()
        })
        .collect()
}

pub struct StubKeyRing {
    closed: bool,
    entities: usize,
}

impl KeyRing for StubKeyRing {
    fn decryption_entity_count(&self) -> usize {
        if self.closed { 0 } else { self.entities }
    }

    fn decrypt(&self, data: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
        if self.closed {
            return Err(CryptoError::Decrypt("keyring is closed".to_string()));
        }
        // Hex framing lets tests produce non-UTF-8 plaintext from a
        // UTF-8 ciphertext string.
        if let Some(inner) = data
            .strip_prefix(b"ENCX[")
            .and_then(|rest| rest.strip_suffix(b"]"))
        {
            return hex_decode(inner)
                .ok_or_else(|| CryptoError::Decrypt("bad hex ciphertext".to_string()));
        }
        data.strip_prefix(b"ENC[")
            .and_then(|rest| rest.strip_suffix(b"]"))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| CryptoError::Decrypt("not a stub ciphertext".to_string()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Stub [`KeyUnlocker`]: the salted key password is
/// `<password>:<salt>`, unlock succeeds whenever key material is
/// present (and, if configured, the password matches), and
/// "ciphertext" is plaintext framed as `ENC[...]`.
#[derive(Default)]
pub struct StubCrypto {
    expected_password: Option<Vec<u8>>,
}

impl StubCrypto {
    #[must_use]
    pub fn new() -> Self {
        Self {
            expected_password: None,
        }
    }

    #[must_use]
    pub fn with_expected_password(password: &[u8]) -> Self {
        Self {
            expected_password: Some(password.to_vec()),
        }
    }
}

impl KeyUnlocker for StubCrypto {
    fn salt_key_password(
        &self,
        password: &[u8],
        salt: &str,
    ) -> std::result::Result<SaltedKeyPass, CryptoError> {
        let mut bytes = password.to_vec();
        bytes.push(b':');
        bytes.extend_from_slice(salt.as_bytes());
        Ok(SaltedKeyPass::new(bytes))
    }

    fn unlock_user_keys(
        &self,
        user: &User,
        pass: &SaltedKeyPass,
    ) -> std::result::Result<Box<dyn KeyRing>, CryptoError> {
        if user.keys.is_empty() {
            return Err(CryptoError::Unlock("user has no keys".to_string()));
        }
        if let Some(expected) = &self.expected_password {
            if !pass.as_bytes().starts_with(expected) {
                return Err(CryptoError::Unlock("wrong password".to_string()));
            }
        }
        Ok(Box::new(StubKeyRing {
            closed: false,
            entities: 1,
        }))
    }

    fn unlock_address_keys(
        &self,
        address: &Address,
        _pass: &SaltedKeyPass,
        _user_keys: &dyn KeyRing,
    ) -> std::result::Result<Box<dyn KeyRing>, CryptoError> {
        if address.keys.is_empty() {
            return Err(CryptoError::Unlock("address has no keys".to_string()));
        }
        Ok(Box::new(StubKeyRing {
            closed: false,
            entities: 1,
        }))
    }
}

pub fn test_user(email: &str) -> User {
    User {
        id: "user-1".to_string(),
        email: email.to_string(),
        keys: vec![LockedKey {
            id: "key-1".to_string(),
            primary: true,
            private_key: b"locked".to_vec(),
        }],
        used_space: 1024,
    }
}

pub fn test_address(id: &str, email: &str) -> Address {
    Address {
        id: AddressId::from(id),
        email: email.to_string(),
        keys: vec![LockedKey {
            id: format!("{id}-key"),
            primary: true,
            private_key: b"locked".to_vec(),
        }],
    }
}

pub fn test_message(id: &str) -> Message {
    Message {
        id: MessageId::from(id),
        address_id: AddressId::from("addr-1"),
        label_ids: vec![],
        external_id: None,
        subject: format!("subject {id}"),
        unread: false,
        flags: 0,
        time: 1_700_000_000,
        size: 64,
        mime_type: "text/plain".to_string(),
        headers: vec![],
        body: String::from_utf8(stub_encrypt(b"hello")).expect("utf8"),
        attachments: vec![],
    }
}

pub fn test_attachment(id: &str, name: &str, size: u64) -> Attachment {
    Attachment {
        id: AttachmentId::from(id),
        name: name.to_string(),
        size,
        mime_type: "application/octet-stream".to_string(),
    }
}

pub fn test_metadata(id: &str, size: u64) -> MessageMetadata {
    MessageMetadata {
        id: MessageId::from(id),
        address_id: AddressId::from("addr-1"),
        label_ids: vec![],
        subject: format!("subject {id}"),
        unread: false,
        flags: 0,
        time: 1_700_000_000,
        size,
        num_attachments: 0,
    }
}

/// Progress reporter that counts calls and deltas.
#[derive(Default)]
pub struct CountingReporter {
    pub total: std::sync::atomic::AtomicU64,
    pub processed: std::sync::atomic::AtomicU64,
    pub progress_calls: std::sync::atomic::AtomicU64,
}

impl crate::reporter::Reporter for CountingReporter {
    fn set_message_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn set_message_processed(&self, processed: u64) {
        self.processed.store(processed, Ordering::SeqCst);
    }

    fn on_progress(&self, delta: usize) {
        self.processed.fetch_add(delta as u64, Ordering::SeqCst);
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted fake client for session, retry, and stage tests. Every
/// response queue is consumed front to back; an empty queue means
/// success with the configured default. Metadata pages are served
/// from `listing` with the inclusive-cursor protocol.
#[derive(Default)]
pub struct FakeClient {
    pub user: Mutex<Option<User>>,
    pub salts: Salts,
    pub auth_2fa_errors: Mutex<VecDeque<Error>>,
    pub get_user_errors: Mutex<VecDeque<Error>>,
    pub get_message_errors: Mutex<VecDeque<Error>>,
    pub auth_deleted: AtomicBool,
    pub get_user_hv: Mutex<Vec<Option<HvChallenge>>>,
    pub get_message_calls: Mutex<Vec<MessageId>>,
    pub listing: Mutex<Vec<MessageMetadata>>,
    pub page_filters: Mutex<Vec<MessageFilter>>,
}

impl FakeClient {
    #[must_use]
    pub fn with_user(user: User) -> Self {
        Self {
            user: Mutex::new(Some(user)),
            ..Self::default()
        }
    }

    pub fn push_get_user_error(&self, err: Error) {
        self.user_queue().push_back(err);
    }

    pub fn push_get_message_error(&self, err: Error) {
        self.get_message_errors
            .lock()
            .expect("lock")
            .push_back(err);
    }

    fn user_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Error>> {
        self.get_user_errors.lock().expect("lock")
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn auth_2fa(&self, _cancel: &CancellationToken, _req: &Auth2faReq) -> Result<()> {
        match self.auth_2fa_errors.lock().expect("lock").pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn auth_delete(&self, _cancel: &CancellationToken) -> Result<()> {
        self.auth_deleted.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_user(&self, _cancel: &CancellationToken, hv: Option<&HvChallenge>) -> Result<User> {
        self.get_user_hv.lock().expect("lock").push(hv.cloned());
        if let Some(err) = self.user_queue().pop_front() {
            return Err(err);
        }
        Ok(self
            .user
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| test_user("user@example.com")))
    }

    async fn get_salts(&self, _cancel: &CancellationToken) -> Result<Salts> {
        Ok(self.salts.clone())
    }

    async fn get_labels(
        &self,
        _cancel: &CancellationToken,
        _types: &[LabelType],
    ) -> Result<Vec<Label>> {
        Ok(vec![])
    }

    async fn create_label(
        &self,
        _cancel: &CancellationToken,
        _req: &CreateLabelReq,
    ) -> Result<Label> {
        unimplemented!("not scripted")
    }

    async fn get_addresses(&self, _cancel: &CancellationToken) -> Result<Vec<Address>> {
        Ok(vec![])
    }

    async fn get_grouped_message_count(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<LabelMessageCount>> {
        Ok(vec![])
    }

    async fn get_message(&self, _cancel: &CancellationToken, id: &MessageId) -> Result<Message> {
        self.get_message_calls.lock().expect("lock").push(id.clone());
        match self.get_message_errors.lock().expect("lock").pop_front() {
            Some(err) => Err(err),
            None => Ok(test_message(id.as_str())),
        }
    }

    async fn get_message_metadata_page(
        &self,
        _cancel: &CancellationToken,
        _page: usize,
        page_size: usize,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageMetadata>> {
        self.page_filters.lock().expect("lock").push(filter.clone());

        let listing = self.listing.lock().expect("lock");
        let start = match &filter.end_id {
            None => 0,
            // Inclusive cursor: the page starts at the element the
            // cursor names.
            Some(id) => listing
                .iter()
                .position(|m| &m.id == id)
                .map_or(listing.len(), |pos| pos),
        };
        let end = (start + page_size).min(listing.len());

        Ok(listing[start..end].to_vec())
    }

    async fn get_attachment_into(
        &self,
        _cancel: &CancellationToken,
        _id: &AttachmentId,
        _buf: &mut Vec<u8>,
    ) -> Result<()> {
        Ok(())
    }

    async fn import_messages(
        &self,
        _cancel: &CancellationToken,
        _keys: &dyn KeyRing,
        _workers: usize,
        _buffer_size: usize,
        _reqs: &[ImportReq],
    ) -> Result<Vec<ImportRes>> {
        unimplemented!("not scripted")
    }
}

/// Scripted fake client builder: each `new_client` call pops the next
/// queued outcome.
pub struct FakeBuilder {
    pub results: Mutex<VecDeque<Result<(FakeClient, AuthInfo)>>>,
    pub hv_seen: Mutex<Vec<Option<HvChallenge>>>,
}

impl FakeBuilder {
    #[must_use]
    pub fn new(results: Vec<Result<(FakeClient, AuthInfo)>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            hv_seen: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl ClientBuilder for FakeBuilder {
    type Client = FakeClient;

    async fn new_client(
        &self,
        _cancel: &CancellationToken,
        _username: &str,
        _password: &[u8],
        hv: Option<&HvChallenge>,
    ) -> Result<(Self::Client, AuthInfo)> {
        self.hv_seen.lock().expect("lock").push(hv.cloned());
        self.results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| {
                Ok((
                    FakeClient::with_user(test_user("user@example.com")),
                    AuthInfo::default(),
                ))
            })
    }
}

pub fn hv_challenge() -> HvChallenge {
    HvChallenge {
        methods: vec!["captcha".to_string()],
        token: "hv-token".to_string(),
        url: "https://verify.example.com/challenge?token=hv-token".to_string(),
    }
}
