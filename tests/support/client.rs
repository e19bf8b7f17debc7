//! Fake remote client over shared programmable state.

use async_trait::async_trait;
use mailvault::crypto::KeyRing;
use mailvault::types::{
    Address, AttachmentId, Auth2faReq, AuthInfo, CreateLabelReq, HvChallenge, ImportReq,
    ImportRes, Label, LabelId, LabelMessageCount, LabelType, Message, MessageFilter, MessageId,
    MessageMetadata, Salts, User,
};
use mailvault::{Client, ClientBuilder, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub type SharedState = Arc<Mutex<FakeState>>;

/// Marker in a request literal that makes its import fail with a
/// non-1000 result code.
pub const FAIL_IMPORT_MARKER: &[u8] = b"FAIL-IMPORT";

#[derive(Default)]
pub struct FakeState {
    pub user: User,
    pub salts: Salts,
    pub addresses: Vec<Address>,
    /// Remote labels, including system entries.
    pub labels: Vec<Label>,
    pub messages: Vec<Message>,
    pub attachment_data: HashMap<AttachmentId, Vec<u8>>,
    /// Status code injected per message id on `get_message`.
    pub message_errors: HashMap<MessageId, u16>,
    /// When set, the next multi-message import fails wholesale.
    pub fail_next_batch_import: bool,
    /// When set, the grouped counts omit the All Mail entry.
    pub omit_all_mail_count: bool,
    pub created_labels: Vec<Label>,
    pub imports: Vec<ImportReq>,
    pub import_batch_sizes: Vec<usize>,
    pub get_message_calls: usize,
    pub next_label_id: usize,
    pub next_import_id: usize,
}

impl FakeState {
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Messages in the listing order served to metadata pages:
    /// descending time.
    fn listing(&self) -> Vec<MessageMetadata> {
        let mut messages: Vec<&Message> = self.messages.iter().collect();
        messages.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| a.id.cmp(&b.id)));
        messages
            .into_iter()
            .map(|m| MessageMetadata {
                id: m.id.clone(),
                address_id: m.address_id.clone(),
                label_ids: m.label_ids.clone(),
                subject: m.subject.clone(),
                unread: m.unread,
                flags: m.flags,
                time: m.time,
                size: m.size,
                num_attachments: m.attachments.len() as u32,
            })
            .collect()
    }
}

pub struct FakeClient {
    state: SharedState,
}

pub struct FakeBuilder {
    state: SharedState,
}

impl FakeBuilder {
    pub fn new(state: SharedState) -> Self {
        Self { state }
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
        _hv: Option<&HvChallenge>,
    ) -> Result<(Self::Client, AuthInfo)> {
        Ok((
            FakeClient {
                state: Arc::clone(&self.state),
            },
            AuthInfo::default(),
        ))
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn auth_2fa(&self, _cancel: &CancellationToken, _req: &Auth2faReq) -> Result<()> {
        Ok(())
    }

    async fn auth_delete(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn get_user(
        &self,
        _cancel: &CancellationToken,
        _hv: Option<&HvChallenge>,
    ) -> Result<User> {
        Ok(self.state.lock().unwrap().user.clone())
    }

    async fn get_salts(&self, _cancel: &CancellationToken) -> Result<Salts> {
        Ok(self.state.lock().unwrap().salts.clone())
    }

    async fn get_labels(
        &self,
        _cancel: &CancellationToken,
        types: &[LabelType],
    ) -> Result<Vec<Label>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|label| types.contains(&label.label_type))
            .cloned()
            .collect())
    }

    async fn create_label(
        &self,
        _cancel: &CancellationToken,
        req: &CreateLabelReq,
    ) -> Result<Label> {
        let mut state = self.state.lock().unwrap();
        state.next_label_id += 1;
        let label = Label {
            id: LabelId::from(format!("remote-{}", state.next_label_id)),
            name: req.name.clone(),
            color: req.color.clone(),
            label_type: req.label_type,
            parent_id: req.parent_id.clone(),
        };
        state.labels.push(label.clone());
        state.created_labels.push(label.clone());
        Ok(label)
    }

    async fn get_addresses(&self, _cancel: &CancellationToken) -> Result<Vec<Address>> {
        Ok(self.state.lock().unwrap().addresses.clone())
    }

    async fn get_grouped_message_count(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<LabelMessageCount>> {
        let state = self.state.lock().unwrap();
        if state.omit_all_mail_count {
            return Ok(vec![LabelMessageCount {
                label_id: LabelId::from("0"),
                total: state.messages.len() as u64,
            }]);
        }
        Ok(vec![
            LabelMessageCount {
                label_id: LabelId::from("0"),
                total: 0,
            },
            LabelMessageCount {
                label_id: LabelId::from("5"),
                total: state.messages.len() as u64,
            },
        ])
    }

    async fn get_message(&self, _cancel: &CancellationToken, id: &MessageId) -> Result<Message> {
        let mut state = self.state.lock().unwrap();
        state.get_message_calls += 1;

        if let Some(status) = state.message_errors.get(id) {
            return Err(Error::Api {
                status: *status,
                code: 0,
                message: "injected error".to_string(),
            });
        }

        state
            .messages
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| Error::Api {
                status: 422,
                code: 0,
                message: "no such message".to_string(),
            })
    }

    async fn get_message_metadata_page(
        &self,
        _cancel: &CancellationToken,
        _page: usize,
        page_size: usize,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageMetadata>> {
        let listing = self.state.lock().unwrap().listing();
        let start = match &filter.end_id {
            None => 0,
            // Inclusive cursor.
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
        id: &AttachmentId,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        let state = self.state.lock().unwrap();
        let data = state
            .attachment_data
            .get(id)
            .ok_or_else(|| Error::Api {
                status: 404,
                code: 0,
                message: "no such attachment".to_string(),
            })?;
        buf.extend_from_slice(data);
        Ok(())
    }

    async fn import_messages(
        &self,
        _cancel: &CancellationToken,
        _keys: &dyn KeyRing,
        _workers: usize,
        _buffer_size: usize,
        reqs: &[ImportReq],
    ) -> Result<Vec<ImportRes>> {
        let mut state = self.state.lock().unwrap();
        state.import_batch_sizes.push(reqs.len());

        if state.fail_next_batch_import && reqs.len() > 1 {
            state.fail_next_batch_import = false;
            return Err(Error::Api {
                status: 400,
                code: 0,
                message: "batch rejected".to_string(),
            });
        }

        let mut results = Vec::with_capacity(reqs.len());
        for req in reqs {
            state.imports.push(req.clone());
            if req
                .message
                .windows(FAIL_IMPORT_MARKER.len())
                .any(|w| w == FAIL_IMPORT_MARKER)
            {
                results.push(ImportRes {
                    message_id: None,
                    code: 2001,
                    error: Some("rejected".to_string()),
                });
            } else {
                state.next_import_id += 1;
                results.push(ImportRes {
                    message_id: Some(MessageId::from(format!(
                        "imported-{}",
                        state.next_import_id
                    ))),
                    code: 1000,
                    error: None,
                });
            }
        }

        Ok(results)
    }
}
