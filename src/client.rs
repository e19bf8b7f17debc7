//! Remote service capability contract
//!
//! The wire protocol lives in the embedding host. This crate talks to
//! the service exclusively through the [`Client`] trait; every call
//! takes a cancellation token and must abort promptly (with
//! [`Error::Cancelled`]) once it fires. Errors carry an HTTP status
//! where applicable so the auto-retry classifier can act on them.
//!
//! [`Error::Cancelled`]: crate::Error::Cancelled

use crate::crypto::KeyRing;
use crate::error::Result;
use crate::types::{
    Address, Auth2faReq, AuthInfo, CreateLabelReq, HvChallenge, ImportReq, ImportRes, Label,
    LabelMessageCount, LabelType, Message, MessageFilter, MessageId, MessageMetadata, Salts, User,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Client: Send + Sync {
    /// Submit the second-factor TOTP code for a fresh authentication.
    async fn auth_2fa(&self, cancel: &CancellationToken, req: &Auth2faReq) -> Result<()>;

    /// Invalidate the current authentication on the remote side.
    async fn auth_delete(&self, cancel: &CancellationToken) -> Result<()>;

    /// Fetch the user record. A solved human-verification challenge
    /// may be attached when repeating a challenged call.
    async fn get_user(&self, cancel: &CancellationToken, hv: Option<&HvChallenge>) -> Result<User>;

    async fn get_salts(&self, cancel: &CancellationToken) -> Result<Salts>;

    async fn get_labels(
        &self,
        cancel: &CancellationToken,
        types: &[LabelType],
    ) -> Result<Vec<Label>>;

    async fn create_label(&self, cancel: &CancellationToken, req: &CreateLabelReq)
    -> Result<Label>;

    async fn get_addresses(&self, cancel: &CancellationToken) -> Result<Vec<Address>>;

    async fn get_grouped_message_count(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<LabelMessageCount>>;

    /// Fetch a full message, including its attachment descriptors
    /// (attachment bytes are fetched separately).
    async fn get_message(&self, cancel: &CancellationToken, id: &MessageId) -> Result<Message>;

    /// One page of message metadata. `filter.end_id` is an inclusive
    /// cursor: the element it names is returned again as the first
    /// entry of the page.
    async fn get_message_metadata_page(
        &self,
        cancel: &CancellationToken,
        page: usize,
        page_size: usize,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageMetadata>>;

    /// Download one attachment into the supplied buffer.
    async fn get_attachment_into(
        &self,
        cancel: &CancellationToken,
        id: &crate::types::AttachmentId,
        buf: &mut Vec<u8>,
    ) -> Result<()>;

    /// Import a batch of messages, encrypting them with the given
    /// address keyring. Returns one result per request.
    async fn import_messages(
        &self,
        cancel: &CancellationToken,
        keys: &dyn KeyRing,
        workers: usize,
        buffer_size: usize,
        reqs: &[ImportReq],
    ) -> Result<Vec<ImportRes>>;
}

/// Produces an authenticated [`Client`] from credentials.
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    type Client: Client + 'static;

    /// Authenticate and build a client. A previously issued
    /// human-verification challenge, once solved, is passed back
    /// through `hv`.
    async fn new_client(
        &self,
        cancel: &CancellationToken,
        username: &str,
        password: &[u8],
        hv: Option<&HvChallenge>,
    ) -> Result<(Self::Client, AuthInfo)>;
}
