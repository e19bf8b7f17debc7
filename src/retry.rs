//! Automatic retry of transient remote failures
//!
//! Every remote operation goes through [`AutoRetryClient`], which
//! classifies failures and repeats transient ones after an
//! exponential backoff wait. There is no retry budget: the caller's
//! cancellation token is the only terminator.

use crate::client::Client;
use crate::crypto::KeyRing;
use crate::error::{Error, Result};
use crate::types::{
    Address, AttachmentId, Auth2faReq, CreateLabelReq, HvChallenge, ImportReq, ImportRes, Label,
    LabelMessageCount, LabelType, Message, MessageFilter, MessageId, MessageMetadata, Salts, User,
};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const EXP_WAIT_TIMES: [Duration; 6] = [
    Duration::from_secs(20),
    Duration::from_secs(40),
    Duration::from_secs(80),
    Duration::from_secs(160),
    Duration::from_secs(300),
    Duration::from_secs(600),
];

const MAX_JITTER_SECS: u64 = 10;

/// One strategy instance covers the lifetime of one request and must
/// not be shared between concurrent requests.
#[async_trait]
pub trait RetryStrategy: Send {
    /// Wait before the next attempt. Returns immediately once the
    /// token is cancelled.
    async fn handle_retry(&mut self, cancel: &CancellationToken);
}

/// Builds a fresh [`RetryStrategy`] per request so backoff indices do
/// not leak between concurrent calls.
pub trait RetryStrategyBuilder: Send + Sync {
    type Strategy: RetryStrategy;

    fn new_strategy(&self) -> Self::Strategy;
}

pub struct SleepRetryStrategy {
    index: usize,
}

impl SleepRetryStrategy {
    fn next_wait_time(&mut self) -> Duration {
        let last = EXP_WAIT_TIMES.len() - 1;
        if self.index > last {
            self.index = last;
        }

        let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..MAX_JITTER_SECS));
        let wait = EXP_WAIT_TIMES[self.index] + jitter;

        self.index += 1;

        wait
    }
}

#[async_trait]
impl RetryStrategy for SleepRetryStrategy {
    async fn handle_retry(&mut self, cancel: &CancellationToken) {
        let wait = self.next_wait_time();
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(wait) => {}
        }
    }
}

#[derive(Default, Clone, Copy)]
pub struct SleepRetryStrategyBuilder;

impl RetryStrategyBuilder for SleepRetryStrategyBuilder {
    type Strategy = SleepRetryStrategy;

    fn new_strategy(&self) -> Self::Strategy {
        SleepRetryStrategy { index: 0 }
    }
}

/// Wraps a [`Client`] and transparently retries transient failures.
///
/// Each call runs under a `select!` against the cancellation token,
/// so an in-flight request aborts with [`Error::Cancelled`] even if
/// the inner client ignores the token. Cancellation is never retried.
pub struct AutoRetryClient<C, B = SleepRetryStrategyBuilder> {
    inner: C,
    strategies: B,
}

impl<C: Client> AutoRetryClient<C> {
    pub const fn new(inner: C) -> Self {
        Self {
            inner,
            strategies: SleepRetryStrategyBuilder,
        }
    }
}

impl<C: Client, B: RetryStrategyBuilder> AutoRetryClient<C, B> {
    pub const fn with_strategies(inner: C, strategies: B) -> Self {
        Self { inner, strategies }
    }
}

macro_rules! with_retry {
    ($self:ident, $cancel:ident, $call:expr) => {{
        let mut strategy = $self.strategies.new_strategy();
        loop {
            let result = tokio::select! {
                () = $cancel.cancelled() => Err(Error::Cancelled),
                result = $call => result,
            };
            match result {
                Err(Error::Cancelled) => break Err(Error::Cancelled),
                Err(err) if err.is_transient() => {
                    debug!(error = %err, "retrying transient error");
                    strategy.handle_retry($cancel).await;
                    if $cancel.is_cancelled() {
                        break Err(Error::Cancelled);
                    }
                }
                result => break result,
            }
        }
    }};
}

#[async_trait]
impl<C: Client, B: RetryStrategyBuilder> Client for AutoRetryClient<C, B> {
    async fn auth_2fa(&self, cancel: &CancellationToken, req: &Auth2faReq) -> Result<()> {
        with_retry!(self, cancel, self.inner.auth_2fa(cancel, req))
    }

    async fn auth_delete(&self, cancel: &CancellationToken) -> Result<()> {
        with_retry!(self, cancel, self.inner.auth_delete(cancel))
    }

    async fn get_user(&self, cancel: &CancellationToken, hv: Option<&HvChallenge>) -> Result<User> {
        with_retry!(self, cancel, self.inner.get_user(cancel, hv))
    }

    async fn get_salts(&self, cancel: &CancellationToken) -> Result<Salts> {
        with_retry!(self, cancel, self.inner.get_salts(cancel))
    }

    async fn get_labels(
        &self,
        cancel: &CancellationToken,
        types: &[LabelType],
    ) -> Result<Vec<Label>> {
        with_retry!(self, cancel, self.inner.get_labels(cancel, types))
    }

    async fn create_label(
        &self,
        cancel: &CancellationToken,
        req: &CreateLabelReq,
    ) -> Result<Label> {
        with_retry!(self, cancel, self.inner.create_label(cancel, req))
    }

    async fn get_addresses(&self, cancel: &CancellationToken) -> Result<Vec<Address>> {
        with_retry!(self, cancel, self.inner.get_addresses(cancel))
    }

    async fn get_grouped_message_count(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<LabelMessageCount>> {
        with_retry!(self, cancel, self.inner.get_grouped_message_count(cancel))
    }

    async fn get_message(&self, cancel: &CancellationToken, id: &MessageId) -> Result<Message> {
        with_retry!(self, cancel, self.inner.get_message(cancel, id))
    }

    async fn get_message_metadata_page(
        &self,
        cancel: &CancellationToken,
        page: usize,
        page_size: usize,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageMetadata>> {
        with_retry!(
            self,
            cancel,
            self.inner
                .get_message_metadata_page(cancel, page, page_size, filter)
        )
    }

    async fn get_attachment_into(
        &self,
        cancel: &CancellationToken,
        id: &AttachmentId,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        with_retry!(self, cancel, async {
            // A failed attempt may have written partial data.
            buf.clear();
            self.inner.get_attachment_into(cancel, id, buf).await
        })
    }

    async fn import_messages(
        &self,
        cancel: &CancellationToken,
        keys: &dyn KeyRing,
        workers: usize,
        buffer_size: usize,
        reqs: &[ImportReq],
    ) -> Result<Vec<ImportRes>> {
        with_retry!(
            self,
            cancel,
            self.inner
                .import_messages(cancel, keys, workers, buffer_size, reqs)
        )
    }
}
