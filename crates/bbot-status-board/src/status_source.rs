//! Collaborator boundary for the status board and the timeout/retry/cancellation
//! wrapper every call goes through.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::status_error::SourceError;
use crate::status_types::{ChannelId, Message, ReactedItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    PublicChannel,
    PrivateChannel,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublicChannel => "public_channel",
            Self::PrivateChannel => "private_channel",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelListRequest {
    pub page_size: usize,
    pub cursor: Option<String>,
    pub channel_kinds: Vec<ChannelKind>,
    pub exclude_archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub is_member: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub channel_id: ChannelId,
    pub oldest_epoch_seconds: u64,
    pub latest_epoch_seconds: Option<u64>,
    pub inclusive: bool,
    pub page_size: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliesRequest {
    pub channel_id: ChannelId,
    pub thread_root_token: String,
    pub oldest_epoch_seconds: u64,
    pub page_size: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionListRequest {
    pub user_id: String,
    pub oldest_epoch_seconds: u64,
    pub page_size: usize,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One page of a cursor-paginated listing; `next_cursor` is `None` on the last page.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

#[async_trait]
/// Read-only view of the chat workspace the status board aggregates over.
pub trait ActivitySource: Send + Sync {
    async fn list_channels(
        &self,
        request: ChannelListRequest,
    ) -> Result<Page<ChannelSummary>, SourceError>;

    async fn channel_history(&self, request: HistoryRequest) -> Result<Page<Message>, SourceError>;

    /// Replies of one thread. Collaborators may include the root message.
    async fn thread_replies(&self, request: RepliesRequest) -> Result<Page<Message>, SourceError>;

    async fn reactions_by_user(
        &self,
        request: ReactionListRequest,
    ) -> Result<Page<ReactedItem>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub call_timeout: Duration,
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            max_attempts: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallFailure {
    Cancelled,
    Source(SourceError),
}

#[derive(Clone)]
pub(crate) struct SourceCaller {
    source: Arc<dyn ActivitySource>,
    policy: CallPolicy,
}

impl SourceCaller {
    pub(crate) fn new(source: Arc<dyn ActivitySource>, policy: CallPolicy) -> Self {
        Self {
            source,
            policy: CallPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
        }
    }

    pub(crate) fn source(&self) -> &dyn ActivitySource {
        self.source.as_ref()
    }

    /// Runs `request` under the call timeout, retrying transient failures and
    /// racing every attempt against cancellation so in-flight calls are dropped.
    pub(crate) async fn call<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &mut watch::Receiver<bool>,
        mut request: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let outcome = tokio::select! {
                biased;
                _ = cancellation_requested(cancel) => return Err(CallFailure::Cancelled),
                outcome = tokio::time::timeout(self.policy.call_timeout, request()) => outcome,
            };
            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => SourceError::Timeout {
                    operation,
                    timeout_ms: self.policy.call_timeout.as_millis() as u64,
                },
            };

            if attempt < self.policy.max_attempts && error.is_transient() {
                tracing::debug!(operation, attempt, %error, "retrying status board call");
                tokio::select! {
                    biased;
                    _ = cancellation_requested(cancel) => return Err(CallFailure::Cancelled),
                    _ = tokio::time::sleep(self.policy.retry_delay) => {}
                }
                continue;
            }
            return Err(CallFailure::Source(error));
        }
    }
}

/// Resolves once the flag is raised. A dropped sender never cancels.
pub(crate) async fn cancellation_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
