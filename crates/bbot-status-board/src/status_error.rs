use std::fmt;

use thiserror::Error;

use crate::status_types::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Failure of a single collaborator call.
pub enum SourceError {
    #[error("{operation} failed with a transient error: {message}")]
    TransientIo {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("{operation} was rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
}

impl SourceError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::TransientIo {
            operation,
            message: message.into(),
        }
    }

    pub fn rejected(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            message: message.into(),
        }
    }

    /// Transient failures earn one more attempt before becoming a soft failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. } | Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Errors that escape a status board run.
pub enum StatusBoardError {
    #[error("invalid status board request: {0}")]
    FatalConfiguration(String),
    #[error("status board run was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    ChannelListing,
    ChannelHistory {
        channel_id: ChannelId,
    },
    ThreadReplies {
        channel_id: ChannelId,
        thread_root_token: String,
    },
    ReactionEvents,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelListing => f.write_str("channel listing"),
            Self::ChannelHistory { channel_id } => write!(f, "history of {channel_id}"),
            Self::ThreadReplies {
                channel_id,
                thread_root_token,
            } => write!(f, "thread {thread_root_token} in {channel_id}"),
            Self::ReactionEvents => f.write_str("reaction events"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A scope that could not be read after retry and was left out of the report.
pub struct PartialScopeFailure {
    pub scope: ScopeKind,
    pub error: SourceError,
}
