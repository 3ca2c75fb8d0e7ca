//! Slack Web API client used by the bot runtime and as the status board's activity source.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bbot_status_board::{
    token_epoch_seconds, ActivitySource, ChannelId, ChannelListRequest, ChannelSummary,
    HistoryRequest, Message, Page, ReactedItem, ReactionListRequest, ReactionTally,
    RepliesRequest, SourceError,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::slack_helpers::{
    is_retryable_slack_status, is_retryable_transport_error, is_transient_slack_error_code,
    parse_retry_after, retry_delay, truncate_for_error,
};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error)]
pub enum SlackApiError {
    #[error("slack api {operation} request failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api {operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("slack api {operation} returned error `{code}`")]
    Api { operation: &'static str, code: String },
    #[error("failed to decode slack {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("slack api {operation} response is missing `{field}`")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
}

impl SlackApiError {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Transport { operation, .. }
            | Self::Status { operation, .. }
            | Self::Api { operation, .. }
            | Self::Decode { operation, .. }
            | Self::MissingField { operation, .. } => *operation,
        }
    }

    /// Whether a later attempt could succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => is_retryable_slack_status(*status),
            Self::Api { code, .. } => is_transient_slack_error_code(code),
            Self::Decode { .. } | Self::MissingField { .. } => false,
        }
    }
}

impl From<SlackApiError> for SourceError {
    fn from(error: SlackApiError) -> Self {
        let operation = error.operation();
        if error.is_transient() {
            SourceError::transient(operation, error.to_string())
        } else {
            SourceError::rejected(operation, error.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlackAuthTestResponse {
    ok: bool,
    user_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackOkResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversation {
    id: String,
    #[serde(default)]
    is_member: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackConversationsListResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    channels: Vec<SlackConversation>,
    #[serde(default)]
    response_metadata: Option<SlackResponseMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackWireReaction {
    name: Option<String>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    users: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackWireMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reactions: Vec<SlackWireReaction>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackMessagesResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackWireMessage>,
    #[serde(default)]
    response_metadata: Option<SlackResponseMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReactedItemWire {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    message: Option<SlackWireMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReactionsListResponse {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    items: Vec<SlackReactedItemWire>,
    #[serde(default)]
    response_metadata: Option<SlackResponseMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        app_token: String,
        bot_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("bbot-slack-runtime"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            app_token: app_token.trim().to_string(),
            bot_token: bot_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    /// Copy that sends every request once. The status board engine owns retries
    /// for activity reads, so its source must not retry underneath it.
    pub fn without_retries(&self) -> Self {
        Self {
            retry_max_attempts: 1,
            ..self.clone()
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    pub async fn resolve_bot_user_id(&self) -> Result<String, SlackApiError> {
        const OPERATION: &str = "auth.test";
        let response: SlackAuthTestResponse = self
            .request_json(OPERATION, || {
                self.http
                    .post(self.endpoint(OPERATION))
                    .bearer_auth(&self.bot_token)
            })
            .await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        response
            .user_id
            .filter(|value| !value.trim().is_empty())
            .ok_or(SlackApiError::MissingField {
                operation: OPERATION,
                field: "user_id",
            })
    }

    pub async fn open_socket_connection(&self) -> Result<String, SlackApiError> {
        const OPERATION: &str = "apps.connections.open";
        let response: SlackOpenSocketResponse = self
            .request_json(OPERATION, || {
                self.http
                    .post(self.endpoint(OPERATION))
                    .bearer_auth(&self.app_token)
            })
            .await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        response
            .url
            .filter(|value| !value.trim().is_empty())
            .ok_or(SlackApiError::MissingField {
                operation: OPERATION,
                field: "url",
            })
    }

    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage, SlackApiError> {
        const OPERATION: &str = "chat.postMessage";
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts.map(str::trim).filter(|value| !value.is_empty()) {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        let response: SlackChatMessageResponse = self
            .request_json(OPERATION, || {
                self.http
                    .post(self.endpoint(OPERATION))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response.ts.ok_or(SlackApiError::MissingField {
                operation: OPERATION,
                field: "ts",
            })?,
        })
    }

    /// Adds `name` to a message. A reaction the bot already left counts as added.
    pub async fn add_reaction(
        &self,
        channel: &str,
        timestamp: &str,
        name: &str,
    ) -> Result<(), SlackApiError> {
        const OPERATION: &str = "reactions.add";
        let payload = json!({
            "channel": channel,
            "timestamp": timestamp,
            "name": name,
        });
        let response: SlackOkResponse = self
            .request_json(OPERATION, || {
                self.http
                    .post(self.endpoint(OPERATION))
                    .bearer_auth(&self.bot_token)
                    .json(&payload)
            })
            .await?;
        if response.error.as_deref() == Some("already_reacted") {
            return Ok(());
        }
        ensure_ok(OPERATION, response.ok, response.error)
    }

    async fn get_with_query<T>(
        &self,
        operation: &'static str,
        query: &[(&str, String)],
    ) -> Result<T, SlackApiError>
    where
        T: DeserializeOwned,
    {
        self.request_json(operation, || {
            self.http
                .get(self.endpoint(operation))
                .bearer_auth(&self.bot_token)
                .query(query)
        })
        .await
    }

    async fn request_json<T, F>(
        &self,
        operation: &'static str,
        mut builder: F,
    ) -> Result<T, SlackApiError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-bbot-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .map_err(|source| SlackApiError::Decode { operation, source });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        tracing::debug!(
                            operation,
                            attempt,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis() as u64,
                            "retrying slack api call"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(SlackApiError::Status {
                        operation,
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(SlackApiError::Transport {
                        operation,
                        source: error,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ActivitySource for SlackApiClient {
    async fn list_channels(
        &self,
        request: ChannelListRequest,
    ) -> Result<Page<ChannelSummary>, SourceError> {
        const OPERATION: &str = "conversations.list";
        let types = request
            .channel_kinds
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let mut query = vec![
            ("limit", request.page_size.to_string()),
            ("types", types),
            ("exclude_archived", request.exclude_archived.to_string()),
        ];
        push_cursor(&mut query, request.cursor);
        let response: SlackConversationsListResponse =
            self.get_with_query(OPERATION, &query).await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        Ok(Page {
            items: response
                .channels
                .into_iter()
                .map(|channel| ChannelSummary {
                    id: ChannelId::new(channel.id),
                    is_member: channel.is_member,
                })
                .collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn channel_history(&self, request: HistoryRequest) -> Result<Page<Message>, SourceError> {
        const OPERATION: &str = "conversations.history";
        let mut query = vec![
            ("channel", request.channel_id.as_str().to_string()),
            ("oldest", request.oldest_epoch_seconds.to_string()),
            ("inclusive", request.inclusive.to_string()),
            ("limit", request.page_size.to_string()),
        ];
        if let Some(latest) = request.latest_epoch_seconds {
            query.push(("latest", latest.to_string()));
        }
        push_cursor(&mut query, request.cursor);
        let response: SlackMessagesResponse = self.get_with_query(OPERATION, &query).await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        Ok(Page {
            items: to_domain_messages(&request.channel_id, response.messages),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn thread_replies(&self, request: RepliesRequest) -> Result<Page<Message>, SourceError> {
        const OPERATION: &str = "conversations.replies";
        let mut query = vec![
            ("channel", request.channel_id.as_str().to_string()),
            ("ts", request.thread_root_token.clone()),
            ("oldest", request.oldest_epoch_seconds.to_string()),
            ("limit", request.page_size.to_string()),
        ];
        push_cursor(&mut query, request.cursor);
        let response: SlackMessagesResponse = self.get_with_query(OPERATION, &query).await?;
        ensure_ok(OPERATION, response.ok, response.error)?;
        Ok(Page {
            items: to_domain_messages(&request.channel_id, response.messages),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn reactions_by_user(
        &self,
        request: ReactionListRequest,
    ) -> Result<Page<ReactedItem>, SourceError> {
        const OPERATION: &str = "reactions.list";
        let mut query = vec![
            ("user", request.user_id.clone()),
            ("full", "true".to_string()),
            ("limit", request.page_size.to_string()),
        ];
        push_cursor(&mut query, request.cursor);
        let response: SlackReactionsListResponse = self.get_with_query(OPERATION, &query).await?;
        ensure_ok(OPERATION, response.ok, response.error)?;

        // reactions.list has no time filter; items older than the window are dropped here.
        let items = response
            .items
            .into_iter()
            .filter_map(|item| {
                let channel_id = ChannelId::new(item.channel.filter(|id| !id.trim().is_empty())?);
                let message = item.message?.into_message(&channel_id)?;
                Some(ReactedItem { message })
            })
            .filter(|item| {
                token_epoch_seconds(&item.message.timestamp_token)
                    .map(|seconds| seconds >= request.oldest_epoch_seconds)
                    .unwrap_or(false)
            })
            .collect();
        Ok(Page {
            items,
            next_cursor: next_cursor(response.response_metadata),
        })
    }
}

impl SlackWireMessage {
    fn into_message(self, channel_id: &ChannelId) -> Option<Message> {
        let timestamp_token = self.ts.filter(|ts| !ts.trim().is_empty())?;
        Some(Message {
            author_id: self.user.filter(|user| !user.trim().is_empty()),
            timestamp_token,
            channel_id: channel_id.clone(),
            thread_root_token: self.thread_ts.filter(|ts| !ts.trim().is_empty()),
            text: self.text,
            reactions: self
                .reactions
                .into_iter()
                .filter_map(|reaction| {
                    Some(ReactionTally {
                        emoji_name: reaction.name.filter(|name| !name.is_empty())?,
                        count: reaction.count.unwrap_or(0),
                        reacting_user_ids: reaction.users,
                    })
                })
                .collect(),
        })
    }
}

fn to_domain_messages(channel_id: &ChannelId, messages: Vec<SlackWireMessage>) -> Vec<Message> {
    messages
        .into_iter()
        .filter_map(|message| message.into_message(channel_id))
        .collect()
}

fn push_cursor(query: &mut Vec<(&str, String)>, cursor: Option<String>) {
    if let Some(cursor) = cursor.filter(|cursor| !cursor.trim().is_empty()) {
        query.push(("cursor", cursor));
    }
}

fn next_cursor(metadata: Option<SlackResponseMetadata>) -> Option<String> {
    metadata
        .and_then(|metadata| metadata.next_cursor)
        .map(|cursor| cursor.trim().to_string())
        .filter(|cursor| !cursor.is_empty())
}

fn ensure_ok(
    operation: &'static str,
    ok: bool,
    error: Option<String>,
) -> Result<(), SlackApiError> {
    if ok {
        return Ok(());
    }
    Err(SlackApiError::Api {
        operation,
        code: error.unwrap_or_else(|| "unknown_error".to_string()),
    })
}

#[cfg(test)]
mod tests;
