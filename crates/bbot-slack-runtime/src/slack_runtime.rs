//! Slack Socket Mode runtime: receives message events, routes bot commands, and
//! posts replies.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bbot_status_board::{
    calendar_date, ActivitySource, ChannelId, RepliesRequest, StatusBoardConfig,
    StatusBoardEngine, StatusBoardError, StatusBoardRequest, TimeWindow,
};
use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::attempt_counter::AttemptCounter;
use crate::games::{
    draw_lottery_winner, pick_rock_paper_scissors, pick_thanks_emojis,
    render_jackpot_announcement, render_lottery_result, render_roulette_reply, roll_dice,
    vote_option_reactions, RouletteOutcome, RouletteSpin, CELEBRATION_TEXT,
    LOTTERY_ENTRY_REACTION,
};
use crate::member_filter::{render_group_mention, select_mentions, MemberDirectory, MemberQuery};
use crate::slack_api_client::SlackApiClient;
use crate::slack_commands::{bot_command_usage, BotCommand, CommandParser};
use crate::slack_helpers::{current_unix_timestamp, current_unix_timestamp_ms};

pub const DEFAULT_STATUS_BOARD_DAYS: u64 = 7;

/// Pause between consecutive vote reactions so Slack keeps them in order.
const VOTE_REACTION_INTERVAL: Duration = Duration::from_millis(800);

#[derive(Clone)]
/// Runtime configuration for the Slack bot transport loop.
pub struct SlackBotRuntimeConfig {
    pub api_base: String,
    pub app_token: String,
    pub bot_token: String,
    pub bot_user_id: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
    pub max_event_age_seconds: u64,
    pub status_board_days: u64,
    pub status_board: StatusBoardConfig,
    /// Channel that hears about roulette jackpots; `None` disables announcements.
    pub announcement_channel: Option<String>,
    pub attempt_counter: Arc<dyn AttemptCounter>,
    pub member_directory: Arc<dyn MemberDirectory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
struct SlackSocketEnvelope {
    #[serde(default)]
    envelope_id: String,
    #[serde(rename = "type")]
    envelope_type: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A human-authored channel message, normalized from a Socket Mode envelope.
pub struct InboundMessage {
    pub event_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub occurred_unix_ms: u64,
}

impl InboundMessage {
    /// Replies stay in the trigger's thread, or start one on the trigger.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(self.ts.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPost {
    pub channel: String,
    pub text: String,
    pub thread_ts: Option<String>,
}

impl OutboundPost {
    fn in_thread(message: &InboundMessage, text: impl Into<String>) -> Self {
        Self {
            channel: message.channel_id.clone(),
            text: text.into(),
            thread_ts: Some(message.reply_thread_ts().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReaction {
    pub channel: String,
    pub timestamp: String,
    pub name: String,
}

/// One Slack write produced by a command, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Post(OutboundPost),
    AddReaction(OutboundReaction),
}

impl OutboundAction {
    pub fn as_post(&self) -> Option<&OutboundPost> {
        match self {
            Self::Post(post) => Some(post),
            Self::AddReaction(_) => None,
        }
    }
}

impl From<OutboundPost> for OutboundAction {
    fn from(post: OutboundPost) -> Self {
        Self::Post(post)
    }
}

/// Turns inbound messages into the posts they should produce.
pub struct CommandDispatcher {
    parser: CommandParser,
    source: Arc<dyn ActivitySource>,
    engine: StatusBoardEngine,
    status_board_days: u64,
    announcement_channel: Option<String>,
    attempt_counter: Arc<dyn AttemptCounter>,
    member_directory: Arc<dyn MemberDirectory>,
    rng: Mutex<StdRng>,
}

impl CommandDispatcher {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        config: &SlackBotRuntimeConfig,
        rng: StdRng,
    ) -> Result<Self> {
        Ok(Self {
            parser: CommandParser::new().context("failed to compile command patterns")?,
            engine: StatusBoardEngine::new(Arc::clone(&source), config.status_board.clone()),
            source,
            status_board_days: config.status_board_days.max(1),
            announcement_channel: config
                .announcement_channel
                .clone()
                .filter(|channel| !channel.trim().is_empty()),
            attempt_counter: Arc::clone(&config.attempt_counter),
            member_directory: Arc::clone(&config.member_directory),
            rng: Mutex::new(rng),
        })
    }

    pub fn parse(&self, text: &str) -> Option<BotCommand> {
        self.parser.parse(text)
    }

    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        now_epoch_seconds: u64,
        cancel: watch::Receiver<bool>,
    ) -> Vec<OutboundAction> {
        let Some(command) = self.parse(&message.text) else {
            return Vec::new();
        };
        tracing::debug!(
            channel_id = %message.channel_id,
            user_id = %message.user_id,
            command = ?command,
            "dispatching bot command"
        );
        let posts = match command {
            BotCommand::StatusBoard => {
                self.status_board(message, now_epoch_seconds, cancel)
                    .await
            }
            BotCommand::Dice => {
                let face = self.with_rng(|rng| roll_dice(rng));
                vec![OutboundPost::in_thread(message, format!("Dice: {face}"))]
            }
            BotCommand::RockPaperScissors => {
                let hand = self.with_rng(|rng| pick_rock_paper_scissors(rng));
                vec![OutboundPost::in_thread(message, format!("{hand}!"))]
            }
            BotCommand::Roulette => self.roulette(message, now_epoch_seconds),
            BotCommand::Lottery => vec![self.lottery(message).await],
            BotCommand::Vote { first, last } => return vote_reactions(message, first, last),
            BotCommand::Celebrate => vec![OutboundPost::in_thread(message, CELEBRATION_TEXT)],
            BotCommand::Thanks => {
                let emojis = self.with_rng(|rng| pick_thanks_emojis(rng));
                vec![OutboundPost::in_thread(message, emojis)]
            }
            BotCommand::GroupMention(query) => self.group_mention(message, &query).await,
            BotCommand::Help => vec![OutboundPost::in_thread(message, bot_command_usage())],
            BotCommand::Invalid { message: usage } => {
                vec![OutboundPost::in_thread(message, usage)]
            }
        };
        posts.into_iter().map(OutboundAction::from).collect()
    }

    fn with_rng<T>(&self, roll: impl FnOnce(&mut StdRng) -> T) -> T {
        // RNG state stays valid even if a holder panicked.
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        roll(&mut rng)
    }

    async fn status_board(
        &self,
        message: &InboundMessage,
        now_epoch_seconds: u64,
        cancel: watch::Receiver<bool>,
    ) -> Vec<OutboundPost> {
        let request = StatusBoardRequest {
            user_id: message.user_id.clone(),
            window: TimeWindow::trailing_days(now_epoch_seconds, self.status_board_days),
        };
        match self.engine.run(&request, cancel).await {
            Ok(report) => vec![OutboundPost::in_thread(message, report.render())],
            Err(StatusBoardError::Cancelled) => {
                tracing::info!(user_id = %message.user_id, "status board cancelled; no reply posted");
                Vec::new()
            }
            Err(error) => {
                tracing::warn!(user_id = %message.user_id, %error, "status board request failed");
                vec![OutboundPost::in_thread(
                    message,
                    format!("Could not load the status board: {error}"),
                )]
            }
        }
    }

    fn roulette(&self, message: &InboundMessage, now_epoch_seconds: u64) -> Vec<OutboundPost> {
        let time_zone = self.engine.config().reducer.time_zone;
        let day = calendar_date(&now_epoch_seconds.to_string(), time_zone)
            .unwrap_or_else(|| "1970-01-01".to_string());
        let attempt = match self.attempt_counter.increment(&message.user_id, &day) {
            Ok(attempt) => attempt,
            Err(error) => {
                tracing::warn!(user_id = %message.user_id, %error, "roulette attempt counter failed");
                return vec![OutboundPost::in_thread(
                    message,
                    "Roulette is unavailable right now.",
                )];
            }
        };
        let spin = self.with_rng(|rng| RouletteSpin::spin(rng));
        roulette_posts(message, &spin, attempt, self.announcement_channel.as_deref())
    }

    /// Reads the thread root's `:hand:` reactions and draws one of the users.
    async fn lottery(&self, message: &InboundMessage) -> OutboundPost {
        let root_ts = message.reply_thread_ts().to_string();
        let request = RepliesRequest {
            channel_id: ChannelId::new(message.channel_id.clone()),
            thread_root_token: root_ts.clone(),
            oldest_epoch_seconds: 0,
            page_size: 1,
            cursor: None,
        };
        let page = match self.source.thread_replies(request).await {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(channel_id = %message.channel_id, %error, "lottery thread lookup failed");
                return OutboundPost::in_thread(message, "Something went wrong while drawing.");
            }
        };
        let participants = page
            .items
            .iter()
            .find(|item| item.timestamp_token == root_ts)
            .and_then(|root| {
                root.reactions
                    .iter()
                    .find(|tally| tally.emoji_name == LOTTERY_ENTRY_REACTION)
            })
            .and_then(|tally| tally.reacting_user_ids.clone())
            .unwrap_or_default();
        match self.with_rng(|rng| draw_lottery_winner(rng, &participants).map(str::to_string)) {
            Some(winner) => OutboundPost::in_thread(
                message,
                render_lottery_result(&winner, participants.len()),
            ),
            None => OutboundPost::in_thread(message, "Nobody to draw from :cry:"),
        }
    }

    async fn group_mention(&self, message: &InboundMessage, query: &MemberQuery) -> Vec<OutboundPost> {
        match self.member_directory.active_members().await {
            Ok(members) => {
                let mentions = select_mentions(&members, query);
                vec![OutboundPost::in_thread(
                    message,
                    render_group_mention(&message.user_id, query, &mentions),
                )]
            }
            Err(error) => {
                tracing::warn!(%error, "member directory lookup failed");
                vec![OutboundPost::in_thread(
                    message,
                    format!("Could not load the member directory: {error}"),
                )]
            }
        }
    }
}

/// Posts for one roulette spin; an official jackpot is also announced when a
/// channel is configured.
pub fn roulette_posts(
    message: &InboundMessage,
    spin: &RouletteSpin,
    attempt: u32,
    announcement_channel: Option<&str>,
) -> Vec<OutboundPost> {
    let outcome = RouletteOutcome::classify(spin, attempt);
    let mut posts = vec![OutboundPost::in_thread(
        message,
        render_roulette_reply(&message.user_id, spin, &outcome),
    )];
    if let (RouletteOutcome::Jackpot { attempt }, Some(channel)) = (&outcome, announcement_channel)
    {
        posts.push(OutboundPost {
            channel: channel.to_string(),
            text: render_jackpot_announcement(&message.user_id, &message.channel_id, *attempt),
            thread_ts: None,
        });
    }
    posts
}

/// Number reactions on the trigger message itself, not its thread.
fn vote_reactions(message: &InboundMessage, first: u32, last: u32) -> Vec<OutboundAction> {
    vote_option_reactions(first, last)
        .unwrap_or_default()
        .iter()
        .map(|name| {
            OutboundAction::AddReaction(OutboundReaction {
                channel: message.channel_id.clone(),
                timestamp: message.ts.clone(),
                name: (*name).to_string(),
            })
        })
        .collect()
}

pub async fn run_slack_bot(config: SlackBotRuntimeConfig) -> Result<()> {
    let runtime = SlackBotRuntime::new(config).await?;
    runtime.run().await
}

struct SlackBotRuntime {
    config: SlackBotRuntimeConfig,
    slack_client: SlackApiClient,
    dispatcher: Arc<CommandDispatcher>,
    bot_user_id: String,
    shutdown_tx: watch::Sender<bool>,
}

impl SlackBotRuntime {
    async fn new(config: SlackBotRuntimeConfig) -> Result<Self> {
        let slack_client = SlackApiClient::new(
            config.api_base.clone(),
            config.app_token.clone(),
            config.bot_token.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;

        let bot_user_id = match config.bot_user_id.clone() {
            Some(user_id) if !user_id.trim().is_empty() => user_id.trim().to_string(),
            _ => slack_client
                .resolve_bot_user_id()
                .await
                .context("failed to resolve slack bot user id")?,
        };

        let source: Arc<dyn ActivitySource> = Arc::new(slack_client.without_retries());
        let dispatcher = CommandDispatcher::new(source, &config, StdRng::from_entropy())?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            slack_client,
            dispatcher: Arc::new(dispatcher),
            bot_user_id,
            shutdown_tx,
        })
    }

    async fn run(&self) -> Result<()> {
        loop {
            let socket_url = match self.slack_client.open_socket_connection().await {
                Ok(url) => url,
                Err(error) => {
                    tracing::warn!(%error, "slack bot failed to open socket connection");
                    if self.wait_before_reconnect().await {
                        return Ok(());
                    }
                    continue;
                }
            };

            tracing::info!(bot_user_id = %self.bot_user_id, "slack bot socket connected");
            match self.run_socket_session(&socket_url).await {
                Ok(true) => {
                    self.request_shutdown();
                    return Ok(());
                }
                Ok(false) => tracing::info!("slack socket closed by server; reconnecting"),
                Err(error) => tracing::warn!(error = %format!("{error:#}"), "slack bot socket session error"),
            }

            if self.wait_before_reconnect().await {
                return Ok(());
            }
        }
    }

    /// Returns true when shutdown was requested while waiting.
    async fn wait_before_reconnect(&self) -> bool {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                self.request_shutdown();
                true
            }
            _ = tokio::time::sleep(self.config.reconnect_delay) => false,
        }
    }

    fn request_shutdown(&self) {
        tracing::info!("slack bot shutdown requested");
        self.shutdown_tx.send_replace(true);
    }

    /// Runs one websocket session. `Ok(true)` means shutdown was requested.
    async fn run_socket_session(&self, socket_url: &str) -> Result<bool> {
        let (stream, _response) = connect_async(socket_url)
            .await
            .context("failed to connect slack socket mode websocket")?;
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(true),
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(false);
                    };
                    let message = message_result.context("failed reading slack websocket message")?;
                    let Some(envelope) = parse_socket_envelope(message)? else {
                        continue;
                    };
                    // `hello` and `disconnect` frames carry no envelope id and take no ack.
                    if !envelope.envelope_id.is_empty() {
                        ack_envelope(&mut sink, &envelope.envelope_id).await?;
                    }
                    if envelope.envelope_type == "disconnect" {
                        return Ok(false);
                    }
                    self.handle_envelope(&envelope);
                }
            }
        }
    }

    /// Spawns the command run so slow status boards never stall the socket.
    fn handle_envelope(&self, envelope: &SlackSocketEnvelope) -> Option<JoinHandle<()>> {
        let message = match normalize_socket_envelope(envelope, &self.bot_user_id) {
            Ok(Some(message)) => message,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "dropping malformed slack envelope");
                return None;
            }
        };
        if event_is_stale(
            &message,
            self.config.max_event_age_seconds,
            current_unix_timestamp_ms(),
        ) {
            tracing::debug!(event_id = %message.event_id, "skipping stale slack event");
            return None;
        }
        if self.dispatcher.parse(&message.text).is_none() {
            return None;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let slack_client = self.slack_client.clone();
        let cancel = self.shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let actions = dispatcher
                .dispatch(&message, current_unix_timestamp(), cancel)
                .await;
            apply_actions(&slack_client, &message.event_id, actions).await;
        }))
    }
}

async fn apply_actions(slack_client: &SlackApiClient, event_id: &str, actions: Vec<OutboundAction>) {
    let mut reacted = false;
    for action in actions {
        match action {
            OutboundAction::Post(post) => {
                if let Err(error) = slack_client
                    .post_message(&post.channel, &post.text, post.thread_ts.as_deref())
                    .await
                {
                    tracing::warn!(
                        channel_id = %post.channel,
                        event_id,
                        %error,
                        "failed to post slack reply"
                    );
                }
            }
            OutboundAction::AddReaction(reaction) => {
                if reacted {
                    tokio::time::sleep(VOTE_REACTION_INTERVAL).await;
                }
                reacted = true;
                // A failed reaction stops the rest so options never appear out of order.
                if let Err(error) = slack_client
                    .add_reaction(&reaction.channel, &reaction.timestamp, &reaction.name)
                    .await
                {
                    tracing::warn!(
                        channel_id = %reaction.channel,
                        event_id,
                        name = %reaction.name,
                        %error,
                        "failed to add slack reaction"
                    );
                    return;
                }
            }
        }
    }
}

async fn ack_envelope<S>(sink: &mut S, envelope_id: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    sink.send(WsMessage::Text(ack.into()))
        .await
        .context("failed to send slack socket ack")
}

fn parse_socket_envelope(message: WsMessage) -> Result<Option<SlackSocketEnvelope>> {
    let text = match message {
        WsMessage::Text(text) => text.as_str().to_string(),
        WsMessage::Binary(bytes) => {
            String::from_utf8(bytes.to_vec()).context("invalid utf-8 slack socket payload")?
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
            return Ok(None)
        }
    };
    serde_json::from_str::<SlackSocketEnvelope>(&text)
        .map(Some)
        .context("failed to parse slack socket envelope")
}

#[derive(Debug, Deserialize)]
struct SlackEventCallbackEnvelope {
    #[serde(rename = "type")]
    callback_type: String,
    event_id: String,
    #[serde(default)]
    event_time: u64,
    event: SlackEventPayload,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

fn normalize_socket_envelope(
    envelope: &SlackSocketEnvelope,
    bot_user_id: &str,
) -> Result<Option<InboundMessage>> {
    if envelope.envelope_type != "events_api" {
        return Ok(None);
    }
    let callback = serde_json::from_value::<SlackEventCallbackEnvelope>(envelope.payload.clone())
        .context("failed to decode slack event callback payload")?;
    if callback.callback_type != "event_callback" {
        return Ok(None);
    }

    let event = callback.event;
    if event.event_type != "message"
        || event.subtype.as_deref() == Some("bot_message")
        || event.bot_id.is_some()
    {
        return Ok(None);
    }
    let user_id = match event.user {
        Some(user) if !user.trim().is_empty() => user,
        _ => return Ok(None),
    };
    if user_id == bot_user_id {
        return Ok(None);
    }
    let channel_id = event
        .channel
        .filter(|channel| !channel.trim().is_empty())
        .ok_or_else(|| anyhow!("slack message event {} has no channel", callback.event_id))?;
    let ts = event
        .ts
        .filter(|ts| !ts.trim().is_empty())
        .ok_or_else(|| anyhow!("slack message event {} has no ts", callback.event_id))?;

    Ok(Some(InboundMessage {
        event_id: callback.event_id,
        channel_id,
        user_id,
        text: event.text.unwrap_or_default(),
        ts,
        thread_ts: event.thread_ts.filter(|ts| !ts.trim().is_empty()),
        occurred_unix_ms: callback.event_time.saturating_mul(1000),
    }))
}

fn event_is_stale(message: &InboundMessage, max_event_age_seconds: u64, now_unix_ms: u64) -> bool {
    if max_event_age_seconds == 0 || message.occurred_unix_ms == 0 {
        return false;
    }
    let max_age_ms = max_event_age_seconds.saturating_mul(1000);
    now_unix_ms.saturating_sub(message.occurred_unix_ms) > max_age_ms
}
