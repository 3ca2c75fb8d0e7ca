//! Tests for status board aggregation across paginated, partially failing sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{StatusBoardConfig, StatusBoardEngine, StatusBoardRequest};
use crate::status_error::{ScopeKind, SourceError, StatusBoardError};
use crate::status_pagination::PageSizes;
use crate::status_source::{
    ActivitySource, CallPolicy, ChannelListRequest, ChannelSummary, HistoryRequest, Page,
    ReactionListRequest, RepliesRequest,
};
use crate::status_types::{
    ActivityStats, ChannelId, Message, ReactedItem, ReactionTally, TimeWindow,
};

// 2025-01-01T00:00:00Z
const JAN_1: u64 = 1_735_689_600;
const DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy)]
enum Failure {
    /// Fails the first `n` calls with a transient error, then recovers.
    TransientTimes(usize),
    Always,
    Rejected,
    Hang,
}

#[derive(Default)]
struct FakeWorkspace {
    channel_pages: Vec<Vec<ChannelSummary>>,
    channel_page_failure: Option<(usize, Failure)>,
    histories: HashMap<ChannelId, Vec<Message>>,
    history_failures: HashMap<ChannelId, Failure>,
    history_delays: HashMap<ChannelId, Duration>,
    replies: HashMap<(ChannelId, String), Vec<Message>>,
    reply_failures: HashMap<(ChannelId, String), Failure>,
    reacted_items: Vec<ReactedItem>,
    reaction_failure: Option<Failure>,
}

#[derive(Default)]
struct CallCounters {
    channels: AtomicUsize,
    history: AtomicUsize,
    replies: AtomicUsize,
    reactions: AtomicUsize,
    history_by_channel: Mutex<HashMap<ChannelId, usize>>,
    reply_attempts: Mutex<HashMap<(ChannelId, String), usize>>,
}

impl CallCounters {
    fn total(&self) -> usize {
        self.channels.load(Ordering::SeqCst)
            + self.history.load(Ordering::SeqCst)
            + self.replies.load(Ordering::SeqCst)
            + self.reactions.load(Ordering::SeqCst)
    }
}

struct FakeActivitySource {
    workspace: FakeWorkspace,
    counters: CallCounters,
}

impl FakeActivitySource {
    fn new(workspace: FakeWorkspace) -> Arc<Self> {
        Arc::new(Self {
            workspace,
            counters: CallCounters::default(),
        })
    }
}

async fn apply_failure(
    failure: Option<Failure>,
    attempt: usize,
    operation: &'static str,
) -> Result<(), SourceError> {
    match failure {
        None => Ok(()),
        Some(Failure::TransientTimes(times)) if attempt > times => Ok(()),
        Some(Failure::TransientTimes(_)) | Some(Failure::Always) => {
            Err(SourceError::transient(operation, "connection reset"))
        }
        Some(Failure::Rejected) => Err(SourceError::rejected(operation, "not_in_channel")),
        Some(Failure::Hang) => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }
}

fn page_of<T: Clone>(items: &[T], page_size: usize, cursor: Option<String>) -> Page<T> {
    let offset = cursor
        .and_then(|cursor| cursor.parse::<usize>().ok())
        .unwrap_or(0)
        .min(items.len());
    let end = offset.saturating_add(page_size.max(1)).min(items.len());
    Page {
        items: items[offset..end].to_vec(),
        next_cursor: (end < items.len()).then(|| end.to_string()),
    }
}

#[async_trait]
impl ActivitySource for FakeActivitySource {
    async fn list_channels(
        &self,
        request: ChannelListRequest,
    ) -> Result<Page<ChannelSummary>, SourceError> {
        self.counters.channels.fetch_add(1, Ordering::SeqCst);
        assert!(request.exclude_archived);
        let index = request
            .cursor
            .as_deref()
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0);
        if let Some((failing_index, failure)) = self.workspace.channel_page_failure {
            if failing_index == index {
                apply_failure(Some(failure), 1, "conversations.list").await?;
            }
        }
        let channels = self
            .workspace
            .channel_pages
            .get(index)
            .cloned()
            .unwrap_or_default();
        let next_cursor =
            (index + 1 < self.workspace.channel_pages.len()).then(|| (index + 1).to_string());
        Ok(Page {
            items: channels,
            next_cursor,
        })
    }

    async fn channel_history(&self, request: HistoryRequest) -> Result<Page<Message>, SourceError> {
        self.counters.history.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut by_channel = self
                .counters
                .history_by_channel
                .lock()
                .expect("history counter lock");
            let entry = by_channel.entry(request.channel_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        assert!(request.inclusive);
        if let Some(delay) = self.workspace.history_delays.get(&request.channel_id) {
            tokio::time::sleep(*delay).await;
        }
        apply_failure(
            self.workspace
                .history_failures
                .get(&request.channel_id)
                .copied(),
            attempt,
            "conversations.history",
        )
        .await?;
        let messages = self
            .workspace
            .histories
            .get(&request.channel_id)
            .cloned()
            .unwrap_or_default();
        Ok(page_of(&messages, request.page_size, request.cursor))
    }

    async fn thread_replies(&self, request: RepliesRequest) -> Result<Page<Message>, SourceError> {
        self.counters.replies.fetch_add(1, Ordering::SeqCst);
        let key = (
            request.channel_id.clone(),
            request.thread_root_token.clone(),
        );
        let attempt = {
            let mut attempts = self
                .counters
                .reply_attempts
                .lock()
                .expect("reply counter lock");
            let entry = attempts.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        apply_failure(
            self.workspace.reply_failures.get(&key).copied(),
            attempt,
            "conversations.replies",
        )
        .await?;

        let root = self
            .workspace
            .histories
            .get(&request.channel_id)
            .and_then(|messages| {
                messages
                    .iter()
                    .find(|message| message.timestamp_token == request.thread_root_token)
            })
            .cloned();
        let replies = self.workspace.replies.get(&key).cloned().unwrap_or_default();
        let mut page = page_of(&replies, request.page_size, request.cursor);
        // The collaborator repeats the root at index 0 of every page.
        if let Some(root) = root {
            page.items.insert(0, root);
        }
        Ok(page)
    }

    async fn reactions_by_user(
        &self,
        request: ReactionListRequest,
    ) -> Result<Page<ReactedItem>, SourceError> {
        let attempt = self.counters.reactions.fetch_add(1, Ordering::SeqCst) + 1;
        apply_failure(self.workspace.reaction_failure, attempt, "reactions.list").await?;
        Ok(page_of(
            &self.workspace.reacted_items,
            request.page_size,
            request.cursor,
        ))
    }
}

fn member(id: &str) -> ChannelSummary {
    ChannelSummary {
        id: ChannelId::from(id),
        is_member: true,
    }
}

fn outsider(id: &str) -> ChannelSummary {
    ChannelSummary {
        id: ChannelId::from(id),
        is_member: false,
    }
}

fn message(channel: &str, author: &str, seconds: u64, seq: u32) -> Message {
    Message {
        author_id: Some(author.to_string()),
        timestamp_token: format!("{seconds}.{seq:06}"),
        channel_id: ChannelId::from(channel),
        thread_root_token: None,
        text: None,
        reactions: Vec::new(),
    }
}

fn with_reaction(mut message: Message, name: &str, count: u64) -> Message {
    message.reactions.push(ReactionTally {
        emoji_name: name.to_string(),
        count,
        reacting_user_ids: None,
    });
    message
}

fn as_root(mut message: Message) -> Message {
    message.thread_root_token = Some(message.timestamp_token.clone());
    message
}

fn as_reply(mut message: Message, root: &Message) -> Message {
    message.thread_root_token = Some(root.timestamp_token.clone());
    message
}

fn test_config() -> StatusBoardConfig {
    StatusBoardConfig {
        page_sizes: PageSizes {
            channels: 2,
            history: 2,
            replies: 2,
            reactions: 2,
        },
        max_pages_per_scope: 50,
        call_policy: CallPolicy {
            call_timeout: Duration::from_secs(2),
            max_attempts: 2,
            retry_delay: Duration::from_millis(1),
        },
        max_concurrent_channels: 4,
        ..StatusBoardConfig::default()
    }
}

fn request(user_id: &str) -> StatusBoardRequest {
    StatusBoardRequest {
        user_id: user_id.to_string(),
        window: TimeWindow::new(JAN_1 - DAY, None),
    }
}

fn not_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    drop(tx);
    rx
}

async fn run_stats(source: Arc<FakeActivitySource>, user_id: &str) -> ActivityStats {
    StatusBoardEngine::new(source, test_config())
        .run(&request(user_id), not_cancelled())
        .await
        .expect("status board run")
        .stats
}

fn weekly_workspace() -> FakeWorkspace {
    let mut workspace = FakeWorkspace {
        channel_pages: vec![vec![member("C1")]],
        ..FakeWorkspace::default()
    };
    workspace.histories.insert(
        ChannelId::from("C1"),
        vec![
            message("C1", "U1", JAN_1 + 60, 1),
            with_reaction(message("C1", "U1", JAN_1 + 120, 1), "tada", 5),
            message("C1", "U1", JAN_1 + 3_600, 1),
            message("C1", "U1", JAN_1 + DAY + 60, 1),
            message("C1", "U2", JAN_1 + 90, 1),
        ],
    );
    workspace
}

fn multi_channel_workspace(include_c2: bool) -> FakeWorkspace {
    let mut channels = vec![member("C1"), member("C3")];
    if include_c2 {
        channels.insert(1, member("C2"));
    }
    let mut workspace = FakeWorkspace {
        channel_pages: channels.chunks(2).map(|chunk| chunk.to_vec()).collect(),
        ..FakeWorkspace::default()
    };
    let root = as_root(message("C1", "U2", JAN_1 + 10, 1));
    workspace.histories.insert(
        ChannelId::from("C1"),
        vec![
            root.clone(),
            with_reaction(message("C1", "U1", JAN_1 + 20, 1), "tada", 2),
        ],
    );
    workspace.replies.insert(
        (ChannelId::from("C1"), root.timestamp_token.clone()),
        vec![as_reply(message("C1", "U1", JAN_1 + 30, 1), &root)],
    );
    workspace.histories.insert(
        ChannelId::from("C2"),
        vec![
            with_reaction(message("C2", "U1", JAN_1 + DAY, 1), "fire", 7),
            message("C2", "U1", JAN_1 + DAY + 5, 1),
        ],
    );
    let mut mention = message("C3", "U4", JAN_1 + 40, 1);
    mention.text = Some("thanks <@U1>".to_string());
    workspace.histories.insert(
        ChannelId::from("C3"),
        vec![mention, message("C3", "U1", JAN_1 + 2 * DAY, 1)],
    );
    workspace
}

#[tokio::test]
async fn functional_weekly_scenario_aggregates_single_channel() {
    let source = FakeActivitySource::new(weekly_workspace());
    let stats = run_stats(source.clone(), "U1").await;

    assert_eq!(stats.message_count, 4);
    assert_eq!(stats.active_days.get("2025-01-01"), Some(&3));
    assert_eq!(stats.active_days.get("2025-01-02"), Some(&1));
    assert_eq!(stats.most_active_day(), "2025-01-01");
    assert_eq!(stats.reactions_received, 5);
    assert_eq!(stats.most_reacted_message.count, 5);
    // 5 messages at page size 2 => 3 history pages.
    assert_eq!(source.counters.history.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn functional_zero_channels_produce_all_zero_report() {
    let source = FakeActivitySource::new(FakeWorkspace::default());
    let report = StatusBoardEngine::new(source.clone(), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("empty workspace report");

    assert_eq!(report.stats, ActivityStats::default());
    assert_eq!(report.stats.most_active_day(), "");
    assert!(report.diagnostics.failures.is_empty());
    assert_eq!(source.counters.history.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn regression_inverted_window_issues_no_collaborator_calls() {
    let source = FakeActivitySource::new(weekly_workspace());
    let report = StatusBoardEngine::new(source.clone(), test_config())
        .run(
            &StatusBoardRequest {
                user_id: "U1".to_string(),
                window: TimeWindow::new(JAN_1 + DAY, Some(JAN_1)),
            },
            not_cancelled(),
        )
        .await
        .expect("inverted window report");

    assert_eq!(report.stats, ActivityStats::default());
    assert_eq!(source.counters.total(), 0);
}

#[tokio::test]
async fn regression_malformed_user_fails_before_any_io() {
    let source = FakeActivitySource::new(weekly_workspace());
    let engine = StatusBoardEngine::new(source.clone(), test_config());

    for user_id in ["", "   ", "<@U1>", "U1 U2"] {
        let error = engine
            .run(&request(user_id), not_cancelled())
            .await
            .expect_err("malformed user must fail");
        assert!(matches!(error, StatusBoardError::FatalConfiguration(_)));
    }
    assert_eq!(source.counters.total(), 0);
}

#[tokio::test]
async fn functional_thread_participation_counts_once_per_thread() {
    let mut workspace = FakeWorkspace {
        channel_pages: vec![vec![member("C1")]],
        ..FakeWorkspace::default()
    };
    let root = as_root(message("C1", "U2", JAN_1, 1));
    workspace
        .histories
        .insert(ChannelId::from("C1"), vec![root.clone()]);
    workspace.replies.insert(
        (ChannelId::from("C1"), root.timestamp_token.clone()),
        vec![
            as_reply(message("C1", "U1", JAN_1 + 5, 1), &root),
            as_reply(message("C1", "U1", JAN_1 + 9, 1), &root),
            as_reply(message("C1", "U3", JAN_1 + 12, 1), &root),
        ],
    );
    let source = FakeActivitySource::new(workspace);
    let stats = run_stats(source.clone(), "U1").await;

    assert_eq!(stats.threads_participated, 1);
    assert_eq!(stats.message_count, 2);
    // 3 replies at page size 2 => 2 reply pages, each echoing the root.
    assert_eq!(source.counters.replies.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn functional_non_member_channels_are_skipped_across_pages() {
    let mut workspace = weekly_workspace();
    workspace.channel_pages = vec![
        vec![outsider("C0"), member("C1")],
        vec![outsider("C7")],
        vec![],
    ];
    workspace
        .histories
        .insert(ChannelId::from("C7"), vec![message("C7", "U1", JAN_1, 1)]);
    let source = FakeActivitySource::new(workspace);
    let stats = run_stats(source.clone(), "U1").await;

    assert_eq!(stats.message_count, 4);
    assert_eq!(source.counters.channels.load(Ordering::SeqCst), 3);
    let by_channel = source
        .counters
        .history_by_channel
        .lock()
        .expect("history counter lock");
    assert!(!by_channel.contains_key(&ChannelId::from("C7")));
    assert!(!by_channel.contains_key(&ChannelId::from("C0")));
}

#[tokio::test]
async fn integration_failed_channel_equals_omitted_channel() {
    let mut failing = multi_channel_workspace(true);
    failing
        .history_failures
        .insert(ChannelId::from("C2"), Failure::Always);
    let failing_source = FakeActivitySource::new(failing);
    let report = StatusBoardEngine::new(failing_source.clone(), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("report with failed channel");

    let omitted = run_stats(FakeActivitySource::new(multi_channel_workspace(false)), "U1").await;
    assert_eq!(report.stats, omitted);
    assert_eq!(report.stats.message_count, 3);
    assert_eq!(report.stats.threads_participated, 1);
    assert_eq!(report.stats.mentions_received, 1);
    assert_eq!(report.diagnostics.channels_scanned, 2);
    assert_eq!(report.diagnostics.failures.len(), 1);
    assert_eq!(
        report.diagnostics.failures[0].scope,
        ScopeKind::ChannelHistory {
            channel_id: ChannelId::from("C2")
        }
    );
    let by_channel = failing_source
        .counters
        .history_by_channel
        .lock()
        .expect("history counter lock");
    assert_eq!(by_channel.get(&ChannelId::from("C2")), Some(&2));
}

#[tokio::test]
async fn regression_single_transient_failure_is_retried_transparently() {
    let mut flaky = multi_channel_workspace(true);
    flaky
        .history_failures
        .insert(ChannelId::from("C2"), Failure::TransientTimes(1));
    let report = StatusBoardEngine::new(FakeActivitySource::new(flaky), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("flaky report");

    let healthy = run_stats(FakeActivitySource::new(multi_channel_workspace(true)), "U1").await;
    assert_eq!(report.stats, healthy);
    assert_eq!(report.stats.message_count, 5);
    assert_eq!(report.stats.most_reacted_message.count, 7);
    assert!(report.diagnostics.failures.is_empty());
}

#[tokio::test]
async fn regression_rejected_history_is_not_retried() {
    let mut workspace = multi_channel_workspace(true);
    workspace
        .history_failures
        .insert(ChannelId::from("C3"), Failure::Rejected);
    let source = FakeActivitySource::new(workspace);
    let stats = run_stats(source.clone(), "U1").await;

    assert_eq!(stats.mentions_received, 0);
    let by_channel = source
        .counters
        .history_by_channel
        .lock()
        .expect("history counter lock");
    assert_eq!(by_channel.get(&ChannelId::from("C3")), Some(&1));
}

#[tokio::test]
async fn functional_channel_listing_failure_keeps_partial_channel_set() {
    let mut workspace = multi_channel_workspace(true);
    workspace.channel_page_failure = Some((1, Failure::Always));
    let source = FakeActivitySource::new(workspace);
    let report = StatusBoardEngine::new(source.clone(), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("partial channel listing report");

    // Page 0 holds C1 and C2; page 1 (C3) is unreachable.
    assert_eq!(report.diagnostics.channels_scanned, 2);
    assert_eq!(report.stats.mentions_received, 0);
    assert_eq!(report.stats.message_count, 4);
    assert!(report
        .diagnostics
        .failures
        .iter()
        .any(|failure| failure.scope == ScopeKind::ChannelListing));
    // First page once, failing page twice (one retry).
    assert_eq!(source.counters.channels.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn functional_failed_thread_degrades_to_zero_replies() {
    let mut workspace = multi_channel_workspace(false);
    let root_token = format!("{}.000001", JAN_1 + 10);
    workspace.reply_failures.insert(
        (ChannelId::from("C1"), root_token.clone()),
        Failure::Always,
    );
    let report = StatusBoardEngine::new(FakeActivitySource::new(workspace), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("report with failed thread");

    assert_eq!(report.stats.threads_participated, 0);
    assert_eq!(report.stats.message_count, 2);
    assert_eq!(report.diagnostics.channels_scanned, 2);
    assert_eq!(
        report.diagnostics.failures[0].scope,
        ScopeKind::ThreadReplies {
            channel_id: ChannelId::from("C1"),
            thread_root_token: root_token,
        }
    );
}

#[tokio::test]
async fn functional_reaction_events_feed_added_metrics() {
    let mut workspace = weekly_workspace();
    let mut target = message("C1", "U2", JAN_1 + 90, 1);
    target.reactions = vec![
        ReactionTally {
            emoji_name: "tada".to_string(),
            count: 2,
            reacting_user_ids: Some(vec!["U1".to_string(), "U2".to_string()]),
        },
        ReactionTally {
            emoji_name: "eyes".to_string(),
            count: 1,
            reacting_user_ids: Some(vec!["U2".to_string()]),
        },
    ];
    let mut second = message("C1", "U3", JAN_1 + 95, 1);
    second.reactions = vec![ReactionTally {
        emoji_name: "tada".to_string(),
        count: 1,
        reacting_user_ids: Some(vec!["U1".to_string()]),
    }];
    let mut third = message("C1", "U3", JAN_1 + 99, 1);
    third.reactions = vec![ReactionTally {
        emoji_name: "fire".to_string(),
        count: 1,
        reacting_user_ids: Some(vec!["U1".to_string()]),
    }];
    workspace.reacted_items = vec![
        ReactedItem { message: target },
        ReactedItem { message: second },
        ReactedItem { message: third },
    ];
    let source = FakeActivitySource::new(workspace);
    let stats = run_stats(source.clone(), "U1").await;

    assert_eq!(stats.reactions_added, 3);
    assert_eq!(stats.emoji_added.get("tada"), Some(&2));
    assert_eq!(stats.most_added_emoji(), Some("tada"));
    assert_eq!(source.counters.reactions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn regression_reaction_listing_failure_only_drops_added_metrics() {
    let mut workspace = weekly_workspace();
    workspace.reaction_failure = Some(Failure::Always);
    let report = StatusBoardEngine::new(FakeActivitySource::new(workspace), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("report without reaction history");

    assert_eq!(report.stats.reactions_added, 0);
    assert_eq!(report.stats.most_added_emoji(), None);
    assert_eq!(report.stats.message_count, 4);
    assert_eq!(
        report.diagnostics.failures[0].scope,
        ScopeKind::ReactionEvents
    );
}

#[tokio::test]
async fn integration_concurrent_runs_are_deterministic() {
    let build = || {
        let mut workspace = multi_channel_workspace(true);
        // Same top tally in C1 and C2; C1 finishes last but must still win.
        workspace.histories.insert(
            ChannelId::from("C1"),
            vec![with_reaction(message("C1", "U1", JAN_1 + 20, 1), "tada", 7)],
        );
        workspace
            .history_delays
            .insert(ChannelId::from("C1"), Duration::from_millis(30));
        FakeActivitySource::new(workspace)
    };

    let first = run_stats(build(), "U1").await;
    let second = run_stats(build(), "U1").await;
    assert_eq!(first, second);
    assert!(first.most_reacted_message.permalink.contains("/archives/C1/"));
    assert_eq!(
        first.message_count,
        first.active_days.values().sum::<u64>()
    );
}

#[tokio::test]
async fn functional_cancellation_aborts_in_flight_history_requests() {
    let mut workspace = multi_channel_workspace(true);
    workspace
        .history_failures
        .insert(ChannelId::from("C2"), Failure::Hang);
    let engine = StatusBoardEngine::new(FakeActivitySource::new(workspace), {
        let mut config = test_config();
        config.call_policy.call_timeout = Duration::from_secs(120);
        config
    });
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = cancel_tx.send(true);
        cancel_tx
    });

    let started = std::time::Instant::now();
    let outcome = engine.run(&request("U1"), cancel_rx).await;
    assert_eq!(outcome, Err(StatusBoardError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    let _cancel_tx = canceller.await.expect("canceller task");
}

#[tokio::test]
async fn unit_report_render_reflects_stats() {
    let report = StatusBoardEngine::new(FakeActivitySource::new(weekly_workspace()), test_config())
        .run(&request("U1"), not_cancelled())
        .await
        .expect("weekly report");
    let rendered = report.render();
    assert!(rendered.contains("<@U1>"));
    assert!(rendered.contains("Messages: 4"));
    assert!(rendered.contains("Most active day: 2025-01-01"));
}
