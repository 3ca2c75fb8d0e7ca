//! Slack Web API client behavior against a mocked API server.

use bbot_status_board::{
    ActivitySource, ChannelId, ChannelKind, ChannelListRequest, HistoryRequest,
    ReactionListRequest, RepliesRequest, SourceError,
};
use httpmock::prelude::*;
use serde_json::json;

use super::{SlackApiClient, SlackApiError};

fn test_client(base_url: &str, retry_max_attempts: usize) -> SlackApiClient {
    SlackApiClient::new(
        base_url.to_string(),
        "xapp-test".to_string(),
        "xoxb-test".to_string(),
        2_000,
        retry_max_attempts,
        1,
    )
    .expect("client")
}

#[tokio::test]
async fn integration_post_message_retries_rate_limits() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .header("x-bbot-retry-attempt", "0");
        then.status(429).header("retry-after", "0").body("slow down");
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .header("x-bbot-retry-attempt", "1")
            .header("authorization", "Bearer xoxb-test")
            .body_includes("\"thread_ts\":\"10.5\"");
        then.status(200)
            .json_body(json!({"ok": true, "channel": "C1", "ts": "11.0"}));
    });

    let posted = test_client(&server.base_url(), 3)
        .post_message("C1", "주사위 결과: 4", Some("10.5"))
        .await
        .expect("post eventually succeeds");
    assert_eq!(posted.channel, "C1");
    assert_eq!(posted.ts, "11.0");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn functional_auth_and_socket_open_use_separate_tokens() {
    let server = MockServer::start();
    let auth = server.mock(|when, then| {
        when.method(POST)
            .path("/auth.test")
            .header("authorization", "Bearer xoxb-test");
        then.status(200)
            .json_body(json!({"ok": true, "user_id": "UBOT"}));
    });
    let open = server.mock(|when, then| {
        when.method(POST)
            .path("/apps.connections.open")
            .header("authorization", "Bearer xapp-test");
        then.status(200)
            .json_body(json!({"ok": true, "url": "wss://example.invalid/socket"}));
    });

    let client = test_client(&server.base_url(), 1);
    assert_eq!(
        client.resolve_bot_user_id().await.expect("bot user"),
        "UBOT"
    );
    assert_eq!(
        client.open_socket_connection().await.expect("socket url"),
        "wss://example.invalid/socket"
    );
    auth.assert_calls(1);
    open.assert_calls(1);
}

#[tokio::test]
async fn regression_api_error_codes_are_rejections() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/auth.test");
        then.status(200)
            .json_body(json!({"ok": false, "error": "invalid_auth"}));
    });

    let error = test_client(&server.base_url(), 1)
        .resolve_bot_user_id()
        .await
        .expect_err("invalid auth");
    assert!(matches!(
        &error,
        SlackApiError::Api { operation: "auth.test", code } if code == "invalid_auth"
    ));
    assert!(!error.is_transient());
    assert!(matches!(
        SourceError::from(error),
        SourceError::Rejected { .. }
    ));
}

#[tokio::test]
async fn functional_list_channels_maps_cursor_and_membership() {
    let server = MockServer::start();
    let listing = server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.list")
            .query_param("limit", "1000")
            .query_param("types", "public_channel,private_channel")
            .query_param("exclude_archived", "true")
            .query_param("cursor", "page-2");
        then.status(200).json_body(json!({
            "ok": true,
            "channels": [
                {"id": "C1", "is_member": true},
                {"id": "C2", "is_member": false},
                {"id": "C3"}
            ],
            "response_metadata": {"next_cursor": " "}
        }));
    });

    let page = test_client(&server.base_url(), 1)
        .list_channels(ChannelListRequest {
            page_size: 1_000,
            cursor: Some("page-2".to_string()),
            channel_kinds: vec![ChannelKind::PublicChannel, ChannelKind::PrivateChannel],
            exclude_archived: true,
        })
        .await
        .expect("channel page");
    listing.assert_calls(1);
    assert_eq!(page.next_cursor, None);
    assert_eq!(page.items.len(), 3);
    assert!(page.items[0].is_member);
    assert!(!page.items[1].is_member);
    assert!(!page.items[2].is_member);
}

#[tokio::test]
async fn functional_history_converts_wire_messages() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.history")
            .query_param("channel", "C1")
            .query_param("oldest", "1735603200")
            .query_param("inclusive", "true")
            .query_param("limit", "200");
        then.status(200).json_body(json!({
            "ok": true,
            "messages": [
                {
                    "user": "U1",
                    "ts": "1735689720.000100",
                    "thread_ts": "1735689720.000100",
                    "text": "hi <@U2>",
                    "reactions": [{"name": "tada", "count": 5, "users": ["U2", "U3"]}]
                },
                {"user": "U2", "text": "no ts"},
                {"subtype": "channel_join", "ts": "1735689721.000100"}
            ],
            "response_metadata": {"next_cursor": "next-page"}
        }));
    });

    let page = test_client(&server.base_url(), 1)
        .channel_history(HistoryRequest {
            channel_id: ChannelId::from("C1"),
            oldest_epoch_seconds: 1_735_603_200,
            latest_epoch_seconds: None,
            inclusive: true,
            page_size: 200,
            cursor: None,
        })
        .await
        .expect("history page");
    assert_eq!(page.next_cursor.as_deref(), Some("next-page"));
    assert_eq!(page.items.len(), 2);
    let first = &page.items[0];
    assert!(first.is_thread_root());
    assert_eq!(first.channel_id, ChannelId::from("C1"));
    assert_eq!(first.reactions[0].count, 5);
    assert_eq!(page.items[1].author_id, None);
}

#[tokio::test]
async fn regression_server_errors_become_transient_source_errors() {
    let server = MockServer::start();
    let replies = server.mock(|when, then| {
        when.method(GET)
            .path("/conversations.replies")
            .query_param("ts", "10.1");
        then.status(503).body("unavailable");
    });

    let error = test_client(&server.base_url(), 2)
        .thread_replies(RepliesRequest {
            channel_id: ChannelId::from("C1"),
            thread_root_token: "10.1".to_string(),
            oldest_epoch_seconds: 0,
            page_size: 200,
            cursor: None,
        })
        .await
        .expect_err("replies unavailable");
    assert!(error.is_transient());
    assert_eq!(replies.calls(), 2);
}

#[tokio::test]
async fn functional_reactions_list_drops_items_before_window() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET)
            .path("/reactions.list")
            .query_param("user", "U1")
            .query_param("full", "true");
        then.status(200).json_body(json!({
            "ok": true,
            "items": [
                {
                    "type": "message",
                    "channel": "C1",
                    "message": {
                        "user": "U2",
                        "ts": "1735689720.000100",
                        "reactions": [{"name": "tada", "count": 1, "users": ["U1"]}]
                    }
                },
                {
                    "type": "message",
                    "channel": "C1",
                    "message": {"user": "U2", "ts": "1700000000.000100"}
                },
                {"type": "file"}
            ]
        }));
    });

    let page = test_client(&server.base_url(), 1)
        .reactions_by_user(ReactionListRequest {
            user_id: "U1".to_string(),
            oldest_epoch_seconds: 1_735_603_200,
            page_size: 100,
            cursor: None,
        })
        .await
        .expect("reaction page");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].message.channel_id, ChannelId::from("C1"));
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn functional_add_reaction_posts_json_and_tolerates_repeats() {
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/reactions.add")
            .header("authorization", "Bearer xoxb-test")
            .body_includes("\"name\":\"one\"")
            .body_includes("\"timestamp\":\"10.5\"");
        then.status(200).json_body(json!({"ok": true}));
    });
    let repeated = server.mock(|when, then| {
        when.method(POST)
            .path("/reactions.add")
            .body_includes("\"name\":\"two\"");
        then.status(200)
            .json_body(json!({"ok": false, "error": "already_reacted"}));
    });
    let rejected = server.mock(|when, then| {
        when.method(POST)
            .path("/reactions.add")
            .body_includes("\"name\":\"nope\"");
        then.status(200)
            .json_body(json!({"ok": false, "error": "invalid_name"}));
    });

    let client = test_client(&server.base_url(), 1);
    client
        .add_reaction("C1", "10.5", "one")
        .await
        .expect("reaction added");
    client
        .add_reaction("C1", "10.5", "two")
        .await
        .expect("repeat is fine");
    let error = client
        .add_reaction("C1", "10.5", "nope")
        .await
        .expect_err("bad emoji");
    assert!(matches!(error, SlackApiError::Api { code, .. } if code == "invalid_name"));
    first.assert_calls(1);
    repeated.assert_calls(1);
    rejected.assert_calls(1);
}

#[tokio::test]
async fn regression_single_attempt_client_does_not_retry_server_errors() {
    let server = MockServer::start();
    let history = server.mock(|when, then| {
        when.method(GET).path("/conversations.history");
        then.status(503).body("unavailable");
    });

    let error = test_client(&server.base_url(), 4)
        .without_retries()
        .channel_history(HistoryRequest {
            channel_id: ChannelId::from("C1"),
            oldest_epoch_seconds: 0,
            latest_epoch_seconds: None,
            inclusive: true,
            page_size: 200,
            cursor: None,
        })
        .await
        .expect_err("history unavailable");
    assert!(error.is_transient());
    history.assert_calls(1);
}
