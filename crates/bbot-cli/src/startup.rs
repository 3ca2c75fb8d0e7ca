//! Turns parsed flags into runtime configuration and runs the chosen subcommand.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use bbot_slack_runtime::{
    run_slack_bot, AttemptCounter, FileAttemptCounter, InMemoryAttemptCounter,
    JsonFileMemberDirectory, MemberDirectory, SlackApiClient, SlackBotRuntimeConfig,
    StaticMemberDirectory,
};
use bbot_status_board::{
    CallPolicy, ReducerSettings, StatusBoardConfig, StatusBoardEngine, StatusBoardRequest,
    TimeWindow,
};
use tokio::sync::watch;

use crate::cli_args::{
    Cli, CliCommand, ServeFlags, SlackConnectionFlags, StatusBoardFlags, StatusBoardOnceFlags,
};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Serve(ref serve) => {
            let config = build_runtime_config(&cli.slack, &cli.status_board, serve)?;
            run_slack_bot(config).await
        }
        CliCommand::StatusBoard(ref once) => {
            let rendered = run_status_board_once(&cli.slack, &cli.status_board, once).await?;
            println!("{rendered}");
            Ok(())
        }
    }
}

fn resolve_required_token(value: Option<&str>, flag: &str) -> Result<String> {
    value
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{flag} is required"))
}

pub(crate) fn build_status_board_config(flags: &StatusBoardFlags) -> StatusBoardConfig {
    let defaults = StatusBoardConfig::default();
    StatusBoardConfig {
        call_policy: CallPolicy {
            call_timeout: Duration::from_millis(flags.call_timeout_ms),
            ..defaults.call_policy
        },
        max_concurrent_channels: flags.max_concurrent_channels,
        reducer: ReducerSettings {
            time_zone: flags.time_zone,
            permalink_base: flags.permalink_base.trim_end_matches('/').to_string(),
        },
        ..defaults
    }
}

pub(crate) fn build_runtime_config(
    slack: &SlackConnectionFlags,
    status_board: &StatusBoardFlags,
    serve: &ServeFlags,
) -> Result<SlackBotRuntimeConfig> {
    let bot_token = resolve_required_token(slack.bot_token.as_deref(), "--slack-bot-token")?;
    let app_token = resolve_required_token(serve.app_token.as_deref(), "--slack-app-token")?;

    let attempt_counter: Arc<dyn AttemptCounter> = match serve.roulette_state_path.as_ref() {
        Some(path) => Arc::new(FileAttemptCounter::load(path).with_context(|| {
            format!("failed to load roulette state {}", path.display())
        })?),
        None => {
            tracing::warn!("no roulette state path configured; attempts reset on restart");
            Arc::new(InMemoryAttemptCounter::new())
        }
    };
    let member_directory: Arc<dyn MemberDirectory> = match serve.members_file.as_ref() {
        Some(path) => Arc::new(JsonFileMemberDirectory::new(path)),
        None => {
            tracing::warn!("no members file configured; group mentions match nobody");
            Arc::new(StaticMemberDirectory::new(Vec::new()))
        }
    };

    Ok(SlackBotRuntimeConfig {
        api_base: slack.api_base.clone(),
        app_token,
        bot_token,
        bot_user_id: serve.bot_user_id.clone(),
        request_timeout_ms: slack.request_timeout_ms,
        retry_max_attempts: slack.retry_max_attempts,
        retry_base_delay_ms: slack.retry_base_delay_ms,
        reconnect_delay: Duration::from_millis(serve.reconnect_delay_ms),
        max_event_age_seconds: serve.max_event_age_seconds,
        status_board_days: serve.status_board_days,
        status_board: build_status_board_config(status_board),
        announcement_channel: serve
            .announcement_channel
            .as_deref()
            .map(str::trim)
            .filter(|channel| !channel.is_empty())
            .map(str::to_string),
        attempt_counter,
        member_directory,
    })
}

async fn run_status_board_once(
    slack: &SlackConnectionFlags,
    status_board: &StatusBoardFlags,
    once: &StatusBoardOnceFlags,
) -> Result<String> {
    let bot_token = resolve_required_token(slack.bot_token.as_deref(), "--slack-bot-token")?;
    // Web API reads only; the Socket Mode token is never used here.
    let client = SlackApiClient::new(
        slack.api_base.clone(),
        String::new(),
        bot_token,
        slack.request_timeout_ms,
        slack.retry_max_attempts,
        slack.retry_base_delay_ms,
    )?;
    let engine = StatusBoardEngine::new(
        Arc::new(client.without_retries()),
        build_status_board_config(status_board),
    );

    let now_epoch_seconds = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let request = StatusBoardRequest {
        user_id: once.user_id.trim().to_string(),
        window: TimeWindow::trailing_days(now_epoch_seconds, once.days),
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });
    let result = engine.run(&request, cancel_rx).await;
    interrupt.abort();

    let report = result.context("status board run failed")?;
    for failure in &report.diagnostics.failures {
        tracing::warn!(?failure, "status board scope was skipped");
    }
    Ok(report.render())
}
