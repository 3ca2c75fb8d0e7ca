//! Group-mention targeting: a member directory boundary plus one composed predicate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const WILDCARD: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Any,
    Only(String),
}

impl Selector {
    /// `all` (any case) is the wildcard; everything else is an exact, case-insensitive match.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() || value.eq_ignore_ascii_case(WILDCARD) {
            Self::Any
        } else {
            Self::Only(value.to_ascii_lowercase())
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(expected) => value.trim().eq_ignore_ascii_case(expected),
        }
    }

    fn label(&self, suffix: &str) -> Option<String> {
        match self {
            Self::Any => None,
            Self::Only(value) => Some(format!("{value}{suffix}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub name: String,
    pub slack_id: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub member_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberQuery {
    pub track: Selector,
    pub team: Selector,
    pub member_type: Selector,
}

impl MemberQuery {
    pub fn everyone() -> Self {
        Self {
            track: Selector::Any,
            team: Selector::Any,
            member_type: Selector::Any,
        }
    }

    pub fn describe(&self) -> String {
        let parts = [
            self.team.label(" team"),
            self.track.label(" track"),
            self.member_type.label(""),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();
        if parts.is_empty() {
            "everyone".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Conjunction of the three selectors.
pub fn build_member_filter(query: &MemberQuery) -> impl Fn(&Member) -> bool + '_ {
    move |member| {
        query.track.accepts(&member.track)
            && query.team.accepts(&member.team)
            && query.member_type.accepts(&member.member_type)
    }
}

pub fn select_mentions(members: &[Member], query: &MemberQuery) -> Vec<String> {
    let filter = build_member_filter(query);
    members
        .iter()
        .filter(|member| !member.slack_id.trim().is_empty())
        .filter(|member| filter(member))
        .map(|member| format!("<@{}>", member.slack_id.trim()))
        .collect()
}

pub fn render_group_mention(requesting_user_id: &str, query: &MemberQuery, mentions: &[String]) -> String {
    if mentions.is_empty() {
        return "No matching members.".to_string();
    }
    format!(
        "<@{requesting_user_id}> group mention for {}!\n{}\nPlease take a look :dancing_toad:",
        query.describe(),
        mentions.join(", ")
    )
}

/// Source of active members with a linked Slack id.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn active_members(&self) -> Result<Vec<Member>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticMemberDirectory {
    members: Vec<Member>,
}

impl StaticMemberDirectory {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl MemberDirectory for StaticMemberDirectory {
    async fn active_members(&self) -> Result<Vec<Member>> {
        Ok(self.members.clone())
    }
}

/// Reads a JSON array of members on every lookup so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileMemberDirectory {
    path: PathBuf,
}

impl JsonFileMemberDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MemberDirectory for JsonFileMemberDirectory {
    async fn active_members(&self) -> Result<Vec<Member>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read member directory {}", self.path.display()))?;
        serde_json::from_str::<Vec<Member>>(&raw)
            .with_context(|| format!("failed to parse member directory {}", self.path.display()))
    }
}
