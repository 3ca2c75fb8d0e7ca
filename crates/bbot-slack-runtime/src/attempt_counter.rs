//! Per-user daily attempt counting for the roulette command.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::slack_helpers::current_unix_timestamp_ms;

const ATTEMPT_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum AttemptCounterError {
    #[error("failed to read attempt counter state {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse attempt counter state {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported attempt counter schema: expected {expected}, found {found}")]
    Schema { expected: u32, found: u32 },
    #[error("failed to persist attempt counter state {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("attempt counter lock is poisoned")]
    Poisoned,
}

/// Counts attempts per `(user, day)`; `day` is a calendar date key such as `2025-01-01`.
pub trait AttemptCounter: Send + Sync {
    /// Records one attempt and returns the new count for that user and day.
    fn increment(&self, user_id: &str, day: &str) -> Result<u32, AttemptCounterError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAttemptCounter {
    counts: Mutex<HashMap<(String, String), u32>>,
}

impl InMemoryAttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttemptCounter for InMemoryAttemptCounter {
    fn increment(&self, user_id: &str, day: &str) -> Result<u32, AttemptCounterError> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| AttemptCounterError::Poisoned)?;
        let count = counts
            .entry((user_id.to_string(), day.to_string()))
            .or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AttemptState {
    schema_version: u32,
    #[serde(default)]
    days: BTreeMap<String, BTreeMap<String, u32>>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            schema_version: ATTEMPT_STATE_SCHEMA_VERSION,
            days: BTreeMap::new(),
        }
    }
}

/// JSON-file backed counter so daily limits survive restarts. Only the most
/// recently touched day is retained.
#[derive(Debug)]
pub struct FileAttemptCounter {
    path: PathBuf,
    state: Mutex<AttemptState>,
}

impl FileAttemptCounter {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AttemptCounterError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| AttemptCounterError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<AttemptState>(&raw).map_err(|source| {
                AttemptCounterError::Parse {
                    path: path.clone(),
                    source,
                }
            })?
        } else {
            AttemptState::default()
        };
        if state.schema_version != ATTEMPT_STATE_SCHEMA_VERSION {
            return Err(AttemptCounterError::Schema {
                expected: ATTEMPT_STATE_SCHEMA_VERSION,
                found: state.schema_version,
            });
        }
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, state: &AttemptState) -> Result<(), AttemptCounterError> {
        let persist_error = |source| AttemptCounterError::Persist {
            path: self.path.clone(),
            source,
        };
        let mut payload = serde_json::to_string_pretty(state)
            .map_err(|error| persist_error(std::io::Error::other(error)))?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload).map_err(persist_error)
    }
}

impl AttemptCounter for FileAttemptCounter {
    fn increment(&self, user_id: &str, day: &str) -> Result<u32, AttemptCounterError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| AttemptCounterError::Poisoned)?;
        state.days.retain(|stored_day, _| stored_day == day);
        let count = state
            .days
            .entry(day.to_string())
            .or_default()
            .entry(user_id.to_string())
            .or_insert(0);
        *count = count.saturating_add(1);
        let count = *count;
        self.save(&state)?;
        Ok(count)
    }
}

/// Temp file + rename so a crash never leaves a half-written state file.
fn write_text_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if path.as_os_str().is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "destination path cannot be empty",
        ));
    }
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attempts"),
        std::process::id(),
        current_unix_timestamp_ms()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)
}
