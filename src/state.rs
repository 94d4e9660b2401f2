//! Durable harvest progress state
//!
//! A single JSON record at a fixed relative path lets a killed or crashed run
//! pick up at the last known-good cursor instead of starting over. The store
//! is written after every emitted row; a resumed run re-fetches the page at
//! the last successful cursor and skips the repositories already recorded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{error, info, warn};

use crate::types::{PageCursor, RepositoryName};

/// Fixed relative path of the state record.
pub const STATE_FILE_NAME: &str = "last_known_state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarvestState {
    /// End cursor of the most recent page processed. Null before the first
    /// page and null again once the walk has drained.
    pub current_cursor: Option<PageCursor>,
    /// Cursor at which the last row was successfully emitted. Never points
    /// past `current_cursor`.
    pub last_successful_cursor: Option<PageCursor>,
    pub last_processed_repo: Option<RepositoryName>,
    pub last_updated: DateTime<Utc>,
    pub completed_successfully: bool,
    /// Ordered set of emitted repository names; uniqueness is guaranteed by a
    /// membership test on append.
    #[serde(default, deserialize_with = "lenient_repo_list")]
    pub processed_repos: Vec<RepositoryName>,
    /// Binds resumed runs to the report file of the interrupted run.
    pub output_file_name: Option<String>,
}

impl Default for HarvestState {
    fn default() -> Self {
        Self {
            current_cursor: None,
            last_successful_cursor: None,
            last_processed_repo: None,
            last_updated: Utc::now(),
            completed_successfully: false,
            processed_repos: Vec::new(),
            output_file_name: None,
        }
    }
}

/// Accepts a malformed `processed_repos` field by coercing it to empty, so a
/// damaged state file costs re-fetching instead of a failed start.
fn lenient_repo_list<'de, D>(deserializer: D) -> Result<Vec<RepositoryName>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(items) => {
            let mut repos = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::String(name) => repos.push(RepositoryName(name)),
                    other => warn!("Ignoring non-string entry in processed_repos: {}", other),
                }
            }
            Ok(repos)
        }
        other => {
            warn!(
                "processed_repos field is malformed ({}), treating it as empty",
                other
            );
            Ok(Vec::new())
        }
    }
}

/// Outcome of reading the state file at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedState {
    /// No usable prior state; start from the beginning.
    Fresh(HarvestState),
    /// Prior incomplete state and the caller asked to resume.
    Resumed(HarvestState),
    /// The previous run finished; starting again is a no-op until the state
    /// is cleared.
    AlreadyCompleted(HarvestState),
}

/// Optional fields applied to the state in one update-and-persist step.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub repo_name: Option<RepositoryName>,
    /// Outer `Some` means "overwrite the current cursor with this value",
    /// which may itself be null once the walk has drained.
    pub new_cursor: Option<Option<PageCursor>>,
    pub last_successful_cursor: Option<Option<PageCursor>>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_default_location() -> Self {
        Self::new(STATE_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state record, if any.
    ///
    /// A completed record always yields `AlreadyCompleted` regardless of the
    /// resume flag. A malformed record is logged and treated as absent.
    pub fn load(&self, resume_requested: bool) -> LoadedState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(io_error) if io_error.kind() == std::io::ErrorKind::NotFound => {
                return LoadedState::Fresh(HarvestState::default());
            }
            Err(io_error) => {
                error!(
                    "Failed to read state file {}: {}",
                    self.path.display(),
                    io_error
                );
                return LoadedState::Fresh(HarvestState::default());
            }
        };

        let state: HarvestState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(parse_error) => {
                error!(
                    "State file {} is malformed, starting fresh: {}",
                    self.path.display(),
                    parse_error
                );
                return LoadedState::Fresh(HarvestState::default());
            }
        };

        if state.completed_successfully {
            info!("Previous harvest completed successfully, nothing to resume");
            return LoadedState::AlreadyCompleted(state);
        }

        if resume_requested {
            info!(
                "Resuming: {} repositories already processed, last cursor {:?}",
                state.processed_repos.len(),
                state.last_successful_cursor
            );
            LoadedState::Resumed(state)
        } else {
            LoadedState::Fresh(HarvestState::default())
        }
    }

    /// Applies the update, refreshes `last_updated`, and persists the whole
    /// record. Persistence failures are logged but never fail the run; the
    /// in-memory state stays authoritative.
    pub fn update(&self, state: &mut HarvestState, update: StateUpdate) {
        if let Some(new_cursor) = update.new_cursor {
            if state.current_cursor != new_cursor {
                state.current_cursor = new_cursor;
            }
        }
        if let Some(cursor) = update.last_successful_cursor {
            state.last_successful_cursor = cursor;
        }
        if let Some(repo_name) = update.repo_name {
            if !state.processed_repos.contains(&repo_name) {
                state.processed_repos.push(repo_name.clone());
            }
            state.last_processed_repo = Some(repo_name);
        }
        state.last_updated = Utc::now();
        self.persist(state);
    }

    /// Persists the record, swallowing (but logging) any failure.
    pub fn persist(&self, state: &HarvestState) {
        if let Err(persist_error) = self.try_persist(state) {
            warn!(
                "Failed to persist harvest state to {}: {:#}",
                self.path.display(),
                persist_error
            );
        }
    }

    fn try_persist(&self, state: &HarvestState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Removes the state record, re-enabling a fresh harvest after a
    /// completed one.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(io_error) if io_error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(io_error) => Err(io_error)
                .with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::new(dir.join(STATE_FILE_NAME))
    }

    #[test]
    fn absent_file_loads_fresh() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        match store.load(true) {
            LoadedState::Fresh(state) => {
                assert!(state.processed_repos.is_empty());
                assert!(state.current_cursor.is_none());
                assert!(!state.completed_successfully);
            }
            other => panic!("expected Fresh, got {:?}", other),
        }
    }

    #[test]
    fn update_persist_and_resume_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut state = HarvestState::default();
        store.update(
            &mut state,
            StateUpdate {
                new_cursor: Some(Some(PageCursor::from("c1"))),
                ..Default::default()
            },
        );
        store.update(
            &mut state,
            StateUpdate {
                repo_name: Some(RepositoryName::from("alpha")),
                last_successful_cursor: Some(Some(PageCursor::from("c1"))),
                ..Default::default()
            },
        );

        match store.load(true) {
            LoadedState::Resumed(loaded) => {
                assert_eq!(loaded.current_cursor, Some(PageCursor::from("c1")));
                assert_eq!(loaded.last_successful_cursor, Some(PageCursor::from("c1")));
                assert_eq!(loaded.processed_repos, vec![RepositoryName::from("alpha")]);
                assert_eq!(
                    loaded.last_processed_repo,
                    Some(RepositoryName::from("alpha"))
                );
            }
            other => panic!("expected Resumed, got {:?}", other),
        }
    }

    #[test]
    fn resume_not_requested_ignores_incomplete_state() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut state = HarvestState::default();
        store.update(
            &mut state,
            StateUpdate {
                repo_name: Some(RepositoryName::from("alpha")),
                ..Default::default()
            },
        );

        assert!(matches!(store.load(false), LoadedState::Fresh(_)));
    }

    #[test]
    fn completed_state_loads_as_already_completed_even_without_resume() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut state = HarvestState {
            completed_successfully: true,
            ..Default::default()
        };
        store.update(&mut state, StateUpdate::default());

        assert!(matches!(
            store.load(false),
            LoadedState::AlreadyCompleted(_)
        ));
        assert!(matches!(store.load(true), LoadedState::AlreadyCompleted(_)));
    }

    #[test]
    fn clearing_a_completed_state_enables_a_fresh_start() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut state = HarvestState {
            completed_successfully: true,
            ..Default::default()
        };
        store.update(&mut state, StateUpdate::default());
        store.clear().unwrap();

        assert!(matches!(store.load(true), LoadedState::Fresh(_)));
    }

    #[test]
    fn malformed_file_is_treated_as_absent() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(store.load(true), LoadedState::Fresh(_)));
    }

    #[test]
    fn malformed_processed_repos_coerces_to_empty_but_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"{
                "current_cursor": "c9",
                "last_successful_cursor": "c9",
                "last_processed_repo": "omega",
                "last_updated": "2024-01-01T00:00:00Z",
                "completed_successfully": false,
                "processed_repos": "oops",
                "output_file_name": "acme-all_repos-202401010000_ts.csv"
            }"#,
        )
        .unwrap();

        match store.load(true) {
            LoadedState::Resumed(state) => {
                assert!(state.processed_repos.is_empty());
                assert_eq!(state.current_cursor, Some(PageCursor::from("c9")));
                assert_eq!(
                    state.output_file_name.as_deref(),
                    Some("acme-all_repos-202401010000_ts.csv")
                );
            }
            other => panic!("expected Resumed, got {:?}", other),
        }
    }

    #[test]
    fn non_string_entries_in_processed_repos_are_dropped() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        fs::write(
            store.path(),
            r#"{
                "current_cursor": null,
                "last_successful_cursor": null,
                "last_processed_repo": null,
                "last_updated": "2024-01-01T00:00:00Z",
                "completed_successfully": false,
                "processed_repos": ["alpha", 7, "beta"],
                "output_file_name": null
            }"#,
        )
        .unwrap();

        match store.load(true) {
            LoadedState::Resumed(state) => {
                assert_eq!(
                    state.processed_repos,
                    vec![RepositoryName::from("alpha"), RepositoryName::from("beta")]
                );
            }
            other => panic!("expected Resumed, got {:?}", other),
        }
    }

    #[test]
    fn repeated_repo_names_are_appended_once() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());

        let mut state = HarvestState::default();
        for _ in 0..3 {
            store.update(
                &mut state,
                StateUpdate {
                    repo_name: Some(RepositoryName::from("alpha")),
                    ..Default::default()
                },
            );
        }
        assert_eq!(state.processed_repos.len(), 1);
    }

    #[test]
    fn persistence_failure_does_not_panic_or_lose_memory_state() {
        let dir = tempdir().unwrap();
        // A directory at the state path makes the rename fail.
        let path = dir.path().join(STATE_FILE_NAME);
        fs::create_dir(&path).unwrap();
        let store = StateStore::new(&path);

        let mut state = HarvestState::default();
        store.update(
            &mut state,
            StateUpdate {
                repo_name: Some(RepositoryName::from("alpha")),
                ..Default::default()
            },
        );
        assert_eq!(state.processed_repos.len(), 1);
    }
}
