//! Domain-shaped view of the settings document
//!
//! One logical record per user, keyed by the host-selected active user, plus
//! the process-wide tags list. IPC connections are served by real threads,
//! so all shared state lives behind a single mutex; first-load readiness is
//! a condition variable every accessor waits on instead of polling.

pub mod migration;
pub mod types;

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::constants::keys;
use crate::settings::{SettingsStore, StoreError};
use migration::MigrationError;
use types::{UserState, UsersDict, tab_is_shared};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no active user has been set")]
    NoActiveUser,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

struct StateInner {
    store: SettingsStore,
    /// `None` until the first `load()` completes
    users: Option<UsersDict>,
    /// `None` until the first `load()` completes; shared across all users
    tags: Option<Vec<Value>>,
    active_user: Option<String>,
    /// Cleared by a restore so stale in-memory state cannot clobber the
    /// imported document; only a process restart re-enables saving.
    save_on_shutdown: bool,
}

/// Multi-user state built on top of a [`SettingsStore`]
pub struct UserStateManager {
    inner: Mutex<StateInner>,
    loaded: Condvar,
}

impl UserStateManager {
    pub fn new(store: SettingsStore) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                store,
                users: None,
                tags: None,
                active_user: None,
                save_on_shutdown: true,
            }),
            loaded: Condvar::new(),
        }
    }

    /// Read the backing file and populate the in-memory user map and tags,
    /// then release every accessor blocked on readiness.
    ///
    /// Persistence failures are logged and degrade to an empty document;
    /// readiness is signalled regardless so callers never hang on a bad file.
    pub fn load(&self) {
        let mut inner = self.inner.lock().unwrap();

        if let Err(e) = inner.store.load() {
            error!(error = %e, "Failed to load settings, starting from an empty document");
        }

        let users = serde_json::from_value::<UsersDict>(inner.store.get_or(keys::USERS_DICT, json!({})))
            .unwrap_or_else(|e| {
                warn!(error = %e, "Malformed usersDict in settings, resetting");
                UsersDict::default()
            });
        let tags = match inner.store.get_or(keys::TAGS, json!([])) {
            Value::Array(tags) => tags,
            other => {
                warn!(value = %other, "Malformed tags in settings, resetting");
                Vec::new()
            }
        };

        info!(users = users.len(), tags = tags.len(), "Loaded user state");
        inner.users = Some(users);
        inner.tags = Some(tags);
        drop(inner);
        self.loaded.notify_all();
    }

    /// Block until `load()` has completed, then hand back the guarded state
    fn ready(&self) -> MutexGuard<'_, StateInner> {
        let guard = self.inner.lock().unwrap();
        self.loaded
            .wait_while(guard, |state| state.users.is_none())
            .unwrap()
    }

    /// Re-serialize the user map and tags into the store and commit
    fn flush(inner: &mut StateInner) -> Result<(), StoreError> {
        if let Some(users) = inner.users.take() {
            let result = inner.store.set_json(keys::USERS_DICT, &users);
            inner.users = Some(users);
            result?;
        }
        if let Some(tags) = &inner.tags {
            inner.store.set(keys::TAGS, Value::Array(tags.clone()));
        }
        inner.store.commit()
    }

    /// Mutable handle to the active user's record, created on demand
    fn active_entry<'g>(inner: &'g mut StateInner) -> Result<&'g mut UserState, StateError> {
        let user = inner.active_user.clone().ok_or(StateError::NoActiveUser)?;
        let users = inner.users.get_or_insert_with(UsersDict::default);
        Ok(users.entry(user).or_default())
    }

    /// Select the user all unqualified accessors operate on. Creates an
    /// empty record on first sight and persists it; returns whether the
    /// user was new (the frontend branches on this for first-time setup
    /// versus legacy migration).
    pub fn set_active_user(&self, user_id: &str) -> Result<bool, StateError> {
        let mut inner = self.ready();
        inner.active_user = Some(user_id.to_string());

        let users = inner.users.get_or_insert_with(UsersDict::default);
        if users.contains_key(user_id) {
            info!(user = %user_id, "Active user selected");
            return Ok(false);
        }

        users.insert(user_id.to_string(), UserState::default());
        info!(user = %user_id, "Created state for new user");
        // A restore in this session means the in-memory map is stale; keep
        // the new entry in memory only and leave the imported file alone.
        if inner.save_on_shutdown {
            Self::flush(&mut inner)?;
        }
        Ok(true)
    }

    /// The whole user map, as stored on disk
    pub fn users_dict(&self) -> UsersDict {
        self.ready().users.clone().unwrap_or_default()
    }

    pub fn tabs(&self) -> BTreeMap<String, Value> {
        let inner = self.ready();
        Self::active_record(&inner)
            .map(|u| u.tabs.clone())
            .unwrap_or_default()
    }

    pub fn friends(&self) -> Vec<Value> {
        let inner = self.ready();
        Self::active_record(&inner)
            .map(|u| u.friends.clone())
            .unwrap_or_default()
    }

    pub fn friends_games(&self) -> BTreeMap<String, Vec<u64>> {
        let inner = self.ready();
        Self::active_record(&inner)
            .map(|u| u.friends_games.clone())
            .unwrap_or_default()
    }

    pub fn tab_profiles(&self) -> BTreeMap<String, Vec<String>> {
        let inner = self.ready();
        Self::active_record(&inner)
            .map(|u| u.tab_profiles.clone())
            .unwrap_or_default()
    }

    /// The process-wide tags list
    pub fn tags(&self) -> Vec<Value> {
        self.ready().tags.clone().unwrap_or_default()
    }

    /// Tabs other users flagged `visibleToOthers`, keyed by their user id.
    ///
    /// Linear scan over every other user and all their tabs; fine at this
    /// scale (tens of users, tens of tabs each).
    pub fn shared_tabs(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        let inner = self.ready();
        let active = inner.active_user.as_deref();

        let mut shared = BTreeMap::new();
        for (user_id, state) in inner.users.as_ref().into_iter().flatten() {
            if Some(user_id.as_str()) == active {
                continue;
            }
            let visible: BTreeMap<String, Value> = state
                .tabs
                .iter()
                .filter(|(_, tab)| tab_is_shared(tab))
                .map(|(id, tab)| (id.clone(), tab.clone()))
                .collect();
            if !visible.is_empty() {
                shared.insert(user_id.clone(), visible);
            }
        }
        shared
    }

    fn active_record<'g>(inner: &'g StateInner) -> Option<&'g UserState> {
        let user = inner.active_user.as_deref()?;
        inner.users.as_ref()?.get(user)
    }

    /// True while mutators are applied and the shutdown flush will run
    pub fn save_enabled(&self) -> bool {
        self.inner.lock().unwrap().save_on_shutdown
    }

    /// Run a mutation gated on the save flag, then persist.
    /// Discarded with a warning while a restore has suspended saving.
    fn mutate(
        &self,
        what: &'static str,
        op: impl FnOnce(&mut StateInner) -> Result<(), StateError>,
    ) -> Result<(), StateError> {
        let mut inner = self.ready();
        if !inner.save_on_shutdown {
            warn!(what, "Discarding update, saving is suspended until restart");
            return Ok(());
        }
        op(&mut inner)?;
        Self::flush(&mut inner)?;
        Ok(())
    }

    pub fn set_tabs(&self, tabs: BTreeMap<String, Value>) -> Result<(), StateError> {
        self.mutate("tabs", |inner| {
            Self::active_entry(inner)?.tabs = tabs;
            Ok(())
        })
    }

    pub fn set_friends(&self, friends: Vec<Value>) -> Result<(), StateError> {
        self.mutate("friends", |inner| {
            Self::active_entry(inner)?.friends = friends;
            Ok(())
        })
    }

    pub fn set_friends_games(
        &self,
        friends_games: BTreeMap<String, Vec<u64>>,
    ) -> Result<(), StateError> {
        self.mutate("friendsGames", |inner| {
            Self::active_entry(inner)?.friends_games = friends_games;
            Ok(())
        })
    }

    pub fn set_tab_profiles(
        &self,
        tab_profiles: BTreeMap<String, Vec<String>>,
    ) -> Result<(), StateError> {
        self.mutate("tabProfiles", |inner| {
            Self::active_entry(inner)?.tab_profiles = tab_profiles;
            Ok(())
        })
    }

    pub fn set_tags(&self, tags: Vec<Value>) -> Result<(), StateError> {
        self.mutate("tags", |inner| {
            inner.tags = Some(tags);
            Ok(())
        })
    }

    /// Export the current document to `dest`. Boolean outcome only; the
    /// frontend surfaces this directly as a backup result.
    pub fn backup(&self, dest: &Path) -> bool {
        let inner = self.ready();
        match inner.store.export_to(dest) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Backup failed");
                false
            }
        }
    }

    /// Write the document to a second scope in the default settings dir
    pub fn backup_to_default_dir(&self, name: &str) -> bool {
        let inner = self.ready();
        match inner.store.clone_to(name) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Backup to default dir failed");
                false
            }
        }
    }

    /// Replace the document with the file at `src` and suspend saving so
    /// the imported state cannot be overwritten before the next restart.
    /// In-memory domain state is intentionally left stale; the frontend
    /// prompts for a restart after a restore.
    pub fn restore(&self, src: &Path) -> bool {
        let mut inner = self.ready();
        match inner.store.import_from(src) {
            Ok(()) => {
                inner.save_on_shutdown = false;
                info!("Settings restored, saving suspended until restart");
                true
            }
            Err(e) => {
                error!(error = %e, "Restore failed");
                false
            }
        }
    }

    /// Run pending schema migrations and refresh the in-memory state from
    /// the migrated document.
    pub fn migrate_legacy(&self) -> Result<(), StateError> {
        let mut inner = self.ready();
        let active = inner.active_user.clone();
        let ran = migration::run_migrations(&mut inner.store, active.as_deref())?;
        if ran {
            let users = serde_json::from_value::<UsersDict>(
                inner.store.get_or(keys::USERS_DICT, json!({})),
            )
            .unwrap_or_default();
            inner.users = Some(users);
        }
        Ok(())
    }

    /// Delete any legacy single-user keys still present in the document
    pub fn remove_legacy_settings(&self) -> Result<(), StateError> {
        let mut inner = self.ready();
        inner.store.delete(keys::LEGACY_TABS)?;
        inner.store.delete(keys::LEGACY_FRIENDS)?;
        inner.store.delete(keys::LEGACY_FRIENDS_GAMES)?;
        Ok(())
    }

    /// Final flush on process exit, skipped while saving is suspended
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.save_on_shutdown {
            info!("Saving suspended, skipping shutdown flush");
            return;
        }
        if inner.users.is_none() {
            // Never loaded, nothing worth writing
            return;
        }
        if let Err(e) = Self::flush(&mut inner) {
            error!(error = %e, "Failed to flush state on shutdown");
        } else {
            info!("Flushed state on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> UserStateManager {
        let manager = UserStateManager::new(SettingsStore::new(dir.path(), "tab-master"));
        manager.load();
        manager
    }

    fn tab(title: &str, visible: bool) -> Value {
        json!({"title": title, "visibleToOthers": visible})
    }

    #[test]
    fn test_set_active_user_creates_empty_record_once() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);

        assert!(m.set_active_user("alice").unwrap());
        assert!(!m.set_active_user("alice").unwrap());

        let users = m.users_dict();
        let record = users.get("alice").unwrap();
        assert!(record.tabs.is_empty());
        assert!(record.friends.is_empty());
        assert!(record.friends_games.is_empty());
    }

    #[test]
    fn test_accessors_default_to_empty_containers() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        m.set_active_user("alice").unwrap();

        assert!(m.tabs().is_empty());
        assert!(m.friends().is_empty());
        assert!(m.friends_games().is_empty());
        assert!(m.tab_profiles().is_empty());
        assert!(m.tags().is_empty());
        assert!(m.shared_tabs().is_empty());
    }

    #[test]
    fn test_mutations_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let m = manager(&dir);
            m.set_active_user("alice").unwrap();
            m.set_tabs(BTreeMap::from([("t1".to_string(), tab("RPGs", false))]))
                .unwrap();
            m.set_tags(vec![json!({"tag": 9, "string": "Roguelike"})])
                .unwrap();
        }

        let m = manager(&dir);
        m.set_active_user("alice").unwrap();
        assert_eq!(m.tabs().get("t1").unwrap()["title"], json!("RPGs"));
        assert_eq!(m.tags().len(), 1);
    }

    #[test]
    fn test_shared_tabs_only_from_other_users_marked_visible() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);

        m.set_active_user("b").unwrap();
        m.set_tabs(BTreeMap::from([("tb".to_string(), tab("B shares", true))]))
            .unwrap();
        m.set_active_user("c").unwrap();
        m.set_tabs(BTreeMap::from([("tc".to_string(), tab("C hides", false))]))
            .unwrap();
        m.set_active_user("a").unwrap();
        m.set_tabs(BTreeMap::from([("ta".to_string(), tab("A shares", true))]))
            .unwrap();

        let shared = m.shared_tabs();
        assert_eq!(shared.len(), 1);
        let from_b = shared.get("b").unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b.get("tb").unwrap()["title"], json!("B shares"));
    }

    #[test]
    fn test_mutators_only_touch_their_own_user() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);

        m.set_active_user("alice").unwrap();
        m.set_tabs(BTreeMap::from([("ta".to_string(), tab("alice tab", false))]))
            .unwrap();
        m.set_active_user("bob").unwrap();
        m.set_tabs(BTreeMap::from([("tb".to_string(), tab("bob tab", false))]))
            .unwrap();

        let users = m.users_dict();
        assert!(users.get("alice").unwrap().tabs.contains_key("ta"));
        assert!(!users.get("alice").unwrap().tabs.contains_key("tb"));
        assert!(users.get("bob").unwrap().tabs.contains_key("tb"));
        assert!(!users.get("bob").unwrap().tabs.contains_key("ta"));
    }

    #[test]
    fn test_mutator_without_active_user_is_an_error() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let err = m.set_tabs(BTreeMap::new()).unwrap_err();
        assert!(matches!(err, StateError::NoActiveUser));
    }

    #[test]
    fn test_restore_suspends_saves_until_restart() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("backup.json");
        std::fs::write(
            &backup,
            serde_json::to_string(&json!({
                "usersDict": {"alice": {"tabs": {"restored": {"title": "Restored"}}}},
                "tags": []
            }))
            .unwrap(),
        )
        .unwrap();

        let m = manager(&dir);
        m.set_active_user("alice").unwrap();
        assert!(m.restore(&backup));
        assert!(!m.save_enabled());

        // A racing mutator right after the restore must be discarded
        m.set_tabs(BTreeMap::from([("clobber".to_string(), tab("x", false))]))
            .unwrap();
        m.shutdown();

        let reopened = manager(&dir);
        reopened.set_active_user("alice").unwrap();
        let tabs = reopened.tabs();
        assert!(tabs.contains_key("restored"));
        assert!(!tabs.contains_key("clobber"));
    }

    #[test]
    fn test_restore_missing_file_reports_failure_and_keeps_saving() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        assert!(!m.restore(&dir.path().join("missing.json")));
        assert!(m.save_enabled());
    }

    #[test]
    fn test_backup_and_default_dir_clone() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        m.set_active_user("alice").unwrap();

        let dest = dir.path().join("out.json");
        assert!(m.backup(&dest));
        assert!(dest.exists());
        assert!(m.backup_to_default_dir("tab-master_backup"));
        assert!(dir.path().join("tab-master_backup.json").exists());
    }

    #[test]
    fn test_accessors_block_until_load_completes() {
        let dir = TempDir::new().unwrap();
        let m = Arc::new(UserStateManager::new(SettingsStore::new(
            dir.path(),
            "tab-master",
        )));

        let reader = {
            let m = Arc::clone(&m);
            std::thread::spawn(move || m.tags())
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_finished());
        m.load();
        assert!(reader.join().unwrap().is_empty());
    }

    #[test]
    fn test_migrate_legacy_refreshes_in_memory_state() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = SettingsStore::new(dir.path(), "tab-master");
            store.load().unwrap();
            store.set(
                keys::LEGACY_TABS,
                json!({"old": {"title": "Old", "includesHidden": true}}),
            );
            store.set(keys::LEGACY_FRIENDS, json!([]));
            store.set(keys::LEGACY_FRIENDS_GAMES, json!({}));
            store.commit().unwrap();
        }

        let m = manager(&dir);
        m.set_active_user("alice").unwrap();
        m.migrate_legacy().unwrap();

        let tabs = m.tabs();
        assert_eq!(tabs.get("old").unwrap()["categoriesToInclude"], json!(17));
        assert!(tabs.get("old").unwrap().get("includesHidden").is_none());
    }

    #[test]
    fn test_shutdown_flushes_when_saving_enabled() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        m.set_active_user("alice").unwrap();
        m.set_tags(vec![json!({"tag": 1, "string": "Action"})]).unwrap();
        m.shutdown();

        let reopened = manager(&dir);
        assert_eq!(reopened.tags().len(), 1);
    }
}
