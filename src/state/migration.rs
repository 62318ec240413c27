//! Versioned migration of the settings document
//!
//! The document carries an integer `schemaVersion` key (absent = 0). The
//! runner applies every step above the stored version in order; each step
//! is idempotent and verified by a post-condition check before the version
//! is bumped, so a re-run never depends on key-absence alone.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::constants::{categories, keys};
use crate::settings::{SettingsStore, StoreError};
use crate::state::types::UserState;

/// Schema version written by a fully migrated document
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no active user to receive legacy single-user state")]
    NoActiveUser,
    #[error("post-condition failed for migration '{0}'")]
    PostCondition(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct Migration {
    to_version: u64,
    name: &'static str,
    apply: fn(&mut SettingsStore, Option<&str>) -> Result<(), MigrationError>,
    verify: fn(&SettingsStore) -> bool,
}

const MIGRATIONS: &[Migration] = &[Migration {
    to_version: 1,
    name: "multi-user",
    apply: migrate_multi_user,
    verify: verify_multi_user,
}];

/// Schema version currently stored in the document
pub fn schema_version(store: &SettingsStore) -> u64 {
    store
        .get(keys::SCHEMA_VERSION)
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Apply all pending migrations and stamp the new schema version.
///
/// Returns `true` when any step ran. `active_user` is only required when a
/// step actually has legacy state to rehome.
pub fn run_migrations(
    store: &mut SettingsStore,
    active_user: Option<&str>,
) -> Result<bool, MigrationError> {
    let from = schema_version(store);
    if from >= CURRENT_SCHEMA_VERSION {
        info!(version = from, "Settings schema already current");
        return Ok(false);
    }

    for migration in MIGRATIONS.iter().filter(|m| m.to_version > from) {
        info!(name = migration.name, to_version = migration.to_version, "Running migration");
        (migration.apply)(store, active_user)?;
        if !(migration.verify)(store) {
            return Err(MigrationError::PostCondition(migration.name));
        }
        store.set(keys::SCHEMA_VERSION, json!(migration.to_version));
    }

    store.commit()?;
    Ok(true)
}

/// v0 -> v1: wrap the legacy single-user `tabs`/`friends`/`friendsGames`
/// top-level keys into `usersDict[<active user>]`, upgrading each tab's
/// `includesHidden` boolean to a `categoriesToInclude` bitmask on the way.
fn migrate_multi_user(
    store: &mut SettingsStore,
    active_user: Option<&str>,
) -> Result<(), MigrationError> {
    let has_legacy = store.contains(keys::LEGACY_TABS)
        || store.contains(keys::LEGACY_FRIENDS)
        || store.contains(keys::LEGACY_FRIENDS_GAMES);
    if !has_legacy {
        return Ok(());
    }

    let user_id = active_user.ok_or(MigrationError::NoActiveUser)?;

    let mut legacy_tabs = store.get_or(keys::LEGACY_TABS, json!({}));
    if let Some(tabs) = legacy_tabs.as_object_mut() {
        for tab in tabs.values_mut() {
            upgrade_tab_categories(tab);
        }
    } else {
        warn!("Legacy 'tabs' key is not an object, discarding it");
        legacy_tabs = json!({});
    }

    let mut entry = UserState {
        tabs: serde_json::from_value(legacy_tabs).unwrap_or_default(),
        friends: serde_json::from_value(store.get_or(keys::LEGACY_FRIENDS, json!([])))
            .unwrap_or_default(),
        friends_games: serde_json::from_value(store.get_or(keys::LEGACY_FRIENDS_GAMES, json!({})))
            .unwrap_or_default(),
        ..UserState::default()
    };

    let mut users: crate::state::types::UsersDict =
        serde_json::from_value(store.get_or(keys::USERS_DICT, json!({}))).unwrap_or_default();
    if let Some(existing) = users.get(user_id) {
        // Migration is invoked for users with an empty entry; keep any tab
        // profiles that were created before the legacy data arrived.
        entry.tab_profiles = existing.tab_profiles.clone();
    }
    info!(user = %user_id, tabs = entry.tabs.len(), "Rehoming legacy single-user state");
    users.insert(user_id.to_string(), entry);

    store.set_json(keys::USERS_DICT, &users)?;

    // Persist the copied state before destroying the legacy keys
    store.commit()?;
    store.delete(keys::LEGACY_TABS)?;
    store.delete(keys::LEGACY_FRIENDS)?;
    store.delete(keys::LEGACY_FRIENDS_GAMES)?;
    Ok(())
}

fn verify_multi_user(store: &SettingsStore) -> bool {
    !store.contains(keys::LEGACY_TABS)
        && !store.contains(keys::LEGACY_FRIENDS)
        && !store.contains(keys::LEGACY_FRIENDS_GAMES)
}

/// Rewrite `includesHidden` into the fixed `categoriesToInclude` patterns.
/// Absent is treated as false; a tab that already carries a bitmask keeps it.
fn upgrade_tab_categories(tab: &mut Value) {
    let Some(obj) = tab.as_object_mut() else {
        return;
    };

    let includes_hidden = obj
        .remove("includesHidden")
        .as_ref()
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !obj.contains_key("categoriesToInclude") {
        let mask = if includes_hidden {
            categories::DEFAULT_AND_HIDDEN
        } else {
            categories::DEFAULT
        };
        obj.insert("categoriesToInclude".to_string(), json!(mask));
    }
}
