//! Wire contract for frontend <-> backend communication
//!
//! Requests arrive as `{"method": "...", "args": {...}}`, one variant per
//! exposed method; `args` is omitted for nullary methods. Every response is
//! JSON-serializable and never null: containers come back as (possibly
//! empty) JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Requests sent from the frontend to the backend
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum PluginRequest {
    /// Forward a frontend log line (level 0 = info, 1 = warn, 2 = error)
    LogMessage { message: String, level: u8 },

    /// Whole user map, as stored on disk
    GetUsersDict,

    /// Select the active user; replies `Bool(true)` when the user is new
    SetActiveUserId { user_id: String },

    GetTabs,
    GetSharedTabs,
    GetTags,
    GetFriends,
    GetFriendsGames,
    GetTabProfiles,

    SetTabs { tabs: BTreeMap<String, Value> },
    SetTags { tags: Vec<Value> },
    SetFriends { friends: Vec<Value> },
    SetFriendsGames { friends_games: BTreeMap<String, Vec<u64>> },
    SetTabProfiles { tab_profiles: BTreeMap<String, Vec<String>> },

    /// Export the settings document to an arbitrary path
    BackupSettings { dest_path: PathBuf },

    /// Replace the settings document from a file; suspends saving
    RestoreSettings { src_path: PathBuf },

    /// Write a named backup scope next to the live settings file
    BackupDefaultDir { name: String },

    /// Run pending schema migrations
    MigrateLegacySettings,

    /// Delete any leftover legacy single-user keys
    RemoveLegacySettings,

    /// Starting directory for the frontend's backup file picker
    GetUserDesktop,

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the backend to the frontend
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub enum PluginResponse {
    /// Acknowledgment for void methods
    Ack,

    /// Boolean outcome (new-user flag, backup/restore success)
    Bool(bool),

    /// Container payload for the accessor methods
    Json(Value),

    /// Plain text payload (`get_user_desktop`)
    Text(String),

    /// Health check response
    Pong,

    /// Request failed; the message is shown to the user
    Error(String),
}
