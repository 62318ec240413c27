//! Application-wide constants
//!
//! This module contains the string literals and magic numbers shared across
//! the backend, providing a single source of truth for constant values.

/// Settings persistence constants
pub mod settings {
    /// Directory name under the platform config dir holding all settings scopes
    pub const APP_DIR: &str = "tab-master";

    /// Default settings scope (maps to `<dir>/tab-master.json`)
    pub const DEFAULT_SCOPE: &str = "tab-master";

    /// File extension for settings scope files
    pub const FILE_EXT: &str = "json";
}

/// On-disk document keys
pub mod keys {
    /// Multi-user state: map of user id -> per-user record
    pub const USERS_DICT: &str = "usersDict";

    /// Store tags, shared across all users
    pub const TAGS: &str = "tags";

    /// Integer schema version stamped by the migration runner (absent = 0)
    pub const SCHEMA_VERSION: &str = "schemaVersion";

    /// Legacy single-user keys, removed by the multi-user migration
    pub const LEGACY_TABS: &str = "tabs";
    pub const LEGACY_FRIENDS: &str = "friends";
    pub const LEGACY_FRIENDS_GAMES: &str = "friendsGames";
}

/// Tab category bitmask values (`categoriesToInclude`)
///
/// The bit layout is owned by the frontend; the backend only writes these
/// two fixed patterns when upgrading a legacy `includesHidden` boolean.
pub mod categories {
    /// Default library categories only
    pub const DEFAULT: u64 = 1;

    /// Hidden-games bit
    pub const HIDDEN: u64 = 16;

    /// Bitmask written for a legacy tab that included hidden games
    pub const DEFAULT_AND_HIDDEN: u64 = DEFAULT | HIDDEN;
}

/// Frontend log levels accepted by `log_message`
pub mod log_level {
    pub const INFO: u8 = 0;
    pub const WARN: u8 = 1;
    pub const ERROR: u8 = 2;
}
