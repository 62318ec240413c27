//! On-disk document shapes for the multi-user schema
//!
//! Tab bodies, tag records, and friend records are opaque to the backend:
//! they are stored and returned verbatim as JSON values. The only fields
//! this layer ever inspects are `visibleToOthers` (shared-tabs scan) and
//! `includesHidden` / `categoriesToInclude` (legacy migration).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Map of user id -> per-user state record (`usersDict` on disk)
pub type UsersDict = BTreeMap<String, UserState>;

/// Per-user state record
///
/// Every entry has `tabs`/`friends`/`friendsGames` (possibly empty) once
/// initialized; `tabProfiles` is optional and omitted from the document
/// while empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub tabs: BTreeMap<String, Value>,

    #[serde(default)]
    pub friends: Vec<Value>,

    #[serde(rename = "friendsGames", default)]
    pub friends_games: BTreeMap<String, Vec<u64>>,

    #[serde(
        rename = "tabProfiles",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub tab_profiles: BTreeMap<String, Vec<String>>,
}

/// Tab field consulted by the shared-tabs scan
pub const TAB_VISIBLE_TO_OTHERS: &str = "visibleToOthers";

/// Whether a tab value is flagged as visible to other users
pub fn tab_is_shared(tab: &Value) -> bool {
    tab.get(TAB_VISIBLE_TO_OTHERS)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_state_round_trips_with_camel_case_keys() {
        let mut state = UserState::default();
        state.tabs.insert("t1".into(), json!({"title": "RPGs"}));
        state.friends_games.insert("76561".into(), vec![440, 570]);
        state
            .tab_profiles
            .insert("couch".into(), vec!["t1".into()]);

        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("friendsGames").is_some());
        assert!(value.get("tabProfiles").is_some());

        let back: UserState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let state: UserState = serde_json::from_value(json!({})).unwrap();
        assert!(state.tabs.is_empty());
        assert!(state.friends.is_empty());
        assert!(state.friends_games.is_empty());
        assert!(state.tab_profiles.is_empty());
    }

    #[test]
    fn test_empty_tab_profiles_omitted_from_document() {
        let value = serde_json::to_value(UserState::default()).unwrap();
        assert!(value.get("tabProfiles").is_none());
    }

    #[test]
    fn test_tab_is_shared_defaults_to_false() {
        assert!(tab_is_shared(&json!({"visibleToOthers": true})));
        assert!(!tab_is_shared(&json!({"visibleToOthers": false})));
        assert!(!tab_is_shared(&json!({"title": "no flag"})));
        assert!(!tab_is_shared(&json!({"visibleToOthers": "yes"})));
    }
}
