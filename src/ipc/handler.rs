//! Request dispatch for the backend process
//!
//! One listener thread accepts frontend connections and serves each request
//! against the shared [`UserStateManager`]. Accessors reply with JSON
//! containers (never null); persistence outcomes come back as booleans,
//! matching what the frontend surfaces to the user.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::constants::log_level;
use crate::ipc::{BackendServer, PluginRequest, PluginResponse, read_message, write_message};
use crate::state::{StateError, UserStateManager};

/// Spawn the IPC listener thread that serves frontend requests
pub fn spawn_ipc_listener(
    server: BackendServer,
    state: Arc<UserStateManager>,
    shutdown_tx: mpsc::Sender<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_ipc_loop(&server, &state, &shutdown_tx) {
            error!(error = ?e, "IPC listener thread crashed");
        }
    })
}

fn run_ipc_loop(
    server: &BackendServer,
    state: &Arc<UserStateManager>,
    shutdown_tx: &mpsc::Sender<()>,
) -> Result<()> {
    info!(socket = ?server.path(), "IPC listener started");

    loop {
        // Accept connection (blocks until the frontend connects)
        let mut stream = server.accept().context("Failed to accept IPC connection")?;
        info!("Frontend connected");

        loop {
            let request: PluginRequest = match read_message(&mut stream) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = ?e, "IPC connection closed");
                    break; // Back to accepting new connections
                }
            };

            if let PluginRequest::Shutdown = request {
                info!("Received shutdown request via IPC");
                write_message(&mut stream, &PluginResponse::Ack)?;
                shutdown_tx.send(()).ok();
                return Ok(());
            }

            let response = dispatch(state, request);
            write_message(&mut stream, &response)?;
        }

        info!("Frontend disconnected");
    }
}

fn dispatch(state: &UserStateManager, request: PluginRequest) -> PluginResponse {
    match request {
        PluginRequest::LogMessage { message, level } => {
            match level {
                log_level::INFO => info!("{message}"),
                log_level::WARN => warn!("{message}"),
                log_level::ERROR => error!("{message}"),
                other => warn!(level = other, "{message}"),
            }
            PluginResponse::Ack
        }

        PluginRequest::GetUsersDict => json_response(&state.users_dict()),
        PluginRequest::SetActiveUserId { user_id } => {
            bool_result(state.set_active_user(&user_id))
        }

        PluginRequest::GetTabs => json_response(&state.tabs()),
        PluginRequest::GetSharedTabs => json_response(&state.shared_tabs()),
        PluginRequest::GetTags => json_response(&state.tags()),
        PluginRequest::GetFriends => json_response(&state.friends()),
        PluginRequest::GetFriendsGames => json_response(&state.friends_games()),
        PluginRequest::GetTabProfiles => json_response(&state.tab_profiles()),

        PluginRequest::SetTabs { tabs } => void_result(state.set_tabs(tabs)),
        PluginRequest::SetTags { tags } => void_result(state.set_tags(tags)),
        PluginRequest::SetFriends { friends } => void_result(state.set_friends(friends)),
        PluginRequest::SetFriendsGames { friends_games } => {
            void_result(state.set_friends_games(friends_games))
        }
        PluginRequest::SetTabProfiles { tab_profiles } => {
            void_result(state.set_tab_profiles(tab_profiles))
        }

        PluginRequest::BackupSettings { dest_path } => {
            PluginResponse::Bool(state.backup(&dest_path))
        }
        PluginRequest::RestoreSettings { src_path } => {
            PluginResponse::Bool(state.restore(&src_path))
        }
        PluginRequest::BackupDefaultDir { name } => {
            PluginResponse::Bool(state.backup_to_default_dir(&name))
        }

        PluginRequest::MigrateLegacySettings => void_result(state.migrate_legacy()),
        PluginRequest::RemoveLegacySettings => void_result(state.remove_legacy_settings()),

        PluginRequest::GetUserDesktop => match dirs::home_dir() {
            Some(home) => PluginResponse::Text(home.join("Desktop").display().to_string()),
            None => PluginResponse::Error("Could not determine home directory".to_string()),
        },

        PluginRequest::Ping => PluginResponse::Pong,

        // Handled in the connection loop before dispatch
        PluginRequest::Shutdown => PluginResponse::Ack,
    }
}

fn json_response<T: Serialize>(value: &T) -> PluginResponse {
    match serde_json::to_value(value) {
        Ok(value) => PluginResponse::Json(value),
        Err(e) => {
            error!(error = %e, "Failed to serialize response payload");
            PluginResponse::Error(e.to_string())
        }
    }
}

fn void_result(result: Result<(), StateError>) -> PluginResponse {
    match result {
        Ok(()) => PluginResponse::Ack,
        Err(e) => {
            error!(error = %e, "Request failed");
            PluginResponse::Error(e.to_string())
        }
    }
}

fn bool_result(result: Result<bool, StateError>) -> PluginResponse {
    match result {
        Ok(flag) => PluginResponse::Bool(flag),
        Err(e) => {
            error!(error = %e, "Request failed");
            PluginResponse::Error(e.to_string())
        }
    }
}
