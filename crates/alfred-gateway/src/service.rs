//! The multi-user service manager: per-user worker lifecycle.
//!
//! Starting a user brings up their messaging clients, starts the Gmail
//! poller when the scope is granted, and opens the reminder-scheduler
//! gate. Stopping does the inverse. Both are idempotent; every background
//! task is started here, never ad-hoc from a request handler.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use alfred_clients::ClientManager;
use alfred_core::types::{Source, UserId};
use alfred_engine::scheduler::RunGate;
use alfred_google::oauth::GMAIL_READONLY_SCOPE;
use alfred_ingest::GmailPoller;
use alfred_store::Store;

struct RunState {
    gmail_cancel: Option<CancellationToken>,
}

pub struct ServiceManager {
    store: Store,
    clients: Arc<ClientManager>,
    gmail: Arc<GmailPoller>,
    running: DashMap<String, RunState>,
}

impl ServiceManager {
    pub fn new(store: Store, clients: Arc<ClientManager>, gmail: Arc<GmailPoller>) -> Arc<Self> {
        Arc::new(Self {
            store,
            clients,
            gmail,
            running: DashMap::new(),
        })
    }

    /// Bring up the user's workers. Safe to call repeatedly.
    pub fn start_for_user(&self, user_id: &UserId) {
        if self.running.contains_key(user_id.as_str()) {
            return;
        }

        // Messaging clients for every paired source.
        for source in [Source::Whatsapp, Source::Telegram] {
            match self.store.get_messaging_session(user_id, source) {
                Ok(Some(_)) => {
                    if let Err(e) = self.clients.ensure_client(user_id, source) {
                        warn!(user = %user_id, source = %source, error = %e,
                            "client start failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(user = %user_id, error = %e, "messaging session read failed"),
            }
        }

        // Gmail poller only with a granted, valid scope.
        let gmail_cancel = match self.store.get_provider_token(user_id, "google") {
            Ok(Some(token)) if !token.invalid && token.has_scope(GMAIL_READONLY_SCOPE) => {
                Some(self.gmail.clone().spawn_for_user(user_id.clone()))
            }
            _ => None,
        };

        self.running
            .insert(user_id.as_str().to_string(), RunState { gmail_cancel });
        info!(user = %user_id, "user services started");
    }

    /// Tear the user's workers down, keeping persistent state intact.
    pub async fn stop_for_user(&self, user_id: &UserId) {
        let Some((_, state)) = self.running.remove(user_id.as_str()) else {
            return;
        };
        if let Some(cancel) = state.gmail_cancel {
            cancel.cancel();
        }
        for source in [Source::Whatsapp, Source::Telegram] {
            self.clients.stop_client(user_id, source).await;
        }
        info!(user = %user_id, "user services stopped");
    }

    /// Start workers for every user with a restorable state. Called once
    /// at boot after `ClientManager::restore_all`.
    pub fn start_restored_users(&self) {
        match self.store.connected_messaging_sessions() {
            Ok(sessions) => {
                for session in sessions {
                    self.start_for_user(&session.user_id);
                }
            }
            Err(e) => warn!(error = %e, "startup restore scan failed"),
        }
    }

    pub fn running_user_count(&self) -> usize {
        self.running.len()
    }
}

impl RunGate for ServiceManager {
    fn is_running(&self, user_id: &UserId) -> bool {
        self.running.contains_key(user_id.as_str())
    }
}
