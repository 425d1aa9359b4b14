//! The per-user client manager.
//!
//! A client for (user, source) exists at most once; `ensure_client` is
//! the only constructor and is safe under concurrent callers. The map
//! lock is held only for map mutation — connects, disconnects, and bridge
//! calls all happen outside it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{error, info, warn};

use alfred_core::config::BridgesConfig;
use alfred_core::types::{ContactRefresher, Source, UserId};
use alfred_store::Store;

use crate::bridge::{BridgeTransport, HttpBridge};
use crate::client::IngestionClient;
use crate::error::{ClientError, Result};
use crate::session_store::SessionStore;
use crate::sink::SourceEventSink;

type ClientKey = (String, Source);

pub struct ClientManager {
    clients: RwLock<HashMap<ClientKey, Arc<IngestionClient>>>,
    bridges: BridgesConfig,
    sessions: Arc<SessionStore>,
    sink: Arc<dyn SourceEventSink>,
    store: Store,
}

impl ClientManager {
    pub fn new(
        bridges: BridgesConfig,
        sessions: SessionStore,
        sink: Arc<dyn SourceEventSink>,
        store: Store,
    ) -> Self {
        sessions.cleanup_legacy_shared_files();
        Self {
            clients: RwLock::new(HashMap::new()),
            bridges,
            sessions: Arc::new(sessions),
            sink,
            store,
        }
    }

    /// Idempotently bring up the client for (user, source).
    pub fn ensure_client(&self, user_id: &UserId, source: Source) -> Result<()> {
        let key = (user_id.as_str().to_string(), source);
        if self.clients.read().unwrap().contains_key(&key) {
            return Ok(());
        }

        let transport: Arc<dyn BridgeTransport> =
            Arc::new(HttpBridge::new(self.bridge_base(source), user_id.as_str()));

        let mut clients = self.clients.write().unwrap();
        // A racing caller may have won while we built the transport.
        if clients.contains_key(&key) {
            return Ok(());
        }
        let client = IngestionClient::spawn(
            user_id.clone(),
            source,
            transport,
            self.sessions.clone(),
            self.sink.clone(),
        );
        clients.insert(key, Arc::new(client));
        info!(user = %user_id, source = %source, "ingestion client started");
        Ok(())
    }

    /// Request a pairing code through the user's client.
    pub async fn pair(&self, user_id: &UserId, source: Source, phone_number: &str) -> Result<String> {
        self.ensure_client(user_id, source)?;
        self.store
            .upsert_messaging_session(user_id, source, Some(phone_number))?;
        let client = self
            .get(user_id, source)
            .ok_or(ClientError::NotConnected)?;
        client.transport.pair(phone_number).await
    }

    /// Stop the in-memory client without touching the sidecar blob or the
    /// messaging-session row — the service-manager "stop" path. A later
    /// start resumes from the persisted session.
    pub async fn stop_client(&self, user_id: &UserId, source: Source) {
        let key = (user_id.as_str().to_string(), source);
        let client = self.clients.write().unwrap().remove(&key);
        if let Some(client) = client {
            client.stop();
            if let Err(e) = client.transport.disconnect().await {
                warn!(user = %user_id, source = %source, error = %e,
                    "bridge disconnect failed during stop");
            }
            info!(user = %user_id, source = %source, "ingestion client stopped");
        }
    }

    /// Disconnect the session, delete the sidecar blob, drop the client.
    /// Messages already on the bus drain normally.
    pub async fn logout_client(&self, user_id: &UserId, source: Source) -> Result<()> {
        self.stop_client(user_id, source).await;
        self.sessions.delete(source, user_id)?;
        self.store.delete_messaging_session(user_id, source)?;
        info!(user = %user_id, source = %source, "client logged out");
        Ok(())
    }

    /// Reset: tear down every source the user has.
    pub async fn reset_user(&self, user_id: &UserId) -> Result<()> {
        for source in [Source::Whatsapp, Source::Telegram] {
            self.logout_client(user_id, source).await?;
        }
        Ok(())
    }

    /// Re-instantiate clients for all sessions flagged connected.
    /// Per-user failures are isolated and logged, never fatal.
    pub fn restore_all(&self) {
        let sessions = match self.store.connected_messaging_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "restore_all: could not read messaging sessions");
                return;
            }
        };
        info!(count = sessions.len(), "restoring ingestion clients");
        for session in sessions {
            if let Err(e) = self.ensure_client(&session.user_id, session.source) {
                error!(user = %session.user_id, source = %session.source, error = %e,
                    "failed to restore client");
            }
        }
    }

    /// Stop every client without touching persistent state.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<IngestionClient>> =
            self.clients.write().unwrap().drain().map(|(_, c)| c).collect();
        for client in clients {
            client.stop();
            if let Err(e) = client.transport.disconnect().await {
                warn!(user = %client.user_id, source = %client.source, error = %e,
                    "bridge disconnect failed during shutdown");
            }
        }
        info!("client manager shut down");
    }

    pub fn is_running(&self, user_id: &UserId, source: Source) -> bool {
        self.clients
            .read()
            .unwrap()
            .contains_key(&(user_id.as_str().to_string(), source))
    }

    pub fn live_client_count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    fn get(&self, user_id: &UserId, source: Source) -> Option<Arc<IngestionClient>> {
        self.clients
            .read()
            .unwrap()
            .get(&(user_id.as_str().to_string(), source))
            .cloned()
    }

    fn bridge_base(&self, source: Source) -> &str {
        match source {
            Source::Whatsapp => &self.bridges.whatsapp_base_url,
            Source::Telegram => &self.bridges.telegram_base_url,
            // Gmail has no bridge; the poller lives in the ingest crate.
            Source::Gmail => &self.bridges.whatsapp_base_url,
        }
    }
}

#[async_trait]
impl ContactRefresher for ClientManager {
    async fn refresh_contacts(&self, user_id: &UserId, source: Source) {
        let Some(client) = self.get(user_id, source) else {
            return;
        };
        match client.transport.contacts().await {
            Ok(contacts) => {
                self.sink
                    .handle_contacts(user_id, source, contacts)
                    .await;
            }
            Err(e) => warn!(user = %user_id, source = %source, error = %e,
                "contact refresh failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeContact, BridgeConversation, BridgeEvent, BridgeMessage, BridgeStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    #[async_trait]
    impl SourceEventSink for NullSink {
        async fn handle_message(&self, _: &UserId, _: Source, _: BridgeMessage) {}
        async fn handle_history(&self, _: &UserId, _: Source, _: Vec<BridgeConversation>) {}
        async fn handle_connected(&self, _: &UserId, _: Source, _: Option<String>) {}
        async fn handle_disconnected(&self, _: &UserId, _: Source) {}
        async fn handle_pairing_code(&self, _: &UserId, _: Source, _: String) {}
        async fn handle_contacts(&self, _: &UserId, _: Source, _: Vec<BridgeContact>) {}
    }

    #[allow(dead_code)]
    struct CountingBridge {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl BridgeTransport for CountingBridge {
        async fn connect(&self, _: Option<Vec<u8>>) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn pair(&self, _: &str) -> Result<String> {
            Ok("CODE-1234".into())
        }
        async fn poll_events(&self) -> Result<Vec<BridgeEvent>> {
            Ok(vec![])
        }
        async fn export_session(&self) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn contacts(&self) -> Result<Vec<BridgeContact>> {
            Ok(vec![])
        }
        async fn status(&self) -> Result<BridgeStatus> {
            Ok(BridgeStatus {
                connected: true,
                phone_number: None,
            })
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn manager() -> (ClientManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let manager = ClientManager::new(
            BridgesConfig::default(),
            SessionStore::new(dir.path()).unwrap(),
            Arc::new(NullSink),
            store,
        );
        (manager, dir)
    }

    #[tokio::test]
    async fn ensure_client_is_idempotent() {
        let (manager, _dir) = manager();
        let uid = UserId::from("u1");
        manager.ensure_client(&uid, Source::Whatsapp).unwrap();
        manager.ensure_client(&uid, Source::Whatsapp).unwrap();
        assert_eq!(manager.live_client_count(), 1);
        assert!(manager.is_running(&uid, Source::Whatsapp));
        assert!(!manager.is_running(&uid, Source::Telegram));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn logout_removes_client_row_and_blob() {
        let (manager, dir) = manager();
        let uid = UserId::from("u1");
        manager
            .store
            .upsert_user("p-1", "a@b.c", "A")
            .unwrap();
        manager.ensure_client(&uid, Source::Whatsapp).unwrap();
        manager
            .sessions
            .save(Source::Whatsapp, &uid, b"keys")
            .unwrap();

        manager.logout_client(&uid, Source::Whatsapp).await.unwrap();

        assert_eq!(manager.live_client_count(), 0);
        assert!(!dir.path().join("whatsapp.db.user_u1").exists());
        assert!(manager
            .sessions
            .load(Source::Whatsapp, &uid)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reset_tears_down_all_sources() {
        let (manager, _dir) = manager();
        let uid = UserId::from("u1");
        manager.ensure_client(&uid, Source::Whatsapp).unwrap();
        manager.ensure_client(&uid, Source::Telegram).unwrap();
        assert_eq!(manager.live_client_count(), 2);
        manager.reset_user(&uid).await.unwrap();
        assert_eq!(manager.live_client_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_ensure_creates_one_client() {
        let (manager, _dir) = manager();
        let manager = Arc::new(manager);
        let uid = UserId::from("u1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            let u = uid.clone();
            handles.push(tokio::spawn(async move {
                m.ensure_client(&u, Source::Whatsapp).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(manager.live_client_count(), 1);
        manager.shutdown().await;
    }
}
