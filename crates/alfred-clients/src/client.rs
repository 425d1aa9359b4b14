//! One live client: a bridge transport plus its event-poll loop.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use alfred_core::types::{Source, UserId};

use crate::bridge::{BridgeEvent, BridgeTransport};
use crate::session_store::SessionStore;
use crate::sink::SourceEventSink;

/// Bridge event-poll cadence.
const POLL_INTERVAL_MS: u64 = 1_000;
/// Backoff after a poll error before trying again.
const POLL_ERROR_BACKOFF_MS: u64 = 5_000;

pub struct IngestionClient {
    pub user_id: UserId,
    pub source: Source,
    pub transport: Arc<dyn BridgeTransport>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl IngestionClient {
    /// Spawn the client's poll loop. The caller has already created the
    /// transport; connecting happens inside the loop task so no lock is
    /// ever held across the bridge round-trip.
    pub fn spawn(
        user_id: UserId,
        source: Source,
        transport: Arc<dyn BridgeTransport>,
        sessions: Arc<SessionStore>,
        sink: Arc<dyn SourceEventSink>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            user_id.clone(),
            source,
            transport.clone(),
            sessions,
            sink,
            cancel.clone(),
        ));
        Self {
            user_id,
            source,
            transport,
            cancel,
            task,
        }
    }

    /// Stop the poll loop. The transport itself is disconnected by the
    /// manager (it may outlive the loop for a final session export).
    pub fn stop(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run_loop(
    user_id: UserId,
    source: Source,
    transport: Arc<dyn BridgeTransport>,
    sessions: Arc<SessionStore>,
    sink: Arc<dyn SourceEventSink>,
    cancel: CancellationToken,
) {
    // Resume from the sidecar blob when one exists.
    let blob = sessions.load(source, &user_id).ok().flatten();
    if let Err(e) = transport.connect(blob).await {
        warn!(user = %user_id, source = %source, error = %e, "bridge connect failed");
    }

    let mut interval =
        tokio::time::interval(std::time::Duration::from_millis(POLL_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(user = %user_id, source = %source, "client loop cancelled");
                return;
            }
            _ = interval.tick() => {
                match transport.poll_events().await {
                    Ok(events) => {
                        for event in events {
                            dispatch(&user_id, source, event, &transport, &sessions, &sink)
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(user = %user_id, source = %source, error = %e,
                            "bridge poll failed, backing off");
                        tokio::time::sleep(std::time::Duration::from_millis(
                            POLL_ERROR_BACKOFF_MS,
                        ))
                        .await;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    user_id: &UserId,
    source: Source,
    event: BridgeEvent,
    transport: &Arc<dyn BridgeTransport>,
    sessions: &Arc<SessionStore>,
    sink: &Arc<dyn SourceEventSink>,
) {
    match event {
        BridgeEvent::Connected { phone_number } => {
            // Persist the protocol session as soon as the bridge has one.
            if let Ok(Some(blob)) = transport.export_session().await {
                if let Err(e) = sessions.save(source, user_id, &blob) {
                    warn!(user = %user_id, error = %e, "session blob save failed");
                }
            }
            sink.handle_connected(user_id, source, phone_number).await;
        }
        BridgeEvent::Disconnected => {
            sink.handle_disconnected(user_id, source).await;
        }
        BridgeEvent::PairingCode { code } => {
            sink.handle_pairing_code(user_id, source, code).await;
        }
        BridgeEvent::Message(message) => {
            sink.handle_message(user_id, source, message).await;
        }
        BridgeEvent::HistoryChunk { conversations } => {
            sink.handle_history(user_id, source, conversations).await;
        }
        BridgeEvent::ContactsUpdated { contacts } => {
            sink.handle_contacts(user_id, source, contacts).await;
        }
    }
}
