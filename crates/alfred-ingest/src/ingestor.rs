//! The per-message ingestion path and the client-event sink.
//!
//! Channel rows are created lazily (disabled) on first contact. Only
//! messages from enabled channels reach the bus; live messages on
//! disabled channels update channel stats and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use alfred_clients::bridge::{BridgeContact, BridgeConversation, BridgeMessage};
use alfred_clients::sink::SourceEventSink;
use alfred_core::bus::BusPublisher;
use alfred_core::types::{ChannelType, IngestedMessage, Source, UserId};
use alfred_notify::Notifier;
use alfred_store::Store;

use crate::debounce::HistoryDebouncer;
use crate::error::Result;
use crate::history;

pub struct Ingestor {
    store: Store,
    publisher: BusPublisher,
    notifier: Arc<Notifier>,
    debouncer: HistoryDebouncer,
    history_size: usize,
}

impl Ingestor {
    pub fn new(
        store: Store,
        publisher: BusPublisher,
        notifier: Arc<Notifier>,
        debouncer: HistoryDebouncer,
        history_size: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier,
            debouncer,
            history_size,
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn history_size(&self) -> usize {
        self.history_size
    }

    pub(crate) fn debouncer(&self) -> &HistoryDebouncer {
        &self.debouncer
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The live-message path: filter, upsert the channel, count, and —
    /// only for enabled channels — persist and publish.
    pub async fn ingest_live(
        &self,
        user_id: &UserId,
        source: Source,
        message: BridgeMessage,
    ) -> Result<()> {
        if source == Source::Whatsapp && message.is_group {
            return Ok(());
        }
        if message.text.trim().is_empty() {
            return Ok(());
        }

        let channel_type = if message.is_group {
            ChannelType::Group
        } else {
            ChannelType::Sender
        };
        let display_name = if message.chat_name.is_empty() {
            message.sender_name.clone()
        } else {
            message.chat_name.clone()
        };
        let (channel, created) = self.store.get_or_create_channel(
            user_id,
            source,
            channel_type,
            &message.chat_id,
            &display_name,
        )?;
        if created {
            debug!(user = %user_id, channel = %message.chat_id, "discovered new channel");
        } else {
            self.store.refresh_channel_name(channel.id, &display_name)?;
        }

        self.store
            .record_channel_message(channel.id, message.timestamp)?;

        if !channel.enabled {
            return Ok(());
        }

        let row_id = self.store.insert_message(
            user_id,
            channel.id,
            source,
            &message.sender_id,
            &message.sender_name,
            None,
            &message.text,
            message.timestamp,
        )?;
        self.store
            .prune_channel_messages(channel.id, self.history_size)?;

        // Blocks when the bus is full — that backpressure is the contract.
        self.publisher
            .publish(IngestedMessage {
                user_id: user_id.clone(),
                channel_id: channel.id,
                source,
                sender_id: message.sender_id,
                sender_name: message.sender_name,
                subject: None,
                text: message.text,
                timestamp: message.timestamp,
                message_row_id: Some(row_id),
                email: None,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceEventSink for Ingestor {
    async fn handle_message(&self, user_id: &UserId, source: Source, message: BridgeMessage) {
        if let Err(e) = self.ingest_live(user_id, source, message).await {
            warn!(user = %user_id, source = %source, error = %e, "live ingest failed");
        }
    }

    async fn handle_history(
        &self,
        user_id: &UserId,
        source: Source,
        conversations: Vec<BridgeConversation>,
    ) {
        if let Err(e) = history::run_history_sync(self, user_id, source, conversations).await {
            warn!(user = %user_id, source = %source, error = %e, "history sync failed");
        }
    }

    async fn handle_connected(&self, user_id: &UserId, source: Source, phone: Option<String>) {
        if let Err(e) = self
            .store
            .upsert_messaging_session(user_id, source, phone.as_deref())
        {
            warn!(user = %user_id, error = %e, "messaging session upsert failed");
        }
        if let Err(e) = self.store.set_messaging_connected(user_id, source, true) {
            warn!(user = %user_id, error = %e, "connected flag update failed");
        }
        self.notifier.messaging_status(user_id, source, true).await;
    }

    async fn handle_disconnected(&self, user_id: &UserId, source: Source) {
        if let Err(e) = self.store.set_messaging_connected(user_id, source, false) {
            warn!(user = %user_id, error = %e, "disconnected flag update failed");
        }
        self.notifier.messaging_status(user_id, source, false).await;
    }

    async fn handle_pairing_code(&self, user_id: &UserId, source: Source, code: String) {
        self.notifier.pairing_code(user_id, source, &code).await;
    }

    async fn handle_contacts(
        &self,
        user_id: &UserId,
        source: Source,
        contacts: Vec<BridgeContact>,
    ) {
        for contact in contacts {
            if contact.name.is_empty() {
                continue;
            }
            let Ok((channel, created)) = self.store.get_or_create_channel(
                user_id,
                source,
                ChannelType::Sender,
                &contact.id,
                &contact.name,
            ) else {
                continue;
            };
            if !created {
                let _ = self.store.refresh_channel_name(channel.id, &contact.name);
            }
        }
    }
}
