//! The capability surface clients use to hand events downstream.
//!
//! Defined here (not in the ingestion crate) so the dependency points one
//! way: ingestion implements the trait, clients only consume it.

use async_trait::async_trait;

use alfred_core::types::{Source, UserId};

use crate::bridge::{BridgeContact, BridgeConversation, BridgeMessage};

/// Receives everything a client learns from its bridge. Implementations
/// must be cheap to call from client poll loops; anything slow belongs on
/// the far side of the shared bus.
#[async_trait]
pub trait SourceEventSink: Send + Sync {
    async fn handle_message(&self, user_id: &UserId, source: Source, message: BridgeMessage);

    async fn handle_history(
        &self,
        user_id: &UserId,
        source: Source,
        conversations: Vec<BridgeConversation>,
    );

    async fn handle_connected(&self, user_id: &UserId, source: Source, phone: Option<String>);

    async fn handle_disconnected(&self, user_id: &UserId, source: Source);

    async fn handle_pairing_code(&self, user_id: &UserId, source: Source, code: String);

    async fn handle_contacts(
        &self,
        user_id: &UserId,
        source: Source,
        contacts: Vec<BridgeContact>,
    );
}
