//! Three-phase history sync.
//!
//! Phase 1 writes exact per-channel counts so ranking is correct while
//! bodies are still loading. Phase 2 stores the most recent N bodies and
//! prunes. Phase 3 re-writes the counts so the final state reflects the
//! complete snapshot even where phase 2 truncated.
//!
//! Afterwards every affected *enabled* channel is marked on the debouncer,
//! which coalesces chunked deliveries into one backfill notification.

use alfred_clients::bridge::BridgeConversation;
use alfred_core::types::{BackfillStatus, ChannelType, Source, UserId};
use tracing::{debug, info};

use crate::error::Result;
use crate::ingestor::Ingestor;

pub(crate) async fn run_history_sync(
    ingestor: &Ingestor,
    user_id: &UserId,
    source: Source,
    conversations: Vec<BridgeConversation>,
) -> Result<()> {
    let store = ingestor.store();
    let keep = ingestor.history_size();

    let conversations: Vec<BridgeConversation> = conversations
        .into_iter()
        .filter(|c| !(source == Source::Whatsapp && c.is_group))
        .collect();

    info!(
        user = %user_id,
        source = %source,
        conversations = conversations.len(),
        "history sync starting"
    );
    ingestor
        .notifier()
        .sync_progress(user_id, source, "history sync started")
        .await;

    // Phase 1: exact metadata for every conversation.
    let mut channel_ids = Vec::with_capacity(conversations.len());
    for conv in &conversations {
        let channel_type = if conv.is_group {
            ChannelType::Group
        } else {
            ChannelType::Sender
        };
        let (channel, _) = store.get_or_create_channel(
            user_id,
            source,
            channel_type,
            &conv.chat_id,
            &conv.chat_name,
        )?;
        store.set_channel_stats(channel.id, conv.total_count, conv.last_message_at)?;
        channel_ids.push((channel.id, channel.enabled));
    }

    // Phase 2: most recent N bodies per conversation, then prune.
    for (conv, (channel_id, _)) in conversations.iter().zip(&channel_ids) {
        store.set_backfill_status(*channel_id, BackfillStatus::Running)?;

        let start = conv.messages.len().saturating_sub(keep);
        for message in &conv.messages[start..] {
            if message.text.trim().is_empty() {
                continue;
            }
            store.insert_message(
                user_id,
                *channel_id,
                source,
                &message.sender_id,
                &message.sender_name,
                None,
                &message.text,
                message.timestamp,
            )?;
        }
        store.prune_channel_messages(*channel_id, keep)?;
        store.set_backfill_status(*channel_id, BackfillStatus::Done)?;
        debug!(channel_id, "history bodies stored");
    }

    // Phase 3: final counts — phase 2 truncation must not leave stale stats.
    for (conv, (channel_id, _)) in conversations.iter().zip(&channel_ids) {
        store.set_channel_stats(*channel_id, conv.total_count, conv.last_message_at)?;
    }

    // Post-sync hook, debounced, enabled channels only.
    for (channel_id, enabled) in &channel_ids {
        if *enabled {
            ingestor.debouncer().mark(user_id, *channel_id);
        }
    }

    info!(user = %user_id, source = %source, "history sync complete");
    ingestor
        .notifier()
        .sync_progress(user_id, source, "history sync complete")
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debounce::{BackfillHook, HistoryDebouncer};
    use alfred_clients::bridge::BridgeMessage;
    use alfred_core::bus::MessageBus;
    use alfred_notify::Notifier;
    use alfred_store::Store;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingHook {
        fired: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl BackfillHook for CountingHook {
        async fn channel_ready(&self, _: &UserId, channel_id: i64) {
            self.fired.lock().unwrap().push(channel_id);
        }
    }

    fn conversation(chat_id: &str, total: i64, bodies: usize) -> BridgeConversation {
        let base = Utc::now() - Duration::hours(1);
        BridgeConversation {
            chat_id: chat_id.into(),
            chat_name: format!("chat {chat_id}"),
            is_group: false,
            total_count: total,
            last_message_at: Some(Utc::now()),
            messages: (0..bodies)
                .map(|i| BridgeMessage {
                    chat_id: chat_id.into(),
                    chat_name: String::new(),
                    sender_id: chat_id.into(),
                    sender_name: "Someone".into(),
                    text: format!("history {i}"),
                    timestamp: base + Duration::seconds(i as i64),
                    is_group: false,
                    from_me: false,
                })
                .collect(),
        }
    }

    fn setup(hook: Arc<CountingHook>) -> (Ingestor, Store, UserId) {
        let store = Store::open_in_memory().unwrap();
        let uid = store.upsert_user("p-1", "a@b.c", "A").unwrap().id;
        let mut bus = MessageBus::new(16);
        let _rx = bus.take_receiver();
        let ingestor = Ingestor::new(
            store.clone(),
            bus.publisher(),
            Arc::new(Notifier::new(None, None)),
            HistoryDebouncer::spawn(hook, 20),
            25,
        );
        (ingestor, store, uid)
    }

    #[tokio::test]
    async fn phases_store_counts_and_pruned_bodies() {
        let hook = Arc::new(CountingHook::default());
        let (ingestor, store, uid) = setup(hook);

        // 120 claimed messages, 40 bodies delivered — keep only 25
        run_history_sync(
            &ingestor,
            &uid,
            Source::Whatsapp,
            vec![conversation("+4917", 120, 40)],
        )
        .await
        .unwrap();

        let channels = store.list_channels(&uid, Some(Source::Whatsapp), false).unwrap();
        assert_eq!(channels.len(), 1);
        let channel = &channels[0];
        assert_eq!(channel.total_message_count, 120);
        assert_eq!(channel.initial_backfill_status, BackfillStatus::Done);
        assert!(channel.initial_backfill_at.is_some());

        let messages = store.recent_messages(channel.id, 100).unwrap();
        assert_eq!(messages.len(), 25);
        assert_eq!(messages.last().unwrap().text, "history 39");
    }

    #[tokio::test]
    async fn hook_fires_only_for_enabled_channels() {
        let hook = Arc::new(CountingHook::default());
        let (ingestor, store, uid) = setup(hook.clone());

        // pre-create one enabled channel; the other stays discovered/disabled
        let enabled = store
            .create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+1111", "On")
            .unwrap();

        run_history_sync(
            &ingestor,
            &uid,
            Source::Whatsapp,
            vec![conversation("+1111", 10, 5), conversation("+2222", 8, 3)],
        )
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(hook.fired.lock().unwrap().as_slice(), &[enabled.id]);
    }

    #[tokio::test]
    async fn whatsapp_group_history_is_skipped() {
        let hook = Arc::new(CountingHook::default());
        let (ingestor, store, uid) = setup(hook);

        let mut group = conversation("g@g.us", 50, 10);
        group.is_group = true;
        run_history_sync(&ingestor, &uid, Source::Whatsapp, vec![group])
            .await
            .unwrap();

        assert!(store
            .list_channels(&uid, Some(Source::Whatsapp), false)
            .unwrap()
            .is_empty());
    }
}
