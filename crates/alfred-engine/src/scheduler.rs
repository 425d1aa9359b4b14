//! Reminder due-scheduler.
//!
//! Every tick scans confirmed/synced reminders whose time has come and
//! whose `due_notification_sent_at` is unset, claims the marker
//! atomically, and only then notifies — at most one due notification per
//! reminder, ever.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use alfred_core::config::REMINDER_TICK_SECS;
use alfred_core::types::UserId;
use alfred_notify::Notifier;
use alfred_store::Store;

/// Whether a user's workers are currently running; reminders of stopped
/// users wait until their next start.
pub trait RunGate: Send + Sync {
    fn is_running(&self, user_id: &UserId) -> bool;
}

/// Gate that treats every user as running (single-process deployments,
/// tests).
pub struct AlwaysRunning;

impl RunGate for AlwaysRunning {
    fn is_running(&self, _user_id: &UserId) -> bool {
        true
    }
}

pub struct ReminderScheduler {
    store: Store,
    notifier: Arc<Notifier>,
    gate: Arc<dyn RunGate>,
}

impl ReminderScheduler {
    pub fn new(store: Store, notifier: Arc<Notifier>, gate: Arc<dyn RunGate>) -> Arc<Self> {
        Arc::new(Self {
            store,
            notifier,
            gate,
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(REMINDER_TICK_SECS));
            info!("reminder scheduler started");
            loop {
                tokio::select! {
                    _ = interval.tick() => scheduler.scan_once(Utc::now()).await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("reminder scheduler shutting down");
                            return;
                        }
                    }
                }
            }
        });
    }

    /// One scan pass. Public so tests can drive virtual time.
    pub async fn scan_once(&self, now: DateTime<Utc>) {
        let due = match self.store.due_reminders(now) {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "due-reminder scan failed");
                return;
            }
        };

        for reminder in due {
            if !self.gate.is_running(&reminder.user_id) {
                continue;
            }
            // Claim before emitting — a lost race means another tick (or
            // instance) already owns this notification.
            match self.store.claim_due_notification(reminder.id, now) {
                Ok(true) => {
                    info!(reminder_id = reminder.id, "reminder due, notifying");
                    self.notifier
                        .reminder_due(&reminder.user_id, reminder.id, &reminder.title)
                        .await;
                }
                Ok(false) => {}
                Err(e) => warn!(reminder_id = reminder.id, error = %e, "due claim failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::{ActionType, ChannelType, Priority, Source};
    use alfred_store::reminders::NewReminder;
    use chrono::Duration;

    fn seed_due_reminder(store: &Store) -> (UserId, i64) {
        let uid = store.upsert_user("p-1", "a@b.c", "A").unwrap().id;
        let (channel, _) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();
        let reminder = store
            .insert_reminder(NewReminder {
                user_id: uid.clone(),
                channel_id: channel.id,
                calendar_id: "primary".into(),
                title: "Pay rent".into(),
                description: String::new(),
                location: String::new(),
                due_date: Some((Utc::now() - Duration::minutes(1)).to_rfc3339()),
                reminder_time: None,
                priority: Priority::Normal,
                action_type: ActionType::Create,
                source: Source::Whatsapp,
                original_message_id: None,
                llm_reasoning: String::new(),
                llm_confidence: 0.9,
                quality_flags: vec![],
            })
            .unwrap();
        store.confirm_reminder(&uid, reminder.id).unwrap();
        (uid, reminder.id)
    }

    #[tokio::test]
    async fn due_notification_fires_exactly_once() {
        let store = Store::open_in_memory().unwrap();
        let (uid, _) = seed_due_reminder(&store);
        let notifier = Arc::new(Notifier::new(None, None));
        let mut rx = notifier.broadcaster().subscribe(&uid);
        let scheduler =
            ReminderScheduler::new(store.clone(), notifier, Arc::new(AlwaysRunning));

        scheduler.scan_once(Utc::now()).await;
        scheduler.scan_once(Utc::now()).await;
        scheduler.scan_once(Utc::now()).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, "reminder_due");
        assert!(rx.try_recv().is_err(), "only one notification allowed");
    }

    struct NobodyRunning;

    impl RunGate for NobodyRunning {
        fn is_running(&self, _: &UserId) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn stopped_users_are_skipped_and_claimed_later() {
        let store = Store::open_in_memory().unwrap();
        let (uid, reminder_id) = seed_due_reminder(&store);
        let notifier = Arc::new(Notifier::new(None, None));
        let mut rx = notifier.broadcaster().subscribe(&uid);

        let gated =
            ReminderScheduler::new(store.clone(), notifier.clone(), Arc::new(NobodyRunning));
        gated.scan_once(Utc::now()).await;
        assert!(rx.try_recv().is_err());
        // nothing was claimed while stopped
        assert!(store
            .get_reminder(&uid, reminder_id)
            .unwrap()
            .due_notification_sent_at
            .is_none());

        let open = ReminderScheduler::new(store.clone(), notifier, Arc::new(AlwaysRunning));
        open.scan_once(Utc::now()).await;
        assert_eq!(rx.recv().await.unwrap().event, "reminder_due");
    }
}
