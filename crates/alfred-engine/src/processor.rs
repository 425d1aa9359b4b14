//! The shared-bus consumer and per-user serial executors.
//!
//! One task drains the bus and fans out by user; each user gets a mailbox
//! drained by one worker, so a user's messages are processed serially in
//! arrival order while different users run fully in parallel. The
//! consumer itself never performs external I/O.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use alfred_agent::prompt::{HistoryMessage, ProposalRef, PromptContext, TriggerMessage};
use alfred_agent::{AgentKind, Analyzer};
use alfred_core::types::{IngestedMessage, UserId};
use alfred_ingest::BackfillHook;
use alfred_store::traces::NewTrace;
use alfred_store::Store;

use crate::proposals::{AppliedAction, ProposalEngine};
use crate::router::{self, Intent};
use crate::time;

/// Per-user mailbox depth. A full mailbox blocks the fan-out, which in
/// turn backpressures the shared bus — intended behavior.
const MAILBOX_CAPACITY: usize = 64;

pub struct Processor {
    store: Store,
    analyzer: Arc<Analyzer>,
    proposals: Arc<ProposalEngine>,
    history_size: usize,
    mailboxes: DashMap<String, mpsc::Sender<IngestedMessage>>,
}

impl Processor {
    pub fn new(
        store: Store,
        analyzer: Arc<Analyzer>,
        proposals: Arc<ProposalEngine>,
        history_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            analyzer,
            proposals,
            history_size,
            mailboxes: DashMap::new(),
        })
    }

    /// Spawn the bus consumer. Runs until shutdown broadcasts `true`;
    /// in-flight messages drain within the shutdown budget.
    pub fn spawn(
        self: Arc<Self>,
        mut bus_rx: mpsc::Receiver<IngestedMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let processor = self;
        tokio::spawn(async move {
            info!("processor started");
            loop {
                tokio::select! {
                    message = bus_rx.recv() => {
                        match message {
                            Some(message) => Self::fan_out(&processor, message).await,
                            None => {
                                info!("bus closed, processor stopping");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("processor shutting down");
                            break;
                        }
                    }
                }
            }
            // Dropping the senders lets user workers drain and exit.
            processor.mailboxes.clear();
        })
    }

    /// Route one message into its user's serial mailbox.
    async fn fan_out(this: &Arc<Self>, message: IngestedMessage) {
        let key = message.user_id.as_str().to_string();
        let sender = match this.mailboxes.get(&key) {
            Some(entry) => entry.value().clone(),
            None => {
                let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
                this.mailboxes.insert(key.clone(), tx.clone());
                let processor = this.clone();
                tokio::spawn(async move {
                    processor.user_worker(rx).await;
                });
                tx
            }
        };
        if sender.send(message).await.is_err() {
            warn!(user = %key, "user mailbox closed, message dropped to restart path");
            this.mailboxes.remove(&key);
        }
    }

    async fn user_worker(self: Arc<Self>, mut rx: mpsc::Receiver<IngestedMessage>) {
        while let Some(message) = rx.recv().await {
            let user = message.user_id.clone();
            if let Err(e) = self.process_message(message).await {
                error!(user = %user, error = %e, "message processing failed");
            }
        }
        debug!("user worker drained");
    }

    /// Analyze one message and apply the verdict. Public so the backfill
    /// hook and tests can drive it directly.
    pub async fn process_message(&self, message: IngestedMessage) -> crate::Result<()> {
        let user = self.store.get_user(&message.user_id)?;
        let tz = time::zone_or_utc(&user.timezone);

        let routed = router::route(&message.text);
        let kind = match routed.intent {
            Intent::Event => AgentKind::Event,
            Intent::Reminder => AgentKind::Reminder,
        };

        let ctx = self.prompt_context(&message, kind, tz)?;

        let run = match self.analyzer.analyze(kind, &ctx).await {
            Ok(run) => run,
            Err(e) => {
                // LLM failure after its internal retry: no proposal, no
                // processed-mark — the message stays eligible for redelivery.
                self.trace(&message, &routed, "error", "none", 0.0, &e.to_string(), json!({}));
                return Err(e.into());
            }
        };

        // A terminal parse succeeded; Gmail dedup may now be recorded.
        if let Some(email) = &message.email {
            self.store
                .mark_email_processed(&message.user_id, &email.email_id)?;
        }

        let analysis = &run.analysis;
        let details = json!({
            "turns": run.turns_used,
            "language_retry": run.retried_for_language,
            "language_validation": run.language_validation_passed,
        });

        let applied = self
            .proposals
            .apply(
                &message.user_id,
                message.channel_id,
                message.source,
                message.message_row_id,
                analysis,
                tz,
            )
            .await;

        match applied {
            Ok(applied) => {
                self.trace(
                    &message,
                    &routed,
                    "ok",
                    &analysis.action,
                    analysis.confidence,
                    &analysis.reasoning,
                    json!({ "applied": format!("{applied:?}"), "details": details }),
                );
                Ok(())
            }
            Err(e) if e.kind() == alfred_core::error::ErrorKind::Validation => {
                // Bad model output is recorded, never retried.
                warn!(user = %message.user_id, error = %e, "analysis failed validation");
                self.trace(
                    &message,
                    &routed,
                    "validation_failed",
                    &analysis.action,
                    analysis.confidence,
                    &e.to_string(),
                    details,
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn prompt_context(
        &self,
        message: &IngestedMessage,
        kind: AgentKind,
        tz: chrono_tz::Tz,
    ) -> crate::Result<PromptContext> {
        let history = self
            .store
            .recent_messages(message.channel_id, self.history_size)?
            .into_iter()
            .map(|m| HistoryMessage {
                row_id: m.id,
                sender_name: m.sender_name,
                text: m.text,
                timestamp: m.timestamp,
            })
            .collect();

        let proposals = match kind {
            AgentKind::Event => self
                .store
                .pending_events_for_channel(&message.user_id, message.channel_id)?
                .into_iter()
                .map(|e| ProposalRef {
                    id: e.id,
                    external_event_id: e.external_event_id,
                    title: e.title,
                    when: Some(e.start_time),
                })
                .collect(),
            AgentKind::Reminder => self
                .store
                .pending_reminders_for_channel(&message.user_id, message.channel_id)?
                .into_iter()
                .map(|r| ProposalRef {
                    id: r.id,
                    external_event_id: r.external_event_id,
                    title: r.title,
                    when: r.due_date,
                })
                .collect(),
        };

        Ok(PromptContext {
            history,
            trigger: TriggerMessage {
                row_id: message.message_row_id,
                sender_name: message.sender_name.clone(),
                text: message.text.clone(),
                timestamp: message.timestamp.to_rfc3339(),
            },
            proposals,
            now_utc: chrono::Utc::now(),
            timezone: tz,
            email: message.email.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn trace(
        &self,
        message: &IngestedMessage,
        routed: &router::RoutedIntent,
        status: &str,
        action: &str,
        confidence: f64,
        reasoning: &str,
        details: serde_json::Value,
    ) {
        let intent = match routed.intent {
            Intent::Event => "event",
            Intent::Reminder => "reminder",
        };
        if let Err(e) = self.store.insert_trace(NewTrace {
            user_id: message.user_id.clone(),
            channel_id: message.channel_id,
            source: message.source,
            trigger_message_id: message.message_row_id,
            intent: intent.to_string(),
            router_confidence: routed.confidence,
            action: action.to_string(),
            confidence,
            reasoning: reasoning.to_string(),
            status: status.to_string(),
            details,
        }) {
            error!(error = %e, "trace insert failed");
        }
    }
}

/// Post-history-sync backfill: replay the channel's newest stored message
/// through the normal pipeline so fresh subscribers get proposals without
/// waiting for new traffic.
#[async_trait]
impl BackfillHook for Processor {
    async fn channel_ready(&self, user_id: &UserId, channel_id: i64) {
        let latest = match self.store.recent_messages(channel_id, 1) {
            Ok(mut messages) => messages.pop(),
            Err(e) => {
                warn!(channel_id, error = %e, "backfill read failed");
                return;
            }
        };
        let Some(latest) = latest else { return };
        if latest.user_id != *user_id {
            return;
        }

        let timestamp = chrono::DateTime::parse_from_rfc3339(&latest.timestamp)
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        debug!(channel_id, "post-sync backfill analysis");
        let message = IngestedMessage {
            user_id: latest.user_id,
            channel_id,
            source: latest.source,
            sender_id: latest.sender_id,
            sender_name: latest.sender_name,
            subject: latest.subject,
            text: latest.text,
            timestamp,
            message_row_id: Some(latest.id),
            email: None,
        };
        if let Err(e) = self.process_message(message).await {
            warn!(channel_id, error = %e, "backfill analysis failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_agent::provider::{
        ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall,
    };
    use alfred_core::types::{ChannelType, EventStatus, Source};
    use alfred_notify::Notifier;
    use std::sync::Mutex;

    /// Scripted provider: replays responses, records requests.
    struct Scripted {
        responses: Mutex<Vec<ChatResponse>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<ChatResponse>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }

        fn tool(name: &str, input: serde_json::Value) -> ChatResponse {
            ChatResponse {
                content: String::new(),
                model: "scripted".into(),
                tokens_in: 0,
                tokens_out: 0,
                stop_reason: "tool_use".into(),
                tool_calls: vec![ToolCall {
                    id: "tu_1".into(),
                    name: name.into(),
                    input,
                }],
            }
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::Api {
                    status: 503,
                    message: "script exhausted".into(),
                })
        }
    }

    fn setup(provider: Arc<Scripted>) -> (Arc<Processor>, Store, UserId, i64) {
        let store = Store::open_in_memory().unwrap();
        let user = store.upsert_user("p-1", "a@b.c", "A").unwrap();
        store.set_user_timezone(&user.id, "Europe/Berlin").unwrap();
        let channel = store
            .create_channel(&user.id, Source::Whatsapp, ChannelType::Sender, "+4917", "Ada")
            .unwrap();

        let notifier = Arc::new(Notifier::new(None, None));
        let analyzer = Arc::new(Analyzer::new(provider, "scripted".into(), 0.1, 6));
        let proposals = Arc::new(ProposalEngine::new(store.clone(), notifier, 0.6));
        let processor = Processor::new(store.clone(), analyzer, proposals, 25);
        (processor, store, user.id, channel.id)
    }

    fn whatsapp_message(uid: &UserId, channel_id: i64, row_id: Option<i64>, text: &str) -> IngestedMessage {
        IngestedMessage {
            user_id: uid.clone(),
            channel_id,
            source: Source::Whatsapp,
            sender_id: "+4917".into(),
            sender_name: "Ada".into(),
            subject: None,
            text: text.into(),
            timestamp: chrono::Utc::now(),
            message_row_id: row_id,
            email: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_create_proposal_from_message() {
        let provider = Scripted::new(vec![Scripted::tool(
            "create_calendar_event",
            serde_json::json!({
                "title": "Dinner",
                "start_time": "2026-02-09T19:00:00+01:00",
                "location": "Luigi's",
                "confidence": 0.85,
                "reasoning": "explicit invite"
            }),
        )]);
        let (processor, store, uid, channel_id) = setup(provider);

        processor
            .process_message(whatsapp_message(
                &uid,
                channel_id,
                Some(1),
                "Dinner tomorrow 19:00 at Luigi's",
            ))
            .await
            .unwrap();

        let events = store.list_events(&uid, None, None).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.start_time, "2026-02-09T19:00:00+01:00");
        assert_eq!(event.location, "Luigi's");
        assert!(event.llm_confidence >= 0.6);

        let traces = store.list_traces(&uid, Some(channel_id), 10).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].action, "create");
        assert_eq!(traces[0].status, "ok");
        assert_eq!(traces[0].intent, "event");
    }

    #[tokio::test]
    async fn update_message_edits_the_same_row() {
        let provider = Scripted::new(vec![
            Scripted::tool(
                "create_calendar_event",
                serde_json::json!({
                    "title": "Dinner",
                    "start_time": "2026-02-09T19:00:00+01:00",
                    "confidence": 0.85
                }),
            ),
            // second run: model references the pending proposal id (1)
            Scripted::tool(
                "update_calendar_event",
                serde_json::json!({
                    "alfred_entity_id": 1,
                    "start_time": "2026-02-09T20:00:00+01:00",
                    "confidence": 0.8,
                    "reasoning": "sender moved it"
                }),
            ),
        ]);
        let (processor, store, uid, channel_id) = setup(provider);

        processor
            .process_message(whatsapp_message(&uid, channel_id, Some(1), "Dinner tomorrow 19:00"))
            .await
            .unwrap();
        processor
            .process_message(whatsapp_message(
                &uid,
                channel_id,
                Some(2),
                "actually let's meet at 20:00 for dinner",
            ))
            .await
            .unwrap();

        let events = store.list_events(&uid, None, None).unwrap();
        assert_eq!(events.len(), 1, "update must not create a second row");
        assert_eq!(events[0].start_time, "2026-02-09T20:00:00+01:00");
        assert_eq!(events[0].status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn llm_failure_leaves_email_unprocessed() {
        // empty script → provider errors immediately
        let provider = Scripted::new(vec![]);
        let (processor, store, uid, channel_id) = setup(provider);

        let mut message =
            whatsapp_message(&uid, channel_id, Some(1), "meeting tomorrow 10:00");
        message.source = Source::Gmail;
        message.email = Some(alfred_core::types::EmailContext {
            email_id: "m-77".into(),
            thread_id: "t-1".into(),
            from: "boss@acme.com".into(),
            to: "a@b.c".into(),
            date: "Sun, 8 Feb 2026".into(),
            subject: "meeting".into(),
            thread: vec![],
        });

        assert!(processor.process_message(message).await.is_err());
        assert!(!store.is_email_processed(&uid, "m-77").unwrap());

        let traces = store.list_traces(&uid, None, 10).unwrap();
        assert_eq!(traces[0].status, "error");
    }

    #[tokio::test]
    async fn successful_parse_marks_email_processed_even_when_no_action() {
        let provider = Scripted::new(vec![Scripted::tool(
            "no_calendar_action",
            serde_json::json!({"reasoning": "newsletter"}),
        )]);
        let (processor, store, uid, channel_id) = setup(provider);

        let mut message = whatsapp_message(&uid, channel_id, Some(1), "our latest deals for your meeting room");
        message.source = Source::Gmail;
        message.email = Some(alfred_core::types::EmailContext {
            email_id: "m-88".into(),
            thread_id: "t-2".into(),
            from: "promo@shop.com".into(),
            to: "a@b.c".into(),
            date: "Sun, 8 Feb 2026".into(),
            subject: "deals".into(),
            thread: vec![],
        });

        processor.process_message(message).await.unwrap();
        assert!(store.is_email_processed(&uid, "m-88").unwrap());
        assert!(store.list_events(&uid, None, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn reminder_intent_routes_to_reminder_agent() {
        let provider = Scripted::new(vec![Scripted::tool(
            "create_reminder",
            serde_json::json!({
                "title": "Pay rent",
                "due_date": "2026-02-28T09:00:00+01:00",
                "confidence": 0.9
            }),
        )]);
        let (processor, store, uid, channel_id) = setup(provider);

        processor
            .process_message(whatsapp_message(
                &uid,
                channel_id,
                Some(1),
                "remind me to pay rent on the 28th",
            ))
            .await
            .unwrap();

        assert_eq!(store.list_reminders(&uid, None, None).unwrap().len(), 1);
        let traces = store.list_traces(&uid, None, 10).unwrap();
        assert_eq!(traces[0].intent, "reminder");
    }

    #[tokio::test]
    async fn bus_to_worker_fan_out_processes_in_order() {
        let provider = Scripted::new(vec![
            Scripted::tool(
                "create_calendar_event",
                serde_json::json!({
                    "title": "A",
                    "start_time": "2026-02-09T10:00:00+01:00",
                    "confidence": 0.9
                }),
            ),
            Scripted::tool(
                "create_calendar_event",
                serde_json::json!({
                    "title": "B",
                    "start_time": "2026-02-10T10:00:00+01:00",
                    "confidence": 0.9
                }),
            ),
        ]);
        let (processor, store, uid, channel_id) = setup(provider);

        let (tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = processor.spawn(rx, shutdown_rx);

        tx.send(whatsapp_message(&uid, channel_id, Some(1), "meet A tomorrow 10:00"))
            .await
            .unwrap();
        tx.send(whatsapp_message(&uid, channel_id, Some(2), "meet B the day after 10:00"))
            .await
            .unwrap();

        // allow the worker to drain
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        shutdown_tx.send(true).unwrap();
        let _ = handle.await;

        let events = store.list_events(&uid, None, None).unwrap();
        let titles: Vec<_> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(events.len(), 2);
        assert!(titles.contains(&"A") && titles.contains(&"B"));
    }
}
