use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use dashmap::DashMap;

use alfred_clients::ClientManager;
use alfred_core::config::AlfredConfig;
use alfred_engine::SyncWorker;
use alfred_google::gcal::CalendarClient;
use alfred_google::oauth::OAuthClient;
use alfred_notify::Notifier;
use alfred_store::Store;

use crate::service::ServiceManager;

/// An in-flight OAuth round-trip, keyed by the `state` nonce.
pub struct PendingOAuth {
    /// Set for the calendar-connect flow (the user is already known);
    /// `None` for login.
    pub user_id: Option<alfred_core::types::UserId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: AlfredConfig,
    pub store: Store,
    pub clients: Arc<ClientManager>,
    pub notifier: Arc<Notifier>,
    pub sync: Arc<SyncWorker>,
    pub services: Arc<ServiceManager>,
    /// Absent until PROVIDER_CREDENTIALS_JSON is configured.
    pub oauth: Option<Arc<OAuthClient>>,
    pub gcal: Arc<CalendarClient>,
    /// state nonce → pending OAuth exchange.
    pub oauth_states: DashMap<String, PendingOAuth>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health))
        // auth
        .route("/api/auth/oauth/start", post(crate::http::auth::oauth_start))
        .route(
            "/api/auth/oauth/callback",
            post(crate::http::auth::oauth_callback),
        )
        .route("/api/auth/logout", post(crate::http::auth::logout))
        // onboarding / status
        .route("/api/status", get(crate::http::status::status))
        .route(
            "/api/onboarding/complete",
            post(crate::http::status::onboarding_complete),
        )
        .route(
            "/api/onboarding/reset",
            post(crate::http::status::onboarding_reset),
        )
        // messaging sources
        .route(
            "/api/sources/{source}/status",
            get(crate::http::sources::source_status),
        )
        .route(
            "/api/sources/{source}/pair",
            post(crate::http::sources::source_pair),
        )
        // channels
        .route("/api/channels", get(crate::http::channels::list_channels))
        .route("/api/channels", post(crate::http::channels::create_channel))
        .route(
            "/api/channels/discoverable",
            get(crate::http::channels::discoverable_channels),
        )
        .route(
            "/api/channels/{id}",
            put(crate::http::channels::update_channel),
        )
        .route(
            "/api/channels/{id}",
            delete(crate::http::channels::delete_channel),
        )
        // events
        .route("/api/events", get(crate::http::events::list_events))
        .route("/api/events/{id}", get(crate::http::events::get_event))
        .route("/api/events/{id}", put(crate::http::events::update_event))
        .route(
            "/api/events/{id}/confirm",
            post(crate::http::events::confirm_event),
        )
        .route(
            "/api/events/{id}/reject",
            post(crate::http::events::reject_event),
        )
        // reminders
        .route("/api/reminders", get(crate::http::reminders::list_reminders))
        .route(
            "/api/reminders",
            post(crate::http::reminders::create_reminder),
        )
        .route(
            "/api/reminders/{id}",
            get(crate::http::reminders::get_reminder),
        )
        .route(
            "/api/reminders/{id}",
            put(crate::http::reminders::update_reminder),
        )
        .route(
            "/api/reminders/{id}/confirm",
            post(crate::http::reminders::confirm_reminder),
        )
        .route(
            "/api/reminders/{id}/reject",
            post(crate::http::reminders::reject_reminder),
        )
        .route(
            "/api/reminders/{id}/complete",
            post(crate::http::reminders::complete_reminder),
        )
        .route(
            "/api/reminders/{id}/dismiss",
            post(crate::http::reminders::dismiss_reminder),
        )
        // calendar provider
        .route("/api/gcal/status", get(crate::http::gcal::gcal_status))
        .route("/api/gcal/connect", post(crate::http::gcal::gcal_connect))
        .route("/api/gcal/callback", post(crate::http::gcal::gcal_callback))
        .route(
            "/api/gcal/calendars",
            get(crate::http::gcal::gcal_calendars),
        )
        // streaming
        .route("/api/sse", get(crate::http::sse::sse))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_clients::session_store::SessionStore;
    use alfred_core::bus::MessageBus;
    use alfred_core::types::{ActionType, ChannelType, Source, UserId};
    use alfred_engine::sync::{CalendarApi, TokenRefresher};
    use alfred_google::gmail::GmailClient;
    use alfred_google::oauth::{GoogleCredentials, OAuthClient};
    use alfred_ingest::{GmailPoller, HistoryDebouncer, Ingestor};
    use alfred_store::events::NewEvent;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct TestHarness {
        router: Router,
        store: Store,
        // keeps bus publishers alive for the duration of the test
        _bus: MessageBus,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> TestHarness {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let notifier = Arc::new(Notifier::new(None, None));

        let mut bus = MessageBus::new(16);
        let _rx = bus.take_receiver();

        struct NullHook;
        #[async_trait::async_trait]
        impl alfred_ingest::BackfillHook for NullHook {
            async fn channel_ready(&self, _: &UserId, _: i64) {}
        }
        let debouncer = HistoryDebouncer::spawn(Arc::new(NullHook), 10);
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            bus.publisher(),
            notifier.clone(),
            debouncer,
            25,
        ));

        let clients = Arc::new(ClientManager::new(
            alfred_core::config::BridgesConfig::default(),
            SessionStore::new(dir.path()).unwrap(),
            ingestor as Arc<dyn alfred_clients::SourceEventSink>,
            store.clone(),
        ));

        let oauth_client = Arc::new(OAuthClient::new(GoogleCredentials::unconfigured()));
        let gcal = Arc::new(CalendarClient::default());
        let gmail = Arc::new(GmailPoller::new(
            store.clone(),
            Arc::new(GmailClient::default()),
            oauth_client.clone(),
            bus.publisher(),
            5,
        ));
        let sync = alfred_engine::SyncWorker::new(
            store.clone(),
            gcal.clone() as Arc<dyn CalendarApi>,
            oauth_client as Arc<dyn TokenRefresher>,
            notifier.clone(),
        );
        let services = ServiceManager::new(store.clone(), clients.clone(), gmail);

        let state = Arc::new(AppState {
            config: AlfredConfig::default(),
            store: store.clone(),
            clients,
            notifier,
            sync,
            services,
            oauth: None,
            gcal,
            oauth_states: DashMap::new(),
        });

        TestHarness {
            router: build_router(state),
            store,
            _bus: bus,
            _dir: dir,
        }
    }

    fn login(store: &Store, provider_id: &str) -> (UserId, String) {
        let user = store
            .upsert_user(provider_id, &format!("{provider_id}@x.y"), provider_id)
            .unwrap();
        let (_, token) = store
            .create_session(&user.id, chrono::Duration::days(1), None)
            .unwrap();
        (user.id, token)
    }

    fn get(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let h = harness().await;
        let response = h.router.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_routes_require_a_session() {
        let h = harness().await;
        let response = h.router.oneshot(get("/api/events", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stale_token_is_rejected() {
        let h = harness().await;
        let response = h
            .router
            .oneshot(get("/api/events", Some("not-a-real-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cross_user_event_access_is_404() {
        let h = harness().await;
        let (alice, _alice_token) = login(&h.store, "alice");
        let (_bob, bob_token) = login(&h.store, "bob");

        let (channel, _) = h
            .store
            .get_or_create_channel(&alice, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();
        let event = h
            .store
            .insert_event(NewEvent {
                user_id: alice.clone(),
                channel_id: channel.id,
                calendar_id: "primary".into(),
                title: "Dinner".into(),
                description: String::new(),
                start_time: "2026-02-09T19:00:00+01:00".into(),
                end_time: None,
                location: String::new(),
                action_type: ActionType::Create,
                original_message_id: None,
                llm_reasoning: String::new(),
                llm_confidence: 0.9,
                quality_flags: vec![],
            })
            .unwrap();

        let response = h
            .router
            .clone()
            .oneshot(get(&format!("/api/events/{}", event.id), Some(&bob_token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Bob's listing is empty; nothing of Alice's leaks.
        let response = h
            .router
            .oneshot(get("/api/events", Some(&bob_token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["events"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn confirm_of_already_confirmed_event_is_400() {
        let h = harness().await;
        let (alice, token) = login(&h.store, "alice");
        let (channel, _) = h
            .store
            .get_or_create_channel(&alice, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();
        let event = h
            .store
            .insert_event(NewEvent {
                user_id: alice.clone(),
                channel_id: channel.id,
                calendar_id: "primary".into(),
                title: "Dinner".into(),
                description: String::new(),
                start_time: "2026-02-09T19:00:00+01:00".into(),
                end_time: None,
                location: String::new(),
                action_type: ActionType::Create,
                original_message_id: None,
                llm_reasoning: String::new(),
                llm_confidence: 0.9,
                quality_flags: vec![],
            })
            .unwrap();
        h.store.confirm_event(&alice, event.id).unwrap();

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/events/{}/confirm", event.id))
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
