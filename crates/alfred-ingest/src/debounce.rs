//! Debounced post-history-sync hook.
//!
//! Providers deliver history in chunks; the hook must fire **once** per
//! channel per sync burst. Each mark pushes the channel's deadline out by
//! the quiescence window; a channel fires when its deadline passes with
//! no further marks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use alfred_core::types::UserId;

/// Called once per enabled channel after its history sync settles.
#[async_trait]
pub trait BackfillHook: Send + Sync {
    async fn channel_ready(&self, user_id: &UserId, channel_id: i64);
}

#[derive(Clone)]
pub struct HistoryDebouncer {
    tx: mpsc::UnboundedSender<(UserId, i64)>,
}

impl HistoryDebouncer {
    /// Spawn the debouncer task. Dropping every handle shuts it down.
    pub fn spawn(hook: Arc<dyn BackfillHook>, quiescence_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, hook, quiescence_ms));
        Self { tx }
    }

    /// Note that `channel_id` was touched by a history chunk.
    pub fn mark(&self, user_id: &UserId, channel_id: i64) {
        let _ = self.tx.send((user_id.clone(), channel_id));
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<(UserId, i64)>,
    hook: Arc<dyn BackfillHook>,
    quiescence_ms: u64,
) {
    let window = std::time::Duration::from_millis(quiescence_ms);
    let mut pending: HashMap<(String, i64), (UserId, Instant)> = HashMap::new();

    loop {
        // Sleep until the earliest pending deadline, or park on the queue
        // when nothing is pending.
        let next_deadline = pending.values().map(|(_, at)| *at).min();

        tokio::select! {
            mark = rx.recv() => {
                match mark {
                    Some((user_id, channel_id)) => {
                        let key = (user_id.as_str().to_string(), channel_id);
                        pending.insert(key, (user_id, Instant::now() + window));
                    }
                    None => return, // all handles dropped
                }
            }
            _ = sleep_until_or_forever(next_deadline) => {
                let now = Instant::now();
                let ripe: Vec<(String, i64)> = pending
                    .iter()
                    .filter(|(_, (_, at))| *at <= now)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in ripe {
                    if let Some((user_id, _)) = pending.remove(&key) {
                        debug!(user = %user_id, channel_id = key.1, "history sync settled");
                        hook.channel_ready(&user_id, key.1).await;
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
