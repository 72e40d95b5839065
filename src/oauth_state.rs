//! # OAuth State Bridge
//!
//! In-memory store mapping opaque OAuth `state` values to the workspace that
//! initiated authorization. Entries are single-use (consumed on read) and
//! expire after a configurable TTL; a background sweep evicts stale entries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use tokio::sync::Mutex;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::OauthStateConfig;

#[derive(Debug, Clone)]
struct StateEntry {
    workspace_id: Uuid,
    expires_at: DateTime<Utc>,
}

/// Shared OAuth state bridge.
///
/// The provider echoes `state` back on the callback; consuming the entry
/// there both recovers the workspace and guarantees single use.
#[derive(Clone)]
pub struct OauthStateBridge {
    entries: Arc<Mutex<HashMap<String, StateEntry>>>,
    ttl: Duration,
    sweep_interval: TokioDuration,
}

impl OauthStateBridge {
    pub fn new(config: &OauthStateConfig) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::seconds(config.ttl_seconds as i64),
            sweep_interval: TokioDuration::from_secs(config.sweep_seconds),
        }
    }

    /// Issue a fresh state value bound to the given workspace.
    pub async fn issue(&self, workspace_id: Uuid) -> String {
        let state = Uuid::new_v4().to_string();
        let entry = StateEntry {
            workspace_id,
            expires_at: Utc::now() + self.ttl,
        };

        let mut entries = self.entries.lock().await;
        entries.insert(state.clone(), entry);
        gauge!("oauth_state_entries_gauge").set(entries.len() as f64);

        state
    }

    /// Consume a state value, returning the bound workspace.
    ///
    /// Returns `None` for unknown, already-consumed, or expired states; the
    /// entry is removed in every case.
    pub async fn consume(&self, state: &str) -> Option<Uuid> {
        let mut entries = self.entries.lock().await;
        let entry = entries.remove(state)?;
        gauge!("oauth_state_entries_gauge").set(entries.len() as f64);

        if entry.expires_at < Utc::now() {
            counter!("oauth_state_expired_total").increment(1);
            return None;
        }

        Some(entry.workspace_id)
    }

    /// Number of live entries (for the health endpoint).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Run the sweep loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting oauth state sweeper");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Oauth state sweeper shutdown requested");
                    break;
                }
                _ = sleep(self.sweep_interval) => {
                    self.sweep().await;
                }
            }
        }

        info!("Oauth state sweeper stopped");
    }

    async fn sweep(&self) {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        let evicted = before - entries.len();

        if evicted > 0 {
            counter!("oauth_state_expired_total").increment(evicted as u64);
            debug!(evicted, remaining = entries.len(), "Swept expired oauth states");
        }
        gauge!("oauth_state_entries_gauge").set(entries.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge_with_ttl(ttl_seconds: u64) -> OauthStateBridge {
        OauthStateBridge::new(&OauthStateConfig {
            ttl_seconds,
            sweep_seconds: 300,
        })
    }

    #[tokio::test]
    async fn consume_returns_workspace_once() {
        let bridge = bridge_with_ttl(600);
        let workspace_id = Uuid::new_v4();

        let state = bridge.issue(workspace_id).await;
        assert_eq!(bridge.consume(&state).await, Some(workspace_id));
        // Second read must fail: the entry is single-use.
        assert_eq!(bridge.consume(&state).await, None);
    }

    #[tokio::test]
    async fn unknown_state_is_rejected() {
        let bridge = bridge_with_ttl(600);
        assert_eq!(bridge.consume("no-such-state").await, None);
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let bridge = bridge_with_ttl(600);
        let workspace_id = Uuid::new_v4();
        let state = bridge.issue(workspace_id).await;

        // Force expiry without waiting.
        {
            let mut entries = bridge.entries.lock().await;
            if let Some(entry) = entries.get_mut(&state) {
                entry.expires_at = Utc::now() - Duration::seconds(1);
            }
        }

        assert_eq!(bridge.consume(&state).await, None);
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_entries() {
        let bridge = bridge_with_ttl(600);
        let live = bridge.issue(Uuid::new_v4()).await;
        let stale = bridge.issue(Uuid::new_v4()).await;

        {
            let mut entries = bridge.entries.lock().await;
            if let Some(entry) = entries.get_mut(&stale) {
                entry.expires_at = Utc::now() - Duration::seconds(1);
            }
        }

        bridge.sweep().await;
        assert_eq!(bridge.len().await, 1);
        assert!(bridge.consume(&live).await.is_some());
    }
}
