//! Remote state sync - cumulative health and speeding count
//!
//! The record lives in a PostgREST-style table (Supabase) keyed by the bump
//! identifier. The store is optional: without URL, key and a valid UUID the
//! loop runs on the in-memory default. Pushes are awaited inline after each
//! fired event and never retried; local state stays authoritative.

use crate::domain::policy_state::{BumpRecord, PolicyState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SELECT_FIELDS: &str = "health,status,car_count,last_updated";

/// Read/write access to the persisted record
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current record, `None` when no row matches the identifier
    async fn load(&self) -> anyhow::Result<Option<BumpRecord>>;

    async fn push(&self, record: &BumpRecord) -> anyhow::Result<()>;
}

/// PostgREST client over reqwest
pub struct PostgrestStore {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    bump_id: Uuid,
}

impl PostgrestStore {
    /// Build from config; `Ok(None)` when credentials are incomplete
    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        let (Some(url), Some(key), Some(raw_id)) =
            (config.remote_url(), config.remote_key(), config.remote_bump_id())
        else {
            return Ok(None);
        };
        let bump_id = Uuid::parse_str(raw_id.trim())
            .with_context(|| format!("speed bump id {raw_id:?} is not a UUID"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.remote_timeout_ms()))
            .build()
            .context("build http client")?;
        let endpoint = format!("{}/rest/v1/{}", url.trim_end_matches('/'), config.remote_table());
        Ok(Some(Self { client, endpoint, key: key.to_string(), bump_id }))
    }

    fn row_filter(&self) -> String {
        format!("eq.{}", self.bump_id)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn load(&self) -> anyhow::Result<Option<BumpRecord>> {
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("select", SELECT_FIELDS.to_string()), ("id", self.row_filter())]);
        let response = self.authorized(request).send().await.context("remote load request")?;
        let status = response.status();
        let body = response.bytes().await.context("remote load body")?;
        if !status.is_success() {
            bail!("remote load returned {status}: {}", String::from_utf8_lossy(&body));
        }
        let mut rows: Vec<BumpRecord> = serde_json::from_slice(&body).context("remote load decode")?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }

    async fn push(&self, record: &BumpRecord) -> anyhow::Result<()> {
        let body = serde_json::to_vec(record).context("remote push encode")?;
        let request = self
            .client
            .patch(&self.endpoint)
            .query(&[("id", self.row_filter())])
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .body(body);
        let response = self.authorized(request).send().await.context("remote push request")?;
        let status = response.status();
        let body = response.bytes().await.context("remote push body")?;
        if !status.is_success() {
            bail!("remote push returned {status}: {}", String::from_utf8_lossy(&body));
        }
        let rows: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap_or_default();
        if rows.is_empty() {
            warn!(bump_id = %self.bump_id, "remote_push_matched_no_row");
        }
        Ok(())
    }
}

/// Optional store wrapper that turns every failure into a logged no-op
pub struct RemoteSync {
    store: Option<Box<dyn RemoteStore>>,
    metrics: Arc<Metrics>,
}

impl RemoteSync {
    pub fn new(store: Option<Box<dyn RemoteStore>>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Self {
        let store: Option<Box<dyn RemoteStore>> = match PostgrestStore::from_config(config) {
            Ok(Some(store)) => {
                info!(table = %config.remote_table(), bump_id = %store.bump_id, "remote_store_configured");
                Some(Box::new(store))
            }
            Ok(None) => {
                warn!("remote_store_not_configured_using_local_state");
                None
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "remote_store_invalid_using_local_state");
                None
            }
        };
        Self::new(store, metrics)
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Initial policy state: the remote record, or the default when unavailable
    pub async fn load_state(&self) -> PolicyState {
        let Some(store) = self.store.as_ref() else {
            return PolicyState::default();
        };
        match store.load().await {
            Ok(Some(record)) => {
                let state = PolicyState::from_record(&record);
                info!(
                    health = %state.health(),
                    status = %state.status(),
                    speeding_count = %state.speeding_count(),
                    "remote_state_loaded"
                );
                state
            }
            Ok(None) => {
                warn!("remote_record_missing_using_default");
                PolicyState::default()
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "remote_load_failed_using_default");
                PolicyState::default()
            }
        }
    }

    /// Push the current state; failures are logged and counted, never retried
    pub async fn push_state(&self, state: &PolicyState) -> bool {
        let Some(store) = self.store.as_ref() else {
            return false;
        };
        let record = state.to_record(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        let start = Instant::now();
        let ok = match store.push(&record).await {
            Ok(()) => {
                debug!(
                    health = %state.health_units(),
                    speeding_count = %state.speeding_count(),
                    latency_ms = %start.elapsed().as_millis(),
                    "remote_state_pushed"
                );
                true
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "remote_push_failed");
                false
            }
        };
        self.metrics.record_remote_push(ok);
        ok
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::MemoryStore;
    use super::*;
    use crate::domain::policy_state::BumpStatus;

    #[test]
    fn test_incomplete_credentials_mean_no_store() {
        assert!(PostgrestStore::from_config(&Config::default()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_sync_uses_default_state() {
        let sync = RemoteSync::new(None, Arc::new(Metrics::new()));
        let state = sync.load_state().await;
        assert_eq!(state, PolicyState::default());
        assert!(!sync.push_state(&state).await);
    }

    #[tokio::test]
    async fn test_load_and_push_round_through_store() {
        let store = MemoryStore::default();
        *store.record.lock() = Some(BumpRecord {
            health: Some(6500.0),
            status: Some(BumpStatus::Damaged),
            car_count: Some(12),
            last_updated: None,
        });
        let metrics = Arc::new(Metrics::new());
        let sync = RemoteSync::new(Some(Box::new(store.clone())), metrics.clone());

        let mut state = sync.load_state().await;
        assert_eq!(state.health(), 6500.0);
        assert_eq!(state.speeding_count(), 12);

        state.record_speeding();
        assert!(sync.push_state(&state).await);
        let pushed = store.pushes.lock()[0].clone();
        assert_eq!(pushed.car_count, Some(13));
        assert_eq!(pushed.status, Some(BumpStatus::Damaged));
        assert!(pushed.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_failing_store_is_not_fatal() {
        let store = MemoryStore { fail: true, ..Default::default() };
        let metrics = Arc::new(Metrics::new());
        let sync = RemoteSync::new(Some(Box::new(store)), metrics.clone());

        assert_eq!(sync.load_state().await, PolicyState::default());
        assert!(!sync.push_state(&PolicyState::default()).await);
        assert_eq!(metrics.remote_push_failed_total(), 1);
    }
}
