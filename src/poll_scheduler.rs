//! # Poll Scheduler
//!
//! Background service that drives pull-sync for FREE-plan credentials. The
//! batch fires on a fixed interval and on manual triggers, walks every
//! active polling-enabled credential with a fixed delay in between, and
//! records one job row per credential poll. A failing credential is logged
//! and never aborts the rest of the batch. Retention cleanup for
//! idempotency keys and old job rows runs after each scheduled batch.

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{PollingConfig, RetentionConfig};
use crate::models::oauth_credential::Model as Credential;
use crate::orchestrator::SyncOrchestrator;
use crate::repositories::credential::has_rate_limit_budget;
use crate::repositories::polling_job::PollCounters;
use crate::repositories::{CredentialRepository, PollingJobRepository, WebhookRepository};

/// Handle for requesting an out-of-schedule polling batch.
#[derive(Clone)]
pub struct PollTrigger {
    tx: mpsc::Sender<()>,
}

impl PollTrigger {
    /// Request a batch run. Returns false when a trigger is already queued.
    pub fn request(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Background polling service
pub struct PollScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    credentials: Arc<CredentialRepository>,
    jobs: Arc<PollingJobRepository>,
    webhooks: Arc<WebhookRepository>,
    polling: PollingConfig,
    retention: RetentionConfig,
    trigger_rx: mpsc::Receiver<()>,
}

impl PollScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        credentials: Arc<CredentialRepository>,
        jobs: Arc<PollingJobRepository>,
        webhooks: Arc<WebhookRepository>,
        polling: PollingConfig,
        retention: RetentionConfig,
    ) -> (Self, PollTrigger) {
        let (tx, trigger_rx) = mpsc::channel(1);
        (
            Self {
                orchestrator,
                credentials,
                jobs,
                webhooks,
                polling,
                retention,
                trigger_rx,
            },
            PollTrigger { tx },
        )
    }

    /// Run the polling loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_seconds = self.polling.interval_seconds,
            "Starting poll scheduler"
        );
        let interval = TokioDuration::from_secs(self.polling.interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Poll scheduler shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    self.poll_all_free_accounts().await;
                    self.cleanup().await;
                }
                Some(()) = self.trigger_rx.recv() => {
                    info!("Manual polling batch triggered");
                    self.poll_all_free_accounts().await;
                }
            }
        }

        info!("Poll scheduler stopped");
    }

    /// One batch over all active, polling-enabled FREE credentials.
    pub async fn poll_all_free_accounts(&self) {
        let batch_started = Instant::now();
        let credentials = match self.credentials.find_pollable().await {
            Ok(credentials) => credentials,
            Err(err) => {
                error!(error = ?err, "Failed to load pollable credentials");
                return;
            }
        };
        gauge!("poll_batch_credentials_gauge").set(credentials.len() as f64);

        let delay = TokioDuration::from_millis(self.polling.credential_delay_ms);
        let mut remaining = credentials.len();
        for credential in &credentials {
            self.poll_credential(credential).await;
            remaining -= 1;
            // Fixed pause between credentials keeps us under the provider's
            // per-account rate limits.
            if remaining > 0 {
                sleep(delay).await;
            }
        }

        histogram!("poll_batch_duration_ms")
            .record(batch_started.elapsed().as_secs_f64() * 1_000.0);
        debug!(credentials = credentials.len(), "Polling batch completed");
    }

    async fn poll_credential(&self, credential: &Credential) {
        if !has_rate_limit_budget(credential) {
            debug!(
                credential_id = %credential.id,
                "Skipping poll, rate limit budget exhausted"
            );
            counter!("poll_runs_total", "outcome" => "rate_limited").increment(1);
            return;
        }

        let job = match self
            .jobs
            .start(credential.workspace_id, credential.id)
            .await
        {
            Ok(job) => job,
            Err(err) => {
                error!(error = ?err, credential_id = %credential.id, "Failed to open poll job");
                return;
            }
        };

        let started = Instant::now();
        match self.orchestrator.poll_events(credential.id).await {
            Ok(counters) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                if let Err(err) = self.jobs.complete(job.id, counters, duration_ms).await {
                    error!(error = ?err, job_id = %job.id, "Failed to finalize poll job");
                }
                counter!("poll_runs_total", "outcome" => "completed").increment(1);
            }
            Err(err) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                warn!(
                    error = %err,
                    credential_id = %credential.id,
                    "Poll run failed"
                );
                if let Err(db_err) = self
                    .jobs
                    .fail(
                        job.id,
                        PollCounters::default(),
                        duration_ms,
                        &err.to_string(),
                        None,
                    )
                    .await
                {
                    error!(error = ?db_err, job_id = %job.id, "Failed to finalize poll job");
                }
                counter!("poll_runs_total", "outcome" => "failed").increment(1);
            }
        }
    }

    /// Prune idempotency keys and finished job rows past retention.
    pub async fn cleanup(&self) {
        match self
            .webhooks
            .delete_keys_older_than(self.retention.idempotency_days)
            .await
        {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned old idempotency keys");
            }
            Ok(_) => {}
            Err(err) => error!(error = ?err, "Idempotency key cleanup failed"),
        }

        match self
            .jobs
            .delete_older_than(self.retention.poll_jobs_days)
            .await
        {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned old polling job rows");
            }
            Ok(_) => {}
            Err(err) => error!(error = ?err, "Polling job cleanup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::attribution::AttributionMatcher;
    use crate::calendly::{CalendlyClient, CalendlyConfig};
    use crate::config::TokenManagerConfig;
    use crate::models::oauth_credential::PlanTier;
    use crate::repositories::credential::TokenUpdate;
    use crate::repositories::{BookingRepository, LeadRepository, WorkflowRepository};
    use crate::token_manager::TokenManager;
    use crate::webhook_verifier::WebhookVerifier;

    struct Fixture {
        db: Arc<DatabaseConnection>,
        server: MockServer,
        scheduler: PollScheduler,
        trigger: PollTrigger,
    }

    async fn fixture() -> Fixture {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let server = MockServer::start().await;

        let client = CalendlyClient::new(CalendlyConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:8080/calendly/oauth/callback".to_string(),
            auth_base_url: server.uri(),
            api_base_url: server.uri(),
        });
        let credentials = Arc::new(CredentialRepository::new(Arc::clone(&db)));
        let leads = Arc::new(LeadRepository::new(Arc::clone(&db)));
        let tokens = Arc::new(TokenManager::new(
            Arc::clone(&credentials),
            client.clone(),
            &TokenManagerConfig {
                expiry_buffer_seconds: 300,
            },
        ));
        let orchestrator = Arc::new(SyncOrchestrator::new(
            client,
            tokens,
            Arc::clone(&credentials),
            Arc::new(BookingRepository::new(Arc::clone(&db))),
            Arc::clone(&leads),
            Arc::new(WebhookRepository::new(Arc::clone(&db))),
            WebhookVerifier::new(Arc::clone(&credentials)),
            AttributionMatcher::new(
                leads,
                Arc::new(WorkflowRepository::new(Arc::clone(&db))),
            ),
            "http://localhost:8080".to_string(),
            30,
            100,
        ));

        let (scheduler, trigger) = PollScheduler::new(
            orchestrator,
            credentials,
            Arc::new(PollingJobRepository::new(Arc::clone(&db))),
            Arc::new(WebhookRepository::new(Arc::clone(&db))),
            PollingConfig {
                interval_seconds: 3600,
                credential_delay_ms: 0,
                lookback_days: 30,
                page_size: 100,
            },
            RetentionConfig {
                idempotency_days: 7,
                poll_jobs_days: 30,
            },
        );

        Fixture {
            db,
            server,
            scheduler,
            trigger,
        }
    }

    async fn seed_free_credential(db: Arc<DatabaseConnection>) -> Credential {
        let repo = CredentialRepository::new(db);
        let credential = repo
            .upsert_from_oauth(
                Uuid::new_v4(),
                TokenUpdate {
                    access_token: "at-1".to_string(),
                    refresh_token: "rt-1".to_string(),
                    expires_at: Utc::now() + Duration::hours(2),
                },
                None,
                PlanTier::Free,
                None,
            )
            .await
            .unwrap();
        repo.enable_polling(credential.id).await.unwrap();
        repo.find_by_id(credential.id).await.unwrap().unwrap()
    }

    async fn mount_empty_poll(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/users/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resource": {
                    "uri": "https://api.calendly.com/users/USER1",
                    "email": "owner@example.com",
                    "current_organization": "https://api.calendly.com/organizations/ORG1"
                }
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/scheduled_events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collection": [],
                "pagination": { "next_page_token": null }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn batch_records_completed_jobs() {
        let fixture = fixture().await;
        seed_free_credential(Arc::clone(&fixture.db)).await;
        seed_free_credential(Arc::clone(&fixture.db)).await;

        mount_empty_poll(&fixture.server).await;

        fixture.scheduler.poll_all_free_accounts().await;

        let stats = PollingJobRepository::new(Arc::clone(&fixture.db))
            .stats()
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn failing_credential_does_not_abort_the_batch() {
        let fixture = fixture().await;
        let healthy = seed_free_credential(Arc::clone(&fixture.db)).await;
        let broken = seed_free_credential(Arc::clone(&fixture.db)).await;

        // Poison one credential with a near-expired token; the refresh mock
        // rejects it, so its poll fails while the other still completes.
        let repo = CredentialRepository::new(Arc::clone(&fixture.db));
        repo.update_tokens(
            broken.id,
            TokenUpdate {
                access_token: "stale".to_string(),
                refresh_token: "dead-rt".to_string(),
                expires_at: Utc::now() + Duration::seconds(30),
            },
        )
        .await
        .unwrap();

        mount_empty_poll(&fixture.server).await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&fixture.server)
            .await;

        fixture.scheduler.poll_all_free_accounts().await;

        let jobs = PollingJobRepository::new(Arc::clone(&fixture.db))
            .list_recent(10)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        let completed: Vec<_> = jobs.iter().filter(|j| j.status == "COMPLETED").collect();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].oauth_credential_id, healthy.id);
        let failed: Vec<_> = jobs.iter().filter(|j| j.status == "FAILED").collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error_message.is_some());
    }

    #[tokio::test]
    async fn rate_limited_credential_is_skipped_without_a_job_row() {
        let fixture = fixture().await;
        let credential = seed_free_credential(Arc::clone(&fixture.db)).await;

        CredentialRepository::new(Arc::clone(&fixture.db))
            .update_rate_limit(
                credential.id,
                Some(0),
                Some(Utc::now() + Duration::minutes(10)),
            )
            .await
            .unwrap();

        fixture.scheduler.poll_all_free_accounts().await;

        let stats = PollingJobRepository::new(Arc::clone(&fixture.db))
            .stats()
            .await
            .unwrap();
        assert_eq!(stats.total, 0);
    }

    #[tokio::test]
    async fn manual_trigger_fires_a_batch_before_the_interval() {
        let fixture = fixture().await;
        seed_free_credential(Arc::clone(&fixture.db)).await;

        mount_empty_poll(&fixture.server).await;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(fixture.scheduler.run(shutdown.clone()));

        assert!(fixture.trigger.request());
        // The 1h interval never elapses in this test; only the trigger can
        // have produced the job row.
        let jobs = PollingJobRepository::new(Arc::clone(&fixture.db));
        for _ in 0..50 {
            if jobs.stats().await.unwrap().total > 0 {
                break;
            }
            sleep(TokioDuration::from_millis(20)).await;
        }
        assert_eq!(jobs.stats().await.unwrap().total, 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let fixture = fixture().await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(fixture.scheduler.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(TokioDuration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
