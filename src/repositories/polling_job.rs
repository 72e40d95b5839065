//! # Polling Job Repository
//!
//! Execution records for poll runs. A job row is created RUNNING when a
//! credential's poll starts and finalized exactly once as COMPLETED or
//! FAILED.

use chrono::{Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::polling_job::{ActiveModel, Column, Entity, Model, PollJobStatus};

/// Counters accumulated over one poll run
#[derive(Debug, Clone, Copy, Default)]
pub struct PollCounters {
    pub fetched: i32,
    pub created: i32,
    pub updated: i32,
    pub skipped: i32,
}

/// Aggregate poll job statistics for the admin surface
#[derive(Debug, Clone, Default, serde::Serialize, utoipa::ToSchema)]
pub struct PollJobStats {
    pub total: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Repository for polling job database operations
pub struct PollingJobRepository {
    db: Arc<DatabaseConnection>,
}

impl PollingJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Open a RUNNING job row for a credential poll.
    pub async fn start(
        &self,
        workspace_id: Uuid,
        oauth_credential_id: Uuid,
    ) -> Result<Model, sea_orm::DbErr> {
        let model = Model {
            id: Uuid::new_v4(),
            workspace_id,
            oauth_credential_id,
            status: PollJobStatus::Running.as_str().to_string(),
            events_fetched: 0,
            events_created: 0,
            events_updated: 0,
            events_skipped: 0,
            duration_ms: None,
            error_message: None,
            error_details: None,
            started_at: Utc::now().into(),
            completed_at: None,
        };

        Entity::insert(ActiveModel::from(model.clone()))
            .exec_without_returning(&*self.db)
            .await?;
        Ok(model)
    }

    /// Finalize a job as COMPLETED with its counters.
    pub async fn complete(
        &self,
        id: Uuid,
        counters: PollCounters,
        duration_ms: i64,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.status = Set(PollJobStatus::Completed.as_str().to_string());
        active.events_fetched = Set(counters.fetched);
        active.events_created = Set(counters.created);
        active.events_updated = Set(counters.updated);
        active.events_skipped = Set(counters.skipped);
        active.duration_ms = Set(Some(duration_ms));
        active.completed_at = Set(Some(Utc::now().into()));
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Finalize a job as FAILED with the error that stopped it.
    pub async fn fail(
        &self,
        id: Uuid,
        counters: PollCounters,
        duration_ms: i64,
        error_message: &str,
        error_details: Option<serde_json::Value>,
    ) -> Result<(), sea_orm::DbErr> {
        let mut active = ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        active.status = Set(PollJobStatus::Failed.as_str().to_string());
        active.events_fetched = Set(counters.fetched);
        active.events_created = Set(counters.created);
        active.events_updated = Set(counters.updated);
        active.events_skipped = Set(counters.skipped);
        active.duration_ms = Set(Some(duration_ms));
        active.error_message = Set(Some(error_message.to_string()));
        active.error_details = Set(error_details);
        active.completed_at = Set(Some(Utc::now().into()));
        Entity::update(active).exec(&*self.db).await?;
        Ok(())
    }

    /// Most recent jobs, newest first.
    pub async fn list_recent(&self, limit: u64) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .order_by_desc(Column::StartedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Most recent jobs for one workspace, newest first.
    pub async fn list_recent_for_workspace(
        &self,
        workspace_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(Column::WorkspaceId.eq(workspace_id))
            .order_by_desc(Column::StartedAt)
            .limit(limit)
            .all(&*self.db)
            .await
    }

    /// Job counts by status.
    pub async fn stats(&self) -> Result<PollJobStats, sea_orm::DbErr> {
        let count_status = |status: PollJobStatus| {
            Entity::find()
                .filter(Column::Status.eq(status.as_str()))
                .count(&*self.db)
        };

        Ok(PollJobStats {
            total: Entity::find().count(&*self.db).await?,
            running: count_status(PollJobStatus::Running).await?,
            completed: count_status(PollJobStatus::Completed).await?,
            failed: count_status(PollJobStatus::Failed).await?,
        })
    }

    /// Delete finished job rows older than the retention window. Returns the
    /// number of rows removed.
    pub async fn delete_older_than(&self, days: u32) -> Result<u64, sea_orm::DbErr> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let result = Entity::delete_many()
            .filter(Column::StartedAt.lt(cutoff))
            .filter(Column::Status.ne(PollJobStatus::Running.as_str()))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn job_lifecycle_running_to_completed() {
        let db = setup().await;
        let repo = PollingJobRepository::new(db);

        let job = repo.start(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        assert_eq!(job.status, "RUNNING");

        repo.complete(
            job.id,
            PollCounters {
                fetched: 5,
                created: 2,
                updated: 3,
                skipped: 0,
            },
            1200,
        )
        .await
        .unwrap();

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, "COMPLETED");
        assert_eq!(recent[0].events_created, 2);
        assert!(recent[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_job_keeps_error_and_partial_counters() {
        let db = setup().await;
        let repo = PollingJobRepository::new(db);

        let job = repo.start(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        repo.fail(
            job.id,
            PollCounters {
                fetched: 3,
                created: 1,
                updated: 0,
                skipped: 0,
            },
            800,
            "provider returned 500",
            Some(serde_json::json!({"status": 500})),
        )
        .await
        .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 0);

        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(
            recent[0].error_message.as_deref(),
            Some("provider returned 500")
        );
        assert_eq!(recent[0].events_fetched, 3);
    }

    #[tokio::test]
    async fn retention_spares_running_jobs() {
        let db = setup().await;
        let repo = PollingJobRepository::new(Arc::clone(&db));

        let old_done = repo.start(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        repo.complete(old_done.id, PollCounters::default(), 10)
            .await
            .unwrap();
        let old_running = repo.start(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();

        // Age both rows past the cutoff.
        for id in [old_done.id, old_running.id] {
            let mut active = ActiveModel {
                id: Set(id),
                ..Default::default()
            };
            active.started_at = Set((Utc::now() - Duration::days(40)).into());
            Entity::update(active).exec(&*db).await.unwrap();
        }

        let removed = repo.delete_older_than(30).await.unwrap();
        assert_eq!(removed, 1);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 0);
    }
}
