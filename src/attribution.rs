//! # Booking Attribution
//!
//! Matches an incoming booking invitee to a CRM lead. The ladder runs in
//! confidence order: a `lead_<uuid>` UTM content marker wins outright, an
//! exact email match comes second, and anything left becomes a new lead
//! under the workspace's default workflow. A workspace with no eligible
//! workflow cannot absorb unmatched bookings; that is a hard error so the
//! event lands in the dead letter queue instead of vanishing.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::booking::AttributionMethod;
use crate::models::lead::Model as Lead;
use crate::repositories::{LeadRepository, WorkflowRepository};

/// Marker prefix carried in `utm_content` by links the CRM generated.
pub const UTM_LEAD_PREFIX: &str = "lead_";

/// How certain the match is
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
}

/// A resolved attribution
#[derive(Debug, Clone)]
pub struct Attribution {
    pub lead: Lead,
    pub method: AttributionMethod,
    pub confidence: MatchConfidence,
    /// True when the invitee matched nothing and a lead was created.
    pub created_lead: bool,
}

#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("workspace {0} has no active or draft workflow for unmatched bookings")]
    NoWorkflow(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Invitee fields the ladder looks at
#[derive(Debug, Clone, Default)]
pub struct InviteeDetails {
    pub email: String,
    pub name: Option<String>,
    pub utm_content: Option<String>,
}

/// Resolves bookings to leads
pub struct AttributionMatcher {
    leads: Arc<LeadRepository>,
    workflows: Arc<WorkflowRepository>,
}

impl AttributionMatcher {
    pub fn new(leads: Arc<LeadRepository>, workflows: Arc<WorkflowRepository>) -> Self {
        Self { leads, workflows }
    }

    /// Run the ladder for one invitee.
    pub async fn attribute(
        &self,
        workspace_id: Uuid,
        invitee: &InviteeDetails,
    ) -> Result<Attribution, AttributionError> {
        if let Some(lead) = self.match_utm(workspace_id, invitee).await? {
            counter!("attribution_total", "method" => "utm").increment(1);
            return Ok(Attribution {
                lead,
                method: AttributionMethod::Utm,
                confidence: MatchConfidence::High,
                created_lead: false,
            });
        }

        let email = invitee.email.to_lowercase();
        if let Some(lead) = self
            .leads
            .find_most_recent_by_email(workspace_id, &email)
            .await?
        {
            counter!("attribution_total", "method" => "email").increment(1);
            return Ok(Attribution {
                lead,
                method: AttributionMethod::HiddenField,
                confidence: MatchConfidence::Medium,
                created_lead: false,
            });
        }

        let workflow = self
            .workflows
            .find_default_for_workspace(workspace_id)
            .await?
            .ok_or(AttributionError::NoWorkflow(workspace_id))?;

        let lead = self
            .leads
            .create_unmatched(workspace_id, workflow.id, &email, invitee.name.clone())
            .await?;
        counter!("attribution_total", "method" => "unmatched").increment(1);
        debug!(workspace_id = %workspace_id, lead_id = %lead.id, "Created lead for unmatched booking");

        Ok(Attribution {
            lead,
            method: AttributionMethod::Manual,
            confidence: MatchConfidence::Low,
            created_lead: true,
        })
    }

    /// Rung one: a `lead_<uuid>` marker in utm_content, scoped to the
    /// workspace. A marker that does not resolve falls through instead of
    /// failing; tracking fields are attacker-controlled input.
    async fn match_utm(
        &self,
        workspace_id: Uuid,
        invitee: &InviteeDetails,
    ) -> Result<Option<Lead>, AttributionError> {
        let Some(utm_content) = invitee.utm_content.as_deref() else {
            return Ok(None);
        };
        let Some(raw_id) = utm_content.strip_prefix(UTM_LEAD_PREFIX) else {
            return Ok(None);
        };
        let Ok(lead_id) = Uuid::parse_str(raw_id) else {
            warn!(utm_content, "Ignoring malformed lead marker in utm_content");
            return Ok(None);
        };

        let lead = self.leads.find_in_workspace(workspace_id, lead_id).await?;
        if lead.is_none() {
            warn!(%lead_id, %workspace_id, "utm_content lead marker does not resolve in workspace");
        }
        Ok(lead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection, EntityTrait};

    use crate::models::workflow;

    async fn setup() -> (Arc<DatabaseConnection>, AttributionMatcher) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let matcher = AttributionMatcher::new(
            Arc::new(LeadRepository::new(Arc::clone(&db))),
            Arc::new(WorkflowRepository::new(Arc::clone(&db))),
        );
        (db, matcher)
    }

    async fn insert_workflow(db: &DatabaseConnection, workspace_id: Uuid, status: &str) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let model = workflow::Model {
            id,
            workspace_id,
            name: "Default".to_string(),
            status: status.to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        workflow::Entity::insert(workflow::ActiveModel::from(model))
            .exec_without_returning(db)
            .await
            .unwrap();
        id
    }

    async fn insert_lead(db: Arc<DatabaseConnection>, workspace_id: Uuid, email: &str) -> Lead {
        let workflow_id = insert_workflow(&db, workspace_id, "active").await;
        LeadRepository::new(db)
            .create_unmatched(workspace_id, workflow_id, email, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn utm_marker_wins_even_when_email_differs() {
        let (db, matcher) = setup().await;
        let workspace_id = Uuid::new_v4();
        let lead = insert_lead(Arc::clone(&db), workspace_id, "original@example.com").await;

        let attribution = matcher
            .attribute(
                workspace_id,
                &InviteeDetails {
                    email: "different@example.com".to_string(),
                    name: None,
                    utm_content: Some(format!("lead_{}", lead.id)),
                },
            )
            .await
            .unwrap();

        assert_eq!(attribution.lead.id, lead.id);
        assert_eq!(attribution.method, AttributionMethod::Utm);
        assert_eq!(attribution.confidence, MatchConfidence::High);
        assert!(!attribution.created_lead);
    }

    #[tokio::test]
    async fn foreign_workspace_marker_falls_through_to_email() {
        let (db, matcher) = setup().await;
        let workspace_id = Uuid::new_v4();
        let other_lead = insert_lead(Arc::clone(&db), Uuid::new_v4(), "other@example.com").await;
        let own_lead = insert_lead(Arc::clone(&db), workspace_id, "jane@example.com").await;

        let attribution = matcher
            .attribute(
                workspace_id,
                &InviteeDetails {
                    email: "Jane@Example.com".to_string(),
                    name: None,
                    utm_content: Some(format!("lead_{}", other_lead.id)),
                },
            )
            .await
            .unwrap();

        assert_eq!(attribution.lead.id, own_lead.id);
        assert_eq!(attribution.method, AttributionMethod::HiddenField);
        assert_eq!(attribution.confidence, MatchConfidence::Medium);
    }

    #[tokio::test]
    async fn malformed_marker_falls_through() {
        let (db, matcher) = setup().await;
        let workspace_id = Uuid::new_v4();
        let lead = insert_lead(Arc::clone(&db), workspace_id, "jane@example.com").await;

        let attribution = matcher
            .attribute(
                workspace_id,
                &InviteeDetails {
                    email: "jane@example.com".to_string(),
                    name: None,
                    utm_content: Some("lead_not-a-uuid".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(attribution.lead.id, lead.id);
        assert_eq!(attribution.method, AttributionMethod::HiddenField);
    }

    #[tokio::test]
    async fn unmatched_invitee_creates_lead_under_default_workflow() {
        let (db, matcher) = setup().await;
        let workspace_id = Uuid::new_v4();
        let workflow_id = insert_workflow(&db, workspace_id, "draft").await;

        let attribution = matcher
            .attribute(
                workspace_id,
                &InviteeDetails {
                    email: "New@Example.com".to_string(),
                    name: Some("New Person".to_string()),
                    utm_content: None,
                },
            )
            .await
            .unwrap();

        assert!(attribution.created_lead);
        assert_eq!(attribution.method, AttributionMethod::Manual);
        assert_eq!(attribution.confidence, MatchConfidence::Low);
        assert_eq!(attribution.lead.email, "new@example.com");
        assert_eq!(attribution.lead.workflow_id, workflow_id);
    }

    #[tokio::test]
    async fn workspace_without_workflow_is_a_hard_error() {
        let (_db, matcher) = setup().await;

        let err = matcher
            .attribute(
                Uuid::new_v4(),
                &InviteeDetails {
                    email: "nobody@example.com".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AttributionError::NoWorkflow(_)));
    }
}
