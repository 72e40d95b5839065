//! HTTP surface tests that exercise the full router, including the auth
//! middleware and the public webhook and OAuth callback routes.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, EntityTrait};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::MockServer;

use crate::config::AppConfig;
use crate::handlers::webhooks::SIGNATURE_HEADER;
use crate::models::oauth_credential::PlanTier;
use crate::models::workflow;
use crate::poll_scheduler::PollScheduler;
use crate::repositories::CredentialRepository;
use crate::repositories::credential::TokenUpdate;
use crate::server::{AppState, build_state, create_app};

const OPERATOR_TOKEN: &str = "operator-token";
const SIGNING_KEY: &str = "signing-key";

struct Fixture {
    app: Router,
    state: AppState,
    db: Arc<DatabaseConnection>,
    server: MockServer,
    // Held so the manual trigger channel stays open.
    _scheduler: PollScheduler,
}

async fn fixture() -> Fixture {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let db = Arc::new(db);
    let server = MockServer::start().await;

    let config = Arc::new(AppConfig {
        operator_tokens: vec![OPERATOR_TOKEN.to_string()],
        calendly_client_id: Some("client-id".to_string()),
        calendly_client_secret: Some("client-secret".to_string()),
        calendly_auth_base: server.uri(),
        calendly_api_base: server.uri(),
        ..AppConfig::default()
    });

    let (state, scheduler) = build_state(config, Arc::clone(&db));
    Fixture {
        app: create_app(state.clone()),
        state,
        db,
        server,
        _scheduler: scheduler,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", OPERATOR_TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sign(payload: &str) -> String {
    let timestamp = "1700000000";
    let mut mac = Hmac::<Sha256>::new_from_slice(SIGNING_KEY.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("v1,{timestamp},{}", hex::encode(mac.finalize().into_bytes()))
}

async fn seed_pro_credential(
    db: Arc<DatabaseConnection>,
) -> crate::models::oauth_credential::Model {
    let repo = CredentialRepository::new(Arc::clone(&db));
    let credential = repo
        .upsert_from_oauth(
            Uuid::new_v4(),
            TokenUpdate {
                access_token: "token".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            },
            Some("owner@example.com".to_string()),
            PlanTier::Pro,
            None,
        )
        .await
        .unwrap();
    repo.set_webhook_registration(
        credential.id,
        "https://example.com/calendly/webhooks",
        Some(SIGNING_KEY.to_string()),
    )
    .await
    .unwrap();
    repo.find_by_id(credential.id).await.unwrap().unwrap()
}

async fn seed_workflow(db: &DatabaseConnection, workspace_id: Uuid) {
    let now = Utc::now();
    let model = workflow::Model {
        id: Uuid::new_v4(),
        workspace_id,
        name: "Default".to_string(),
        status: "active".to_string(),
        created_at: now.into(),
        updated_at: now.into(),
    };
    workflow::Entity::insert(workflow::ActiveModel::from(model))
        .exec_without_returning(db)
        .await
        .unwrap();
}

fn created_payload(event_id: &str) -> String {
    serde_json::json!({
        "event": "invitee.created",
        "created_at": Utc::now().to_rfc3339(),
        "payload": {
            "uri": format!("https://api.calendly.com/scheduled_events/{event_id}"),
            "time": (Utc::now() + Duration::hours(2)).to_rfc3339(),
            "invitee": {
                "email": "jane@example.com",
                "name": "Jane Doe",
                "timezone": "Europe/Berlin"
            },
            "event_type": {
                "name": "Intro call",
                "duration": 30
            }
        }
    })
    .to_string()
}

#[tokio::test]
async fn root_reports_service_info() {
    let fixture = fixture().await;

    let response = fixture.app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["service"], "booksync");
}

#[tokio::test]
async fn healthz_pings_the_database() {
    let fixture = fixture().await;

    let response = fixture.app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(get("/booking/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fixture
        .app
        .clone()
        .oneshot(authed("GET", "/booking/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["dead_letters"]["total"], 0);
    assert_eq!(body["poll_jobs"]["total"], 0);
}

#[tokio::test]
async fn webhook_delivery_roundtrip_and_redelivery() {
    let fixture = fixture().await;
    let credential = seed_pro_credential(Arc::clone(&fixture.db)).await;
    seed_workflow(&fixture.db, credential.workspace_id).await;

    let payload = created_payload("EVH1");
    let request = || {
        Request::builder()
            .method("POST")
            .uri(format!("/calendly/webhooks/{}", credential.id))
            .header(SIGNATURE_HEADER, sign(&payload))
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let response = fixture.app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Webhook processed successfully");

    // The provider redelivers; the idempotency gate answers 200 without
    // creating a second booking.
    let response = fixture.app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Event already processed");
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let fixture = fixture().await;
    let credential = seed_pro_credential(Arc::clone(&fixture.db)).await;

    let response = fixture
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/calendly/webhooks/{}", credential.id))
                .header(SIGNATURE_HEADER, "v1,1700000000,deadbeef")
                .body(Body::from(created_payload("EVH2")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_credential_is_404() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/calendly/webhooks/{}", Uuid::new_v4()))
                .header(SIGNATURE_HEADER, "v1,1700000000,deadbeef")
                .body(Body::from(created_payload("EVH3")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn authorize_redirects_to_provider_and_state_roundtrips() {
    let fixture = fixture().await;
    let workspace_id = Uuid::new_v4();

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/calendly/oauth/authorize?workspace_id={workspace_id}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(location.starts_with(&fixture.server.uri()));

    let url = url::Url::parse(&location).unwrap();
    let state = url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.to_string())
        .unwrap();

    // Callback without a code consumes the state and reports missing_code.
    let response = fixture
        .app
        .clone()
        .oneshot(get(&format!("/calendly/oauth/callback?state={state}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("calendly=error"));
    assert!(location.contains("reason=missing_code"));
}

#[tokio::test]
async fn callback_with_unknown_state_reports_expiry() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(get("/calendly/oauth/callback?state=no-such-state&code=abc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.contains("reason=state_expired"));
}

#[tokio::test]
async fn connection_status_reports_disconnected_workspace() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/calendly/connection/{}", Uuid::new_v4()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn connection_status_reflects_seeded_credential() {
    let fixture = fixture().await;
    let credential = seed_pro_credential(Arc::clone(&fixture.db)).await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/calendly/connection/{}", credential.workspace_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["connected"], true);
    assert_eq!(body["plan"], "PRO");
    assert_eq!(body["provider_email"], "owner@example.com");
    assert_eq!(body["webhook_enabled"], true);
}

#[tokio::test]
async fn disconnect_deactivates_the_credential() {
    let fixture = fixture().await;
    let credential = seed_pro_credential(Arc::clone(&fixture.db)).await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "DELETE",
            &format!("/calendly/connection/{}", credential.workspace_id),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let reloaded = CredentialRepository::new(Arc::clone(&fixture.db))
        .find_by_id(credential.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!reloaded.is_active);
}

#[tokio::test]
async fn booking_link_carries_lead_marker() {
    let fixture = fixture().await;
    let workspace_id = Uuid::new_v4();
    let lead_id = Uuid::new_v4();

    CredentialRepository::new(Arc::clone(&fixture.db))
        .upsert_from_oauth(
            workspace_id,
            TokenUpdate {
                access_token: "token".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            },
            Some("owner@example.com".to_string()),
            PlanTier::Pro,
            Some(serde_json::json!({"scheduling_url": "https://calendly.com/owner/intro"})),
        )
        .await
        .unwrap();

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/calendly/link/{workspace_id}/{lead_id}"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["provider"], "CALENDLY");
    assert_eq!(
        body["link"],
        format!("https://calendly.com/owner/intro?utm_content=lead_{lead_id}")
    );

    // A workspace with no connection still gets 200, with both fields absent.
    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "GET",
            &format!("/calendly/link/{}/{lead_id}", Uuid::new_v4()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body.get("provider"), None);
    assert_eq!(body.get("link"), None);
}

#[tokio::test]
async fn manual_poll_of_webhook_credential_conflicts() {
    let fixture = fixture().await;
    // PRO credential: webhooks on, polling off.
    let credential = seed_pro_credential(Arc::clone(&fixture.db)).await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed("POST", &format!("/calendly/poll/{}", credential.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn resolving_unknown_dead_letter_is_404() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed(
            "POST",
            &format!("/booking/health/dlq/{}/resolve", Uuid::new_v4()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn manual_polling_trigger_is_accepted() {
    let fixture = fixture().await;

    let response = fixture
        .app
        .clone()
        .oneshot(authed("POST", "/booking/health/polling/trigger"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["triggered"], true);

    // The queue holds one pending trigger; a second request is a no-op.
    assert!(!fixture.state.poll_trigger.request());
}
