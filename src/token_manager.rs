//! # Token Manager
//!
//! Serves valid access tokens for provider API calls. Unexpired tokens are
//! answered from an in-process cache without touching the database; tokens
//! within the expiry buffer are refreshed before use, and concurrent callers
//! for the same credential are collapsed into a single refresh via a
//! per-credential lock. A rejected refresh deactivates the credential.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DbErr;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::calendly::{CalendlyClient, CalendlyError};
use crate::config::TokenManagerConfig;
use crate::models::oauth_credential::Model as Credential;
use crate::repositories::CredentialRepository;
use crate::repositories::credential::TokenUpdate;

/// Errors surfaced when a usable access token cannot be produced
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("credential {0} is not active")]
    CredentialInactive(Uuid),

    #[error("credential {0} has no refresh token")]
    MissingRefreshToken(Uuid),

    #[error("token refresh rejected by provider: {0}")]
    RefreshRejected(String),

    #[error("provider error during refresh: {0}")]
    Provider(#[from] CalendlyError),

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Access token held in the in-process cache
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Token manager with an in-process cache and per-credential single-flight
/// refresh
pub struct TokenManager {
    credentials: Arc<CredentialRepository>,
    client: CalendlyClient,
    expiry_buffer: Duration,
    cache: Mutex<HashMap<Uuid, CachedToken>>,
    refresh_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        credentials: Arc<CredentialRepository>,
        client: CalendlyClient,
        config: &TokenManagerConfig,
    ) -> Self {
        Self {
            credentials,
            client,
            expiry_buffer: Duration::seconds(config.expiry_buffer_seconds as i64),
            cache: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return an access token valid for at least the expiry buffer.
    #[instrument(skip(self))]
    pub async fn get_access_token(&self, credential_id: Uuid) -> Result<String, TokenError> {
        if let Some(token) = self.cached_token(credential_id).await {
            counter!("token_manager_cache_hits_total").increment(1);
            return Ok(token);
        }

        let credential = self.load_active(credential_id).await?;
        if let Some(token) = self.fresh_token(&credential) {
            self.store_cached(&credential).await;
            return Ok(token);
        }

        // Stale: take the per-credential lock so only one caller refreshes.
        let lock = self.lock_for(credential_id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock; a concurrent caller may have finished the
        // refresh while we waited.
        let credential = self.load_active(credential_id).await?;
        if let Some(token) = self.fresh_token(&credential) {
            self.store_cached(&credential).await;
            return Ok(token);
        }

        self.refresh(credential).await
    }

    /// Drop one credential's cached token, forcing the next call back to the
    /// stored credential.
    pub async fn invalidate(&self, credential_id: Uuid) {
        self.cache.lock().await.remove(&credential_id);
    }

    /// Drop every cached token.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn cached_token(&self, credential_id: Uuid) -> Option<String> {
        let cache = self.cache.lock().await;
        let entry = cache.get(&credential_id)?;
        if entry.expires_at > (Utc::now() + self.expiry_buffer) {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }

    async fn store_cached(&self, credential: &Credential) {
        let (Some(access_token), Some(expires_at)) =
            (credential.access_token.clone(), credential.expires_at)
        else {
            return;
        };
        self.cache.lock().await.insert(
            credential.id,
            CachedToken {
                access_token,
                expires_at: expires_at.into(),
            },
        );
    }

    async fn load_active(&self, credential_id: Uuid) -> Result<Credential, TokenError> {
        let credential = self
            .credentials
            .find_by_id(credential_id)
            .await?
            .ok_or(TokenError::CredentialNotFound(credential_id))?;

        if !credential.is_active {
            return Err(TokenError::CredentialInactive(credential_id));
        }

        Ok(credential)
    }

    /// The stored access token, if it is still outside the expiry buffer.
    fn fresh_token(&self, credential: &Credential) -> Option<String> {
        let access_token = credential.access_token.clone()?;
        let expires_at = credential.expires_at?;
        if expires_at > (Utc::now() + self.expiry_buffer) {
            Some(access_token)
        } else {
            None
        }
    }

    async fn refresh(&self, credential: Credential) -> Result<String, TokenError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(TokenError::MissingRefreshToken(credential.id))?;

        match self.client.refresh_token(&refresh_token).await {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                let expires_at = Utc::now() + Duration::seconds(tokens.expires_in);
                self.credentials
                    .update_tokens(
                        credential.id,
                        TokenUpdate {
                            access_token: tokens.access_token,
                            refresh_token: tokens.refresh_token,
                            expires_at,
                        },
                    )
                    .await?;
                self.cache.lock().await.insert(
                    credential.id,
                    CachedToken {
                        access_token: access_token.clone(),
                        expires_at,
                    },
                );

                counter!("token_manager_refresh_total", "outcome" => "success").increment(1);
                info!(credential_id = %credential.id, "Refreshed provider access token");
                Ok(access_token)
            }
            Err(CalendlyError::OAuthError(message)) => {
                // The refresh token is dead; the workspace must reconnect.
                warn!(
                    credential_id = %credential.id,
                    "Token refresh rejected, deactivating credential"
                );
                self.invalidate(credential.id).await;
                self.credentials.deactivate(credential.id).await?;
                counter!("token_manager_refresh_total", "outcome" => "rejected").increment(1);
                Err(TokenError::RefreshRejected(message))
            }
            Err(err) => {
                // Transient transport errors leave the credential active.
                counter!("token_manager_refresh_total", "outcome" => "error").increment(1);
                Err(err.into())
            }
        }
    }

    async fn lock_for(&self, credential_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(locks.entry(credential_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendly::CalendlyConfig;
    use crate::models::oauth_credential::PlanTier;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, DatabaseConnection};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (Arc<DatabaseConnection>, MockServer) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        (Arc::new(db), MockServer::start().await)
    }

    fn manager(db: Arc<DatabaseConnection>, server: &MockServer) -> TokenManager {
        TokenManager::new(
            Arc::new(CredentialRepository::new(db)),
            CalendlyClient::new(CalendlyConfig {
                client_id: "client-id".to_string(),
                client_secret: "client-secret".to_string(),
                redirect_uri: "http://localhost:8080/calendly/oauth/callback".to_string(),
                auth_base_url: server.uri(),
                api_base_url: server.uri(),
            }),
            &TokenManagerConfig {
                expiry_buffer_seconds: 300,
            },
        )
    }

    async fn seed_credential(
        db: Arc<DatabaseConnection>,
        expires_in_secs: i64,
    ) -> crate::models::oauth_credential::Model {
        let repo = CredentialRepository::new(db);
        repo.upsert_from_oauth(
            Uuid::new_v4(),
            TokenUpdate {
                access_token: "cached-token".to_string(),
                refresh_token: "refresh-token".to_string(),
                expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            },
            None,
            PlanTier::Free,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn fresh_token_is_served_without_refresh() {
        let (db, server) = setup().await;
        let credential = seed_credential(Arc::clone(&db), 3600).await;
        let manager = manager(db, &server);

        // No mock mounted: any provider call would fail the test.
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "cached-token");
    }

    #[tokio::test]
    async fn cache_serves_without_database_until_invalidated() {
        let (db, server) = setup().await;
        let credential = seed_credential(Arc::clone(&db), 3600).await;
        let manager = manager(Arc::clone(&db), &server);

        // First call loads from the database and fills the cache.
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "cached-token");

        // Rotate the stored token behind the manager's back; the cached copy
        // still answers.
        CredentialRepository::new(Arc::clone(&db))
            .update_tokens(
                credential.id,
                TokenUpdate {
                    access_token: "rotated-token".to_string(),
                    refresh_token: "refresh-token".to_string(),
                    expires_at: Utc::now() + Duration::seconds(3600),
                },
            )
            .await
            .unwrap();
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "cached-token");

        // Invalidation forces the next call back to the stored credential.
        manager.invalidate(credential.id).await;
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "rotated-token");
    }

    #[tokio::test]
    async fn token_inside_buffer_triggers_refresh_and_persists() {
        let (db, server) = setup().await;
        // Expires in 60s, inside the 300s buffer.
        let credential = seed_credential(Arc::clone(&db), 60).await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-token",
                "refresh_token": "new-refresh",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(Arc::clone(&db), &server);
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "new-token");

        let reloaded = CredentialRepository::new(db)
            .find_by_id(credential.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.access_token.as_deref(), Some("new-token"));
        assert_eq!(reloaded.refresh_token.as_deref(), Some("new-refresh"));

        // Second call hits the freshly stored token, not the provider.
        let token = manager.get_access_token(credential.id).await.unwrap();
        assert_eq!(token, "new-token");
    }

    #[tokio::test]
    async fn rejected_refresh_deactivates_credential() {
        let (db, server) = setup().await;
        let credential = seed_credential(Arc::clone(&db), 60).await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let manager = manager(Arc::clone(&db), &server);
        let err = manager.get_access_token(credential.id).await.unwrap_err();
        assert!(matches!(err, TokenError::RefreshRejected(_)));

        let reloaded = CredentialRepository::new(db)
            .find_by_id(credential.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!reloaded.is_active);

        // Subsequent requests fail fast on the inactive credential.
        let err = manager.get_access_token(credential.id).await.unwrap_err();
        assert!(matches!(err, TokenError::CredentialInactive(_)));
    }

    #[tokio::test]
    async fn inactive_credential_is_refused() {
        let (db, server) = setup().await;
        let credential = seed_credential(Arc::clone(&db), 3600).await;
        CredentialRepository::new(Arc::clone(&db))
            .deactivate(credential.id)
            .await
            .unwrap();

        let manager = manager(db, &server);
        let err = manager.get_access_token(credential.id).await.unwrap_err();
        assert!(matches!(err, TokenError::CredentialInactive(_)));
    }
}
