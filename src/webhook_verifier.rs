//! # Webhook Signature Verification
//!
//! HMAC-SHA256 verification of provider webhook deliveries with
//! constant-time comparison. The pure check never errors; any malformed
//! input is simply an invalid signature. The [`WebhookVerifier`] wrapper
//! feeds the per-credential failure streak that disables webhooks for a
//! connection after repeated bad deliveries.

use hmac::{Hmac, Mac};
use metrics::counter;
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use crate::repositories::CredentialRepository;

type HmacSha256 = Hmac<Sha256>;

/// Verify a `v1,<timestamp>,<hex>` signature header against a payload.
///
/// The signed message is `{timestamp}.{payload}` keyed with the signing key
/// stored at webhook registration. Returns `false` for any malformed header,
/// bad hex, or digest mismatch.
pub fn verify_signature(signing_key: &str, signature_header: &str, payload: &str) -> bool {
    let parts: Vec<&str> = signature_header.split(',').collect();
    if parts.len() < 3 || parts[0] != "v1" {
        return false;
    }
    let timestamp = parts[1];
    let provided_hex = parts[2];

    let Ok(mut mac) = HmacSha256::new_from_slice(signing_key.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    let expected = mac.finalize().into_bytes();

    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };

    // Constant-time comparison to prevent timing attacks.
    subtle::ConstantTimeEq::ct_eq(expected.as_slice(), provided.as_slice()).into()
}

/// Outcome of verifying one delivery against a stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    /// Signature matched; the failure streak was reset.
    Valid,
    /// Signature did not match; the streak was incremented.
    Invalid,
    /// Signature did not match and the streak crossed the disable
    /// threshold, so webhooks were turned off for this credential.
    InvalidAndDisabled,
    /// The credential has no signing key stored, so nothing can be
    /// verified.
    NoSigningKey,
}

/// Signature verification bound to the credential store
pub struct WebhookVerifier {
    credentials: Arc<CredentialRepository>,
}

impl WebhookVerifier {
    pub fn new(credentials: Arc<CredentialRepository>) -> Self {
        Self { credentials }
    }

    /// Verify a delivery and update the credential's failure streak.
    pub async fn verify_delivery(
        &self,
        credential: &crate::models::oauth_credential::Model,
        signature_header: &str,
        payload: &str,
    ) -> Result<DeliveryVerdict, sea_orm::DbErr> {
        let Some(signing_key) = credential.webhook_signing_key.as_deref() else {
            return Ok(DeliveryVerdict::NoSigningKey);
        };

        if verify_signature(signing_key, signature_header, payload) {
            self.credentials.record_webhook_success(credential.id).await?;
            counter!("webhook_signature_total", "outcome" => "valid").increment(1);
            return Ok(DeliveryVerdict::Valid);
        }

        counter!("webhook_signature_total", "outcome" => "invalid").increment(1);
        let disabled = self.credentials.record_webhook_failure(credential.id).await?;
        if disabled {
            warn!(
                credential_id = %credential.id,
                "Webhook failure streak crossed threshold, webhooks disabled"
            );
            counter!("webhook_credentials_disabled_total").increment(1);
            Ok(DeliveryVerdict::InvalidAndDisabled)
        } else {
            Ok(DeliveryVerdict::Invalid)
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

    use crate::models::oauth_credential::PlanTier;
    use crate::repositories::credential::{TokenUpdate, WEBHOOK_DISABLE_THRESHOLD};

    fn sign(key: &str, timestamp: &str, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        format!("v1,{timestamp},{}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_passes() {
        let header = sign("secret-key", "1700000000", r#"{"event":"invitee.created"}"#);
        assert!(verify_signature(
            "secret-key",
            &header,
            r#"{"event":"invitee.created"}"#
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let header = sign("secret-key", "1700000000", "payload");
        assert!(!verify_signature("other-key", &header, "payload"));
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign("secret-key", "1700000000", "payload");
        assert!(!verify_signature("secret-key", &header, "payload-tampered"));
    }

    #[test]
    fn malformed_headers_fail_quietly() {
        assert!(!verify_signature("key", "", "payload"));
        assert!(!verify_signature("key", "v1,1700000000", "payload"));
        assert!(!verify_signature("key", "v2,1700000000,deadbeef", "payload"));
        assert!(!verify_signature("key", "v1,1700000000,deadbeef", "payload"));
        assert!(!verify_signature("key", "v1,1700000000,not-hex!", "payload"));
    }

    #[test]
    fn timestamp_is_part_of_the_signed_message() {
        let header = sign("secret-key", "1700000000", "payload");
        let replayed = header.replace("1700000000", "1700000001");
        assert!(!verify_signature("secret-key", &replayed, "payload"));
    }

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    async fn seed_credential(
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
                None,
                PlanTier::Pro,
                None,
            )
            .await
            .unwrap();
        repo.set_webhook_registration(
            credential.id,
            "https://example.com/calendly/webhooks",
            Some("secret-key".to_string()),
        )
        .await
        .unwrap();
        repo.find_by_id(credential.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn streak_disables_webhooks_then_valid_delivery_resets_earlier() {
        let db = setup().await;
        let credential = seed_credential(Arc::clone(&db)).await;
        let verifier = WebhookVerifier::new(Arc::new(CredentialRepository::new(Arc::clone(&db))));

        for i in 1..=WEBHOOK_DISABLE_THRESHOLD {
            let verdict = verifier
                .verify_delivery(&credential, "v1,1700000000,deadbeef", "payload")
                .await
                .unwrap();
            if i < WEBHOOK_DISABLE_THRESHOLD {
                assert_eq!(verdict, DeliveryVerdict::Invalid);
            } else {
                assert_eq!(verdict, DeliveryVerdict::InvalidAndDisabled);
            }
        }

        let reloaded = CredentialRepository::new(db)
            .find_by_id(credential.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!reloaded.webhook_enabled);
    }

    #[tokio::test]
    async fn valid_delivery_resets_the_streak() {
        let db = setup().await;
        let credential = seed_credential(Arc::clone(&db)).await;
        let repo = Arc::new(CredentialRepository::new(Arc::clone(&db)));
        let verifier = WebhookVerifier::new(Arc::clone(&repo));

        for _ in 0..5 {
            verifier
                .verify_delivery(&credential, "v1,1700000000,deadbeef", "payload")
                .await
                .unwrap();
        }

        let header = sign("secret-key", "1700000000", "payload");
        let verdict = verifier
            .verify_delivery(&credential, &header, "payload")
            .await
            .unwrap();
        assert_eq!(verdict, DeliveryVerdict::Valid);

        let reloaded = repo.find_by_id(credential.id).await.unwrap().unwrap();
        assert_eq!(reloaded.webhook_failed_attempts, 0);
        assert!(reloaded.webhook_enabled);
    }

    #[tokio::test]
    async fn missing_signing_key_is_reported() {
        let db = setup().await;
        let repo = Arc::new(CredentialRepository::new(Arc::clone(&db)));
        let credential = repo
            .upsert_from_oauth(
                Uuid::new_v4(),
                TokenUpdate {
                    access_token: "token".to_string(),
                    refresh_token: "refresh".to_string(),
                    expires_at: Utc::now() + Duration::hours(1),
                },
                None,
                PlanTier::Free,
                None,
            )
            .await
            .unwrap();

        let verifier = WebhookVerifier::new(repo);
        let verdict = verifier
            .verify_delivery(&credential, "v1,1,aa", "payload")
            .await
            .unwrap();
        assert_eq!(verdict, DeliveryVerdict::NoSigningKey);
    }
}
