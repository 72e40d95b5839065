//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the Booksync API.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

pub mod health;
pub mod oauth;
pub mod polling;
pub mod webhooks;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness/readiness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthzResponse {
    /// Overall status ("ok" when the database responds)
    pub status: String,
}

/// Health check that pings the database
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthzResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<HealthzResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = ?err, "Database health check failed");
        ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unavailable",
        )
    })?;

    Ok(Json(HealthzResponse {
        status: "ok".to_string(),
    }))
}

#[cfg(test)]
mod tests;
