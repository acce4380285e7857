//! API Handlers
//!
//! HTTP request handlers for each permission endpoint.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::models::{CheckQuery, Decision, HealthResponse, InvalidateRequest, InvalidateResponse};
use crate::resilience::ErrorRecord;
use crate::resolver::{PermissionResolver, ResolverStats};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PermissionResolver>,
}

impl AppState {
    pub fn new(resolver: Arc<PermissionResolver>) -> Self {
        Self { resolver }
    }
}

/// Handler for GET /check
///
/// Resolves one permission check. Always answers with a decision; only a
/// malformed query is an error.
pub async fn check_handler(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Decision>> {
    let request = query.into_request().map_err(CacheError::InvalidRequest)?;
    let decision = state.resolver.check(&request).await;
    debug!(
        actor_id = %request.actor_id,
        allowed = decision.allowed,
        source = ?decision.source,
        "Check resolved"
    );
    Ok(Json(decision))
}

/// Handler for POST /invalidate
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    let target = req.into_invalidation().map_err(CacheError::InvalidRequest)?;
    let removed = state.resolver.invalidate(target).await;
    Ok(Json(InvalidateResponse::new(removed)))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<ResolverStats> {
    Json(state.resolver.cache_stats().await)
}

/// Handler for GET /errors
///
/// Most recent origin failures, oldest first.
pub async fn errors_handler(State(state): State<AppState>) -> Json<Vec<ErrorRecord>> {
    Json(state.resolver.recent_errors().await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = state.resolver.coordinator();
    Json(HealthResponse::new(
        state.resolver.connection_state(),
        coordinator.breaker_state().await,
        coordinator.is_offline_mode(),
    ))
}
