use axum::{
    extract::State,
    http::header::SET_COOKIE,
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::{CurrentTenant, cleared_session_cookie};
use crate::error::HubError;
use crate::state::AppState;

/// Build the session lifecycle sub-router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/logout", post(post_logout))
        .route("/api/heartbeat", post(post_heartbeat))
        .route("/api/cleanup", post(post_cleanup))
        .route("/api/beacon-cleanup", any(beacon_cleanup))
}

/// POST /api/logout — Stop everything, delete the tenant, clear the cookie.
async fn post_logout(
    State(state): State<Arc<AppState>>,
    tenant: Option<CurrentTenant>,
) -> Result<Response, HubError> {
    if let Some(CurrentTenant(tenant)) = tenant {
        state.destroy_tenant(&tenant.id).await?;
        tracing::info!("tenant {} logged out", tenant.id);
    }
    let body = Json(json!({ "success": true, "message": "Logged out successfully and data cleared" }));
    Ok(([(SET_COOKIE, cleared_session_cookie())], body).into_response())
}

/// POST /api/heartbeat — Session middleware already refreshed last activity.
async fn post_heartbeat(CurrentTenant(_tenant): CurrentTenant) -> Json<Value> {
    Json(json!({ "success": true, "timestamp": chrono::Utc::now().to_rfc3339() }))
}

/// POST /api/cleanup — Stop everything and delete the tenant.
async fn post_cleanup(
    State(state): State<Arc<AppState>>,
    tenant: Option<CurrentTenant>,
) -> Result<Json<Value>, HubError> {
    if let Some(CurrentTenant(tenant)) = tenant {
        state.destroy_tenant(&tenant.id).await?;
    }
    Ok(Json(json!({ "success": true, "message": "Data cleaned up successfully" })))
}

/// ANY /api/beacon-cleanup — Best-effort cleanup sent on page unload.
async fn beacon_cleanup(
    State(state): State<Arc<AppState>>,
    tenant: Option<CurrentTenant>,
) -> Result<Json<Value>, HubError> {
    if let Some(CurrentTenant(tenant)) = tenant {
        state.destroy_tenant(&tenant.id).await?;
    }
    Ok(Json(json!({ "success": true, "message": "Beacon cleanup completed" })))
}
