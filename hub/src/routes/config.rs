use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde_json::{Value, json};
use std::sync::Arc;

use super::bots::parse_slot;
use crate::auth::CurrentTenant;
use crate::bot_config::ConfigPatch;
use crate::error::HubError;
use crate::state::AppState;

/// Build the config sub-router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/config/{bot_id}", get(get_config).post(post_config))
}

/// GET /api/config/{bot_id} — Stored record, or the slot preset.
async fn get_config(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
    Path(bot_id): Path<String>,
) -> Result<Json<Value>, HubError> {
    let slot = parse_slot(&bot_id)?;
    let sup = state.supervisor_for(&tenant)?;
    let config = sup.store().load(slot);
    Ok(Json(json!({ "success": true, "data": config })))
}

/// POST /api/config/{bot_id} — Merge the supplied fields over the stored record.
async fn post_config(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
    Path(bot_id): Path<String>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<Value>, HubError> {
    let slot = parse_slot(&bot_id)?;
    let sup = state.supervisor_for(&tenant)?;
    let config = sup.store().save(slot, patch)?;
    tracing::info!(tenant = %tenant.id, %slot, "config saved");
    Ok(Json(json!({
        "success": true,
        "message": format!("Configuration saved for {slot}"),
        "config": config,
    })))
}
