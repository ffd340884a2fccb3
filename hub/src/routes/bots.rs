use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::CurrentTenant;
use crate::error::HubError;
use crate::state::AppState;
use crate::subprocess::logs::{LOG_CAPACITY, LogEntry};
use crate::subprocess::supervisor::{StartError, WorkerSupervisor};
use crate::subprocess::{SlotId, StatusSnapshot};

const DEFAULT_LOG_LIMIT: usize = 100;

/// Build the bot control sub-router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/logs", get(get_logs))
        .route("/api/bot/{action}/{bot_id}", post(post_slot_action))
        .route("/api/bot/{action}", post(post_bulk_action))
}

// ── Operations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Start,
    Stop,
}

impl FromStr for BotAction {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(HubError::BadRequest(format!("invalid action: {other}"))),
        }
    }
}

/// A control request against one tenant's supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Slot(BotAction, SlotId),
    All(BotAction),
}

/// Result body shared by every control operation.
#[derive(Debug, Serialize)]
pub struct ControlReply {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ControlReply {
    fn ok(message: String) -> Self {
        Self { success: true, message, errors: None }
    }

    fn failed(message: String) -> Self {
        Self { success: false, message, errors: None }
    }
}

impl ControlOp {
    pub fn apply(self, sup: &Arc<WorkerSupervisor>) -> ControlReply {
        match self {
            Self::Slot(BotAction::Start, slot) => {
                let name = slot.display_name();
                match sup.start(slot) {
                    Ok(()) => ControlReply::ok(format!("{name} is starting...")),
                    Err(StartError::AlreadyRunning) => ControlReply::failed("Bot is already running".into()),
                    Err(StartError::Invalid(errors)) => ControlReply {
                        success: false,
                        message: format!("Configuration errors for {name}"),
                        errors: Some(errors),
                    },
                    Err(StartError::Materialize(_)) => {
                        ControlReply::failed(format!("Failed to create environment file for {name}"))
                    }
                    Err(e) => ControlReply::failed(format!("Failed to start {name}: {e}")),
                }
            }
            Self::Slot(BotAction::Stop, slot) => match sup.stop(slot) {
                Ok(()) => ControlReply::ok(format!("{} stopped successfully", slot.display_name())),
                Err(_) => ControlReply::failed("Bot is not running".into()),
            },
            Self::All(BotAction::Start) => {
                let outcome = sup.start_all();
                let mut message = format!("Started {} bots", outcome.succeeded);
                if outcome.failed > 0 {
                    message.push_str(&format!(", {} failed", outcome.failed));
                }
                ControlReply {
                    success: outcome.succeeded > 0,
                    message,
                    errors: None,
                }
            }
            Self::All(BotAction::Stop) => {
                let outcome = sup.stop_all();
                ControlReply {
                    success: outcome.succeeded > 0,
                    message: format!("Stopped {} bots", outcome.succeeded),
                    errors: None,
                }
            }
        }
    }
}

pub(crate) fn parse_slot(raw: &str) -> Result<SlotId, HubError> {
    raw.parse::<SlotId>().map_err(HubError::BadRequest)
}

// ── Handlers ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// GET /api/status — Per-slot state plus running count.
async fn get_status(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
) -> Result<Json<StatusSnapshot>, HubError> {
    Ok(Json(state.supervisor_for(&tenant)?.status()))
}

/// GET /api/logs?limit=N — Newest-first log tail.
async fn get_logs(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, HubError> {
    let limit = q.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(LOG_CAPACITY);
    Ok(Json(state.supervisor_for(&tenant)?.logs(limit)))
}

/// POST /api/bot/{action}/{bot_id}
async fn post_slot_action(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
    Path((action, bot_id)): Path<(String, String)>,
) -> Result<Json<ControlReply>, HubError> {
    let op = ControlOp::Slot(action.parse()?, parse_slot(&bot_id)?);
    let sup = state.supervisor_for(&tenant)?;
    Ok(Json(op.apply(&sup)))
}

/// POST /api/bot/{action} — start-all / stop-all.
async fn post_bulk_action(
    State(state): State<Arc<AppState>>,
    CurrentTenant(tenant): CurrentTenant,
    Path(action): Path<String>,
) -> Result<Json<ControlReply>, HubError> {
    let op = ControlOp::All(action.parse()?);
    let sup = state.supervisor_for(&tenant)?;
    Ok(Json(op.apply(&sup)))
}
