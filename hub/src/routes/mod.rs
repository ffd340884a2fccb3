pub mod bots;
pub mod config;
pub mod session;

use axum::routing::get;
use axum::{Json, Router, middleware};
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::auth;
use crate::state::AppState;
use crate::ws;

/// Assemble the API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(bots::routes())
        .merge(config::routes())
        .merge(session::routes())
}

/// Full application: API, observer socket, health, static dashboard, all
/// behind the session middleware.
pub fn app(state: Arc<AppState>) -> Router {
    let static_dir = state.config.public_dir.clone();

    Router::new()
        .merge(api_router())
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(&static_dir).append_index_html_on_directories(true))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::session_layer))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `sessionId=...` pair from a Set-Cookie header.
    fn issued_cookie(response: &Response) -> Option<String> {
        let raw = response.headers().get(SET_COOKIE)?.to_str().ok()?;
        raw.split(';').next().map(str::to_string)
    }

    fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut req = Request::builder().uri(uri);
        if let Some(c) = cookie {
            req = req.header(COOKIE, c);
        }
        req.body(Body::empty()).unwrap()
    }

    fn post(uri: &str, cookie: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(COOKIE, cookie)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn fixture() -> (tempfile::TempDir, Arc<AppState>, Router) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(HubConfig::for_data_dir(dir.path().join("user_data")));
        let router = app(Arc::clone(&state));
        (dir, state, router)
    }

    async fn new_session(router: &Router) -> String {
        let response = router.clone().oneshot(get("/api/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        issued_cookie(&response).expect("fresh session cookie")
    }

    #[tokio::test]
    async fn first_request_issues_a_session_and_reuses_it() {
        let (_dir, state, router) = fixture();

        let response = router.clone().oneshot(get("/api/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap().to_string();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Max-Age=86400"));
        let body = body_json(response).await;
        assert_eq!(body["runningBots"], 0);
        assert_eq!(body["bots"].as_array().unwrap().len(), 3);

        let cookie = set_cookie.split(';').next().unwrap().to_string();
        let again = router.clone().oneshot(get("/api/status", Some(&cookie))).await.unwrap();
        assert!(again.headers().get(SET_COOKIE).is_none());
        assert_eq!(state.sessions.session_count(), 1);

        // Unknown tokens silently get a fresh tenant.
        let stale = router.oneshot(get("/api/status", Some("sessionId=deadbeef"))).await.unwrap();
        assert_eq!(stale.status(), StatusCode::OK);
        assert!(issued_cookie(&stale).is_some());
        assert_eq!(state.sessions.session_count(), 2);
    }

    #[tokio::test]
    async fn unknown_action_or_slot_is_bad_request() {
        let (_dir, _state, router) = fixture();
        let cookie = new_session(&router).await;

        let bad_action = router.clone().oneshot(post("/api/bot/restart/bot1", &cookie, json!({}))).await.unwrap();
        assert_eq!(bad_action.status(), StatusCode::BAD_REQUEST);

        let bad_slot = router.clone().oneshot(post("/api/bot/start/bot9", &cookie, json!({}))).await.unwrap();
        assert_eq!(bad_slot.status(), StatusCode::BAD_REQUEST);

        let bad_bulk = router.oneshot(post("/api/bot/launch", &cookie, json!({}))).await.unwrap();
        assert_eq!(bad_bulk.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn starting_a_default_slot_reports_every_violation() {
        let (_dir, _state, router) = fixture();
        let cookie = new_session(&router).await;

        let response = router.clone().oneshot(post("/api/bot/start/bot1", &cookie, json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        let errors: Vec<String> = serde_json::from_value(body["errors"].clone()).unwrap();
        assert!(errors.contains(&"Private key is required".to_string()));

        let bulk = body_json(router.clone().oneshot(post("/api/bot/start", &cookie, json!({}))).await.unwrap()).await;
        assert_eq!(bulk["success"], false);
        assert_eq!(bulk["message"], "Started 0 bots, 3 failed");

        let stop = body_json(router.oneshot(post("/api/bot/stop/bot2", &cookie, json!({}))).await.unwrap()).await;
        assert_eq!(stop["success"], false);
        assert_eq!(stop["message"], "Bot is not running");
    }

    #[tokio::test]
    async fn config_save_merges_and_rejects_bad_numbers() {
        let (_dir, _state, router) = fixture();
        let cookie = new_session(&router).await;

        let saved = router
            .clone()
            .oneshot(post("/api/config/bot1", &cookie, json!({ "tokenAddress": "X" })))
            .await
            .unwrap();
        assert_eq!(saved.status(), StatusCode::OK);
        let saved = body_json(saved).await;
        assert_eq!(saved["config"]["tokenAddress"], "X");
        assert!(saved["config"]["lastUpdated"].is_string());

        let loaded = body_json(router.clone().oneshot(get("/api/config/bot1", Some(&cookie))).await.unwrap()).await;
        assert_eq!(loaded["data"]["tokenAddress"], "X");
        assert_eq!(loaded["data"]["buyPercentage"], "60");
        assert_eq!(loaded["data"]["tradeIntervalMax"], "180");

        let rejected = router
            .clone()
            .oneshot(post("/api/config/bot1", &cookie, json!({ "buyPercentage": "150" })))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let rejected = body_json(rejected).await;
        assert_eq!(rejected["errors"][0], "Buy percentage must be between 0 and 100");

        let after = body_json(router.oneshot(get("/api/config/bot1", Some(&cookie))).await.unwrap()).await;
        assert_eq!(after["data"]["buyPercentage"], "60");
    }

    #[tokio::test]
    async fn logout_destroys_the_tenant_and_clears_the_cookie() {
        let (_dir, state, router) = fixture();
        let cookie = new_session(&router).await;
        let tenant = state.sessions.tenant_ids().pop().unwrap();
        let tenant_dir = state.sessions.root().join(tenant.as_str());
        assert!(tenant_dir.exists());

        let response = router.clone().oneshot(post("/api/logout", &cookie, json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));
        assert!(!tenant_dir.exists());
        assert!(!state.sessions.tenant_exists(&tenant));
        assert!(state.tenants.get(&tenant).is_none());
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn beacon_cleanup_never_issues_a_session() {
        let (_dir, state, router) = fixture();

        let response = router.clone().oneshot(get("/api/beacon-cleanup", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(state.sessions.session_count(), 0);

        let cookie = new_session(&router).await;
        let response = router.oneshot(post("/api/beacon-cleanup", &cookie, json!({}))).await.unwrap();
        assert_eq!(body_json(response).await["success"], true);
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_without_a_session_issues_nothing() {
        let (_dir, state, router) = fixture();

        let request = Request::builder().method("POST").uri("/api/cleanup").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());
        assert_eq!(state.sessions.session_count(), 0);

        let cookie = new_session(&router).await;
        let response = router.oneshot(post("/api/cleanup", &cookie, json!({}))).await.unwrap();
        assert_eq!(body_json(response).await["message"], "Data cleaned up successfully");
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn heartbeat_and_logs_answer_for_a_live_session() {
        let (_dir, _state, router) = fixture();
        let cookie = new_session(&router).await;

        let beat = body_json(router.clone().oneshot(post("/api/heartbeat", &cookie, json!({}))).await.unwrap()).await;
        assert_eq!(beat["success"], true);
        assert!(beat["timestamp"].is_string());

        let logs = body_json(router.oneshot(get("/api/logs?limit=5", Some(&cookie))).await.unwrap()).await;
        assert_eq!(logs, json!([]));
    }

    #[tokio::test]
    async fn observer_without_session_is_refused() {
        let (_dir, state, router) = fixture();
        let response = router.oneshot(get("/ws", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn health_is_open() {
        let (_dir, state, router) = fixture();
        let response = router.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.sessions.session_count(), 0);
    }
}
