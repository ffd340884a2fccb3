use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::HubError;
use crate::session::{SessionToken, Tenant};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sessionId";

/// Tenant bound to the request's session, inserted by [`session_layer`].
#[derive(Clone)]
pub struct CurrentTenant(pub Tenant);

impl<S: Send + Sync> FromRequestParts<S> for CurrentTenant {
    type Rejection = HubError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<CurrentTenant>().cloned().ok_or(HubError::Unauthorized)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for CurrentTenant {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentTenant>().cloned())
    }
}

/// Routes that only act on an existing session and never mint a new one.
fn issues_session(path: &str) -> bool {
    !matches!(
        path,
        "/health" | "/ws" | "/api/logout" | "/api/cleanup" | "/api/beacon-cleanup"
    )
}

/// Axum middleware: resolve the `sessionId` cookie to a tenant.
///
/// An unknown, expired or missing token silently gets a fresh tenant session
/// and the response carries the new cookie.
pub async fn session_layer(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    let resolved = session_cookie(request.headers()).and_then(|token| state.sessions.resolve_session(&token));

    let mut issued = None;
    let tenant = match resolved {
        Some(tenant) => Some(tenant),
        None if issues_session(request.uri().path()) => match state.sessions.create_tenant_session().await {
            Ok((tenant, token)) => {
                tracing::info!("new session for tenant {}", tenant.id);
                issued = Some(token);
                Some(tenant)
            }
            Err(e) => {
                tracing::error!("session creation failed: {e}");
                return e.into_response();
            }
        },
        None => None,
    };

    if let Some(tenant) = tenant {
        request.extensions_mut().insert(CurrentTenant(tenant));
    }

    let mut response = next.run(request).await;
    if let Some(token) = issued {
        let cookie = session_set_cookie(&token, state.config.session_max_age.as_secs(), state.config.secure_cookies);
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

/// Value of the `sessionId` cookie, if any request cookie carries one.
pub fn session_cookie(headers: &HeaderMap) -> Option<SessionToken> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| SessionToken::from(value))
}

pub fn session_set_cookie(token: &SessionToken, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={}; HttpOnly; Path=/; Max-Age={max_age_secs}; SameSite=Lax",
        token.as_str()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn cleared_session_cookie() -> HeaderValue {
    HeaderValue::from_static("sessionId=; HttpOnly; Path=/; Max-Age=0; SameSite=Lax")
}
