use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::headers::{Cookie, HeaderMapExt};

use crate::AppState;
use crate::auth::{SESSION_COOKIE, SessionUser};
use crate::error::AppError;

/// Axum middleware that requires a signed-in session and injects a
/// [`SessionUser`] into request extensions.
///
/// The token is taken from `Authorization: Bearer`, falling back to the
/// session cookie. With auth disabled an anonymous user is injected.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.config.auth.enabled {
        request.extensions_mut().insert(SessionUser::anonymous());
        return Ok(next.run(request).await);
    }

    let token = extract_session_token(request.headers())
        .ok_or_else(|| AppError::Unauthorized("Sign in to use the chat".to_string()))?;

    let user = state.sessions.verify(&token).ok_or_else(|| {
        tracing::debug!("Rejected unknown session token");
        AppError::Unauthorized("Sign in to use the chat".to_string())
    })?;

    tracing::debug!(user = %user.user, "Authenticated request");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Session token from the Bearer header or the session cookie.
fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(SESSION_COOKIE).map(str::to_string))
        .filter(|t| !t.is_empty())
}
