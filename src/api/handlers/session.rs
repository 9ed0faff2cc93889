//! Session endpoints for cookie and bearer auth.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{error, warn};

use super::{
    principal::{bounded, query_assurance, resolve_session, trust_store},
    types::{ClientStorageSnapshot, LoginRequest, LoginResponse, SessionResponse},
};
use crate::{
    api::state::{AuthConfig, AuthState},
    gate::Assurance,
    identity::{AuthTokens, ProviderError, Session},
    trust::cookies::{SameSite, SetCookie, cookie_value},
};

pub const SESSION_COOKIE_NAME: &str = "folio_session";
pub const REFRESH_COOKIE_NAME: &str = "folio_refresh";

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 400, description = "Missing payload"),
        (status = 401, description = "Invalid email or password"),
        (status = 502, description = "Identity provider unavailable")
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let email = request.email.trim();
    if email.is_empty() || request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Email and password are required").into_response();
    }

    let timeout = auth_state.config().identity_timeout();
    let tokens = match bounded(
        timeout,
        auth_state
            .provider()
            .sign_in_with_password(email, &request.password),
    )
    .await
    {
        Ok(tokens) => tokens,
        Err(ProviderError::Unauthorized | ProviderError::Rejected { status: 400..=499, .. }) => {
            return (StatusCode::UNAUTHORIZED, "Invalid email or password").into_response();
        }
        Err(err) => {
            error!("Password sign-in failed: {err}");
            return (StatusCode::BAD_GATEWAY, "Identity provider unavailable").into_response();
        }
    };

    let mut headers = HeaderMap::new();
    append_session_cookies(&mut headers, auth_state.config(), &tokens);
    let response = LoginResponse {
        redirect_to: auth_state.gate().config().dashboard_path().to_string(),
    };
    (StatusCode::OK, headers, Json(response)).into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        let timeout = auth_state.config().identity_timeout();
        if let Err(err) = bounded(timeout, auth_state.provider().sign_out(&token)).await {
            warn!("Provider sign-out failed: {err}");
        }
    }

    // Always clear the cookies, even if the provider call failed.
    let mut response_headers = HeaderMap::new();
    append_cleared_session_cookies(&mut response_headers, auth_state.config());
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let resolved = resolve_session(&auth_state, &headers, false).await;
    let (Session::Authenticated(user), Some(access_token)) =
        (resolved.session, resolved.access_token)
    else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let levels = match query_assurance(&auth_state, &access_token).await {
        Assurance::Known(levels) => Some(levels),
        Assurance::Unavailable => None,
    };
    // Read-only: the session probe never revokes, that is left to the gate.
    let store = trust_store(&auth_state, &headers, &user.id, ClientStorageSnapshot::new());
    let trusted_until = store.expires_at();

    let response = SessionResponse {
        user_id: user.id,
        email: user.email,
        roles: user.roles,
        current_level: levels.map(|l| l.current),
        required_level: levels.map(|l| l.required),
        device_trusted: trusted_until.is_some(),
        trusted_until: trusted_until.map(|at| at.to_rfc3339()),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Append `folio_session` and `folio_refresh` cookies for fresh tokens.
pub(crate) fn append_session_cookies(
    headers: &mut HeaderMap,
    config: &AuthConfig,
    tokens: &AuthTokens,
) {
    let cookies = [
        session_cookie(
            config,
            SESSION_COOKIE_NAME,
            &tokens.access_token,
            tokens.expires_in,
        ),
        session_cookie(
            config,
            REFRESH_COOKIE_NAME,
            &tokens.refresh_token,
            config.refresh_ttl_seconds(),
        ),
    ];
    append_all(headers, &cookies);
}

fn append_cleared_session_cookies(headers: &mut HeaderMap, config: &AuthConfig) {
    let cookies = [
        session_cookie(config, SESSION_COOKIE_NAME, "", 0),
        session_cookie(config, REFRESH_COOKIE_NAME, "", 0),
    ];
    append_all(headers, &cookies);
}

fn append_all(headers: &mut HeaderMap, cookies: &[SetCookie]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_header_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => error!("Failed to encode {} cookie: {err}", cookie.name),
        }
    }
}

fn session_cookie(config: &AuthConfig, name: &str, value: &str, max_age: i64) -> SetCookie {
    SetCookie {
        name: name.to_string(),
        value: value.to_string(),
        expires: None,
        max_age: Some(max_age),
        same_site: SameSite::Lax,
        // Only mark cookies secure when the frontend is served over HTTPS.
        secure: config.session_cookie_secure(),
        http_only: true,
    }
}

/// Access token from `Authorization: Bearer` or the session cookie.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    cookie_value(headers, SESSION_COOKIE_NAME)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
