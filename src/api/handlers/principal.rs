//! Session resolution and authorization helpers shared by handlers and the gate.
//!
//! The access token is read from the bearer header or the session cookie and
//! resolved against the identity provider. Every provider call is bounded by
//! the configured timeout so a slow backend fails closed instead of hanging.

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::{future::Future, time::Duration};
use tracing::{error, warn};

use crate::{
    gate::Assurance,
    identity::{AuthTokens, ProviderError, Session, User},
    trust::{
        DeviceTrustStore,
        cookies::{RequestCookies, cookie_value},
        storage::ClientStorage,
    },
};

use super::{
    session::{REFRESH_COOKIE_NAME, extract_session_token},
    types::ClientStorageSnapshot,
};
use crate::api::state::AuthState;

/// Run a provider call under `timeout`, mapping expiry to [`ProviderError::Timeout`].
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(ProviderError::Timeout))
}

/// Session resolved for one request.
#[derive(Debug, Default)]
pub(crate) struct ResolvedSession {
    pub session: Session,
    pub access_token: Option<String>,
    /// Fresh tokens when the access token was rejected and the refresh token worked.
    pub refreshed: Option<AuthTokens>,
}

/// Resolve the caller's session.
///
/// Provider failures resolve to an anonymous session. With `allow_refresh`,
/// an expired access token is exchanged using the refresh cookie.
pub(crate) async fn resolve_session(
    state: &AuthState,
    headers: &HeaderMap,
    allow_refresh: bool,
) -> ResolvedSession {
    let timeout = state.config().identity_timeout();
    let Some(token) = extract_session_token(headers) else {
        return ResolvedSession::default();
    };

    match bounded(timeout, state.provider().get_session(&token)).await {
        Ok(user) => ResolvedSession {
            session: Session::Authenticated(user),
            access_token: Some(token),
            refreshed: None,
        },
        Err(ProviderError::Unauthorized) if allow_refresh => {
            refresh(state, headers).await.unwrap_or_default()
        }
        Err(ProviderError::Unauthorized) => ResolvedSession::default(),
        Err(err) => {
            error!("Failed to resolve session: {err}");
            ResolvedSession::default()
        }
    }
}

async fn refresh(state: &AuthState, headers: &HeaderMap) -> Option<ResolvedSession> {
    let timeout = state.config().identity_timeout();
    let refresh_token = cookie_value(headers, REFRESH_COOKIE_NAME)?;
    let tokens = match bounded(timeout, state.provider().refresh_session(&refresh_token)).await {
        Ok(tokens) => tokens,
        Err(ProviderError::Unauthorized) => return None,
        Err(err) => {
            warn!("Failed to refresh session: {err}");
            return None;
        }
    };
    match bounded(timeout, state.provider().get_session(&tokens.access_token)).await {
        Ok(user) => Some(ResolvedSession {
            session: Session::Authenticated(user),
            access_token: Some(tokens.access_token.clone()),
            refreshed: Some(tokens),
        }),
        Err(err) => {
            warn!("Refreshed session could not be resolved: {err}");
            None
        }
    }
}

/// Query assurance levels; any failure is reported as [`Assurance::Unavailable`].
pub(crate) async fn query_assurance(state: &AuthState, access_token: &str) -> Assurance {
    let timeout = state.config().identity_timeout();
    match bounded(timeout, state.provider().assurance_level(access_token)).await {
        Ok(levels) => Assurance::Known(levels),
        Err(err) => {
            error!("Failed to query assurance level: {err}");
            Assurance::Unavailable
        }
    }
}

/// Authenticated caller of an API handler.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user: User,
    pub access_token: String,
}

/// Resolve the caller, returning 401 without a session and 403 without the admin role.
pub(crate) async fn require_auth(
    state: &AuthState,
    headers: &HeaderMap,
) -> Result<Principal, Response> {
    let resolved = resolve_session(state, headers, false).await;
    let (Session::Authenticated(user), Some(access_token)) =
        (resolved.session, resolved.access_token)
    else {
        return Err((StatusCode::UNAUTHORIZED, "Not authenticated").into_response());
    };
    if let Some(role) = state.gate().config().required_role()
        && !user.has_role(role)
    {
        return Err((StatusCode::FORBIDDEN, "Forbidden").into_response());
    }
    Ok(Principal { user, access_token })
}

/// Like [`require_auth`], and additionally require the second factor or a trusted device.
pub(crate) async fn require_step_up(
    state: &AuthState,
    headers: &HeaderMap,
) -> Result<Principal, Response> {
    let principal = require_auth(state, headers).await?;
    let owes_second_factor = match query_assurance(state, &principal.access_token).await {
        Assurance::Known(levels) => levels.owes_second_factor(),
        Assurance::Unavailable => {
            return Err((StatusCode::FORBIDDEN, "Verification required").into_response());
        }
    };
    if owes_second_factor {
        let mut store = trust_store(state, headers, &principal.user.id, ClientStorageSnapshot::new());
        if !store.is_trusted() {
            return Err((StatusCode::FORBIDDEN, "Verification required").into_response());
        }
    }
    Ok(principal)
}

/// Trust store over the request cookies and the storage snapshot the browser sent.
pub(crate) fn trust_store(
    state: &AuthState,
    headers: &HeaderMap,
    subject: &str,
    snapshot: ClientStorageSnapshot,
) -> DeviceTrustStore<ClientStorage, RequestCookies> {
    DeviceTrustStore::new(
        ClientStorage::new(snapshot),
        RequestCookies::from_headers(headers),
        state.trust_key(),
        subject,
    )
}
