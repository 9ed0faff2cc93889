//! Edge enforcement of the access gate.
//!
//! Every request under the protected prefix is evaluated before it reaches the
//! admin pages. Provider lookups only happen when the decision depends on them,
//! and any lookup failure denies access rather than letting the request through.

use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    handlers::{
        principal::{query_assurance, resolve_session, trust_store},
        session::append_session_cookies,
        types::ClientStorageSnapshot,
    },
    state::AuthState,
};
use crate::gate::{AccessDecision, Assurance, PathKind};

/// Gate outcome plus the `Set-Cookie` headers produced while evaluating it.
#[derive(Debug)]
pub(crate) struct Evaluation {
    pub decision: AccessDecision,
    set_cookies: HeaderMap,
}

impl Evaluation {
    fn allow() -> Self {
        Self {
            decision: AccessDecision::Allow,
            set_cookies: HeaderMap::new(),
        }
    }

    /// Append refreshed session cookies and trust revocations to `headers`.
    pub(crate) fn apply_cookies(&self, headers: &mut HeaderMap) {
        for value in self.set_cookies.get_all(SET_COOKIE) {
            headers.append(SET_COOKIE, value.clone());
        }
    }
}

/// Evaluate the gate for `path` with the caller's cookies.
pub(crate) async fn evaluate(state: &AuthState, path: &str, headers: &HeaderMap) -> Evaluation {
    let gate = state.gate();
    let kind = gate.classify(path);
    if matches!(kind, PathKind::Public | PathKind::Verify) {
        return Evaluation::allow();
    }

    let resolved = resolve_session(state, headers, true).await;
    let mut set_cookies = HeaderMap::new();
    if let Some(tokens) = &resolved.refreshed {
        debug!("Session refreshed at the gate");
        append_session_cookies(&mut set_cookies, state.config(), tokens);
    }

    let mut assurance = Assurance::Unavailable;
    let mut device_trusted = false;
    if gate.needs_assurance(kind, &resolved.session)
        && let (Some(user), Some(token)) = (resolved.session.user(), &resolved.access_token)
    {
        assurance = query_assurance(state, token).await;
        if let Assurance::Known(levels) = assurance
            && levels.owes_second_factor()
        {
            let mut store = trust_store(state, headers, &user.id, ClientStorageSnapshot::new());
            device_trusted = store.is_trusted();
            let (_, cookies) = store.into_parts();
            cookies.apply(&mut set_cookies);
        }
    }

    let decision = gate.decide(path, &resolved.session, &assurance, device_trusted);
    if decision == AccessDecision::Allow {
        debug!(path, "Access gate allowed request");
    } else {
        info!(path, decision = decision.as_str(), "Access gate redirected request");
    }
    Evaluation {
        decision,
        set_cookies,
    }
}

/// Middleware applying the gate to page requests.
pub async fn access_gate(
    Extension(state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let evaluation = evaluate(&state, &path, request.headers()).await;

    let mut response = match evaluation.decision.redirect_target(state.gate().config()) {
        Some(target) => Redirect::temporary(target).into_response(),
        None => next.run(request).await,
    };
    evaluation.apply_cookies(response.headers_mut());
    response
}
