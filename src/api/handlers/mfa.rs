//! TOTP factor management and second-factor verification.
//!
//! Flow Overview:
//! 1) Enrollment replaces any existing TOTP factor and returns the secret and QR code.
//! 2) Enrollment finishes by verifying a first code, which upgrades the session.
//! 3) Verification at login upgrades the session and, when opted in, trusts the device.
//!
//! Factor listing and removal require the session to already satisfy assurance,
//! or a trusted device, the same rule the gate applies to admin pages.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    principal::{Principal, bounded, require_auth, require_step_up, trust_store},
    session::append_session_cookies,
    types::{
        ClientStorageChanges, ClientStorageSnapshot, DeviceTrustResponse, EnrollFinishRequest,
        EnrollStartResponse, FactorsResponse, VerifyRequest, VerifyResponse,
    },
};
use crate::{
    api::{
        rate_limit::{RateLimitAction, limited_response},
        state::AuthState,
    },
    identity::{AuthTokens, ProviderError},
};

const INVALID_CODE_MESSAGE: &str = "Invalid code. Please try again.";

static CODE_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\d{6}$").ok());

/// Six ASCII digits, nothing else.
fn valid_code(code: &str) -> bool {
    CODE_PATTERN
        .as_ref()
        .is_some_and(|regex| regex.is_match(code))
}

fn provider_failure(context: &str, err: &ProviderError) -> Response {
    match err {
        ProviderError::Unauthorized => {
            (StatusCode::UNAUTHORIZED, "Not authenticated").into_response()
        }
        ProviderError::InvalidCode => {
            (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE).into_response()
        }
        ProviderError::Rejected {
            status: 400..=499,
            message,
        } => {
            warn!("{context}: {message}");
            (StatusCode::BAD_REQUEST, message.clone()).into_response()
        }
        other => {
            error!("{context}: {other}");
            (StatusCode::BAD_GATEWAY, "Identity provider unavailable").into_response()
        }
    }
}

/// Apply the per-user attempt limit for code verification.
fn check_attempts(auth_state: &AuthState, principal: &Principal) -> Result<(), Response> {
    let status = auth_state
        .rate_limiter()
        .check(&principal.user.id, RateLimitAction::MfaVerify);
    if status.limited {
        warn!(user_id = %principal.user.id, "MFA verification attempts exceeded");
        return Err(limited_response(&status));
    }
    Ok(())
}

/// Forget device trust for `user_id`. Trust was granted against a factor and
/// must not outlive it.
fn revoke_trust(
    auth_state: &AuthState,
    headers: &HeaderMap,
    user_id: &str,
) -> (HeaderMap, ClientStorageChanges) {
    let mut store = trust_store(auth_state, headers, user_id, ClientStorageSnapshot::new());
    store.revoke();
    let (storage, cookies) = store.into_parts();
    let mut response_headers = HeaderMap::new();
    cookies.apply(&mut response_headers);
    (response_headers, storage.into_changes())
}

/// Challenge `factor_id` and verify `code` against it.
async fn challenge_and_verify(
    auth_state: &AuthState,
    principal: &Principal,
    factor_id: &str,
    code: &str,
) -> Result<AuthTokens, Response> {
    let timeout = auth_state.config().identity_timeout();
    let provider = auth_state.provider();
    let challenge_id = bounded(
        timeout,
        provider.create_challenge(&principal.access_token, factor_id),
    )
    .await
    .map_err(|err| provider_failure("Failed to create MFA challenge", &err))?;

    bounded(
        timeout,
        provider.verify_challenge(&principal.access_token, factor_id, &challenge_id, code),
    )
    .await
    .map_err(|err| provider_failure("Failed to verify MFA challenge", &err))
}

#[utoipa::path(
    get,
    path = "/api/auth/mfa/factors",
    responses(
        (status = 200, description = "Enrolled factors", body = FactorsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Verification required")
    ),
    tag = "auth"
)]
pub async fn factors(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let principal = match require_step_up(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let timeout = auth_state.config().identity_timeout();
    match bounded(
        timeout,
        auth_state.provider().list_factors(&principal.access_token),
    )
    .await
    {
        Ok(factors) => (StatusCode::OK, Json(FactorsResponse { factors })).into_response(),
        Err(err) => provider_failure("Failed to list factors", &err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/mfa/enroll/start",
    responses(
        (status = 200, description = "Factor created, awaiting first code", body = EnrollStartResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Verification required")
    ),
    tag = "auth"
)]
pub async fn enroll_start(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let principal = match require_step_up(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let timeout = auth_state.config().identity_timeout();
    let provider = auth_state.provider();

    // One authenticator per account: drop stale TOTP factors first.
    let mut removed = 0_usize;
    match bounded(timeout, provider.list_factors(&principal.access_token)).await {
        Ok(existing) => {
            for factor in existing.iter().filter(|f| f.is_totp()) {
                match bounded(
                    timeout,
                    provider.unenroll_factor(&principal.access_token, &factor.id),
                )
                .await
                {
                    Ok(()) => removed += 1,
                    Err(err) => {
                        warn!(factor_id = %factor.id, "Failed to remove existing factor: {err}");
                    }
                }
            }
        }
        Err(err) => return provider_failure("Failed to list factors", &err),
    }

    let (response_headers, client_storage) = if removed > 0 {
        info!(user_id = %principal.user.id, removed, "Replaced TOTP factor, device trust revoked");
        revoke_trust(&auth_state, &headers, &principal.user.id)
    } else {
        (HeaderMap::new(), ClientStorageChanges::new())
    };

    match bounded(
        timeout,
        provider.enroll_factor(&principal.access_token, auth_state.config().factor_name()),
    )
    .await
    {
        Ok(enrollment) => {
            info!(user_id = %principal.user.id, factor_id = %enrollment.factor_id, "TOTP enrollment started");
            let response = EnrollStartResponse {
                factor_id: enrollment.factor_id,
                secret: enrollment.secret,
                qr_code: enrollment.qr_code,
                uri: enrollment.uri,
                client_storage,
            };
            (StatusCode::OK, response_headers, Json(response)).into_response()
        }
        Err(err) => provider_failure("Failed to enroll factor", &err),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/mfa/enroll/finish",
    request_body = EnrollFinishRequest,
    responses(
        (status = 204, description = "Factor verified, session upgraded"),
        (status = 400, description = "Invalid code"),
        (status = 401, description = "Not authenticated"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
pub async fn enroll_finish(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EnrollFinishRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let principal = match require_auth(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = check_attempts(&auth_state, &principal) {
        return response;
    }
    let code = request.code.trim();
    if !valid_code(code) {
        return (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE).into_response();
    }

    let tokens =
        match challenge_and_verify(&auth_state, &principal, &request.factor_id, code).await {
            Ok(tokens) => tokens,
            Err(response) => return response,
        };
    info!(user_id = %principal.user.id, factor_id = %request.factor_id, "TOTP enrollment verified");

    let mut response_headers = HeaderMap::new();
    append_session_cookies(&mut response_headers, auth_state.config(), &tokens);
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/mfa/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Second factor accepted", body = VerifyResponse),
        (status = 400, description = "Invalid code or no factor enrolled"),
        (status = 401, description = "Not authenticated"),
        (status = 429, description = "Too many attempts")
    ),
    tag = "auth"
)]
pub async fn verify(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let principal = match require_auth(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if let Err(response) = check_attempts(&auth_state, &principal) {
        return response;
    }
    let code = request.code.trim();
    if !valid_code(code) {
        return (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE).into_response();
    }

    let timeout = auth_state.config().identity_timeout();
    let factors = match bounded(
        timeout,
        auth_state.provider().list_factors(&principal.access_token),
    )
    .await
    {
        Ok(factors) => factors,
        Err(err) => return provider_failure("Failed to list factors", &err),
    };
    let factor = factors
        .iter()
        .find(|f| f.is_totp() && f.is_verified())
        .or_else(|| factors.iter().find(|f| f.is_totp()));
    let Some(factor) = factor else {
        return (StatusCode::BAD_REQUEST, "No authenticator enrolled").into_response();
    };

    let tokens = match challenge_and_verify(&auth_state, &principal, &factor.id, code).await {
        Ok(tokens) => tokens,
        Err(response) => return response,
    };

    let mut store = trust_store(&auth_state, &headers, &principal.user.id, request.client_storage);
    let trusted_until = if request.trust_device {
        store.grant().map(|record| record.expires_at.to_rfc3339())
    } else {
        None
    };
    info!(
        user_id = %principal.user.id,
        trusted = trusted_until.is_some(),
        "Second factor verified"
    );

    let (storage, cookies) = store.into_parts();
    let mut response_headers = HeaderMap::new();
    append_session_cookies(&mut response_headers, auth_state.config(), &tokens);
    cookies.apply(&mut response_headers);
    let response = VerifyResponse {
        redirect_to: auth_state.gate().config().dashboard_path().to_string(),
        trusted_until,
        client_storage: storage.into_changes(),
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

#[utoipa::path(
    delete,
    path = "/api/auth/mfa/factors/{factor_id}",
    params(("factor_id" = String, Path, description = "Factor to remove")),
    responses(
        (status = 200, description = "Factor removed and device trust revoked", body = DeviceTrustResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Verification required")
    ),
    tag = "auth"
)]
pub async fn unenroll(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    Path(factor_id): Path<String>,
) -> Response {
    let principal = match require_step_up(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let timeout = auth_state.config().identity_timeout();
    if let Err(err) = bounded(
        timeout,
        auth_state
            .provider()
            .unenroll_factor(&principal.access_token, &factor_id),
    )
    .await
    {
        return provider_failure("Failed to remove factor", &err);
    }

    let (response_headers, client_storage) =
        revoke_trust(&auth_state, &headers, &principal.user.id);
    info!(user_id = %principal.user.id, factor_id = %factor_id, "Factor removed, device trust revoked");

    let response = DeviceTrustResponse {
        trusted: false,
        expires_at: None,
        client_storage,
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::valid_code;

    #[test]
    fn codes_must_be_six_digits() {
        assert!(valid_code("123456"));
        assert!(!valid_code("12345"));
        assert!(!valid_code("1234567"));
        assert!(!valid_code("12a456"));
        assert!(!valid_code(""));
    }
}
