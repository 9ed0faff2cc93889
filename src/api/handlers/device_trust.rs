//! Device trust status and revocation for the browser.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

use super::{
    principal::{require_auth, trust_store},
    types::{DeviceTrustRequest, DeviceTrustResponse},
};
use crate::api::state::AuthState;

#[utoipa::path(
    post,
    path = "/api/auth/device-trust",
    request_body = DeviceTrustRequest,
    responses(
        (status = 200, description = "Current trust state", body = DeviceTrustResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn status(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeviceTrustRequest>>,
) -> Response {
    let principal = match require_auth(&auth_state, &headers).await {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    let request = payload.map(|Json(request)| request).unwrap_or_default();

    let mut store = trust_store(
        &auth_state,
        &headers,
        &principal.user.id,
        request.client_storage,
    );
    let trusted = store.is_trusted();
    let expires_at = if trusted { store.expires_at() } else { None };

    let (storage, cookies) = store.into_parts();
    let mut response_headers = HeaderMap::new();
    cookies.apply(&mut response_headers);
    let response = DeviceTrustResponse {
        trusted,
        expires_at: expires_at.map(|at| at.to_rfc3339()),
        client_storage: storage.into_changes(),
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

#[utoipa::path(
    delete,
    path = "/api/auth/device-trust",
    responses(
        (status = 200, description = "Device trust cleared", body = DeviceTrustResponse)
    ),
    tag = "auth"
)]
pub async fn revoke(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    // Revocation never needs a session; clearing is valid for any caller.
    let mut store = trust_store(&auth_state, &headers, "", Default::default());
    store.revoke();
    info!("Device trust revoked");

    let (storage, cookies) = store.into_parts();
    let mut response_headers = HeaderMap::new();
    cookies.apply(&mut response_headers);
    let response = DeviceTrustResponse {
        trusted: false,
        expires_at: None,
        client_storage: storage.into_changes(),
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}
