//! Forward-auth endpoint for reverse proxies.
//!
//! The proxy passes the original request URI in `X-Forwarded-Uri` (Traefik) or
//! `X-Original-URI` (nginx `auth_request`). A `204` lets the request through;
//! a `307` carries the redirect the browser should follow.

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use crate::api::{middleware::evaluate, state::AuthState};

const FORWARDED_URI_HEADERS: [&str; 2] = ["x-forwarded-uri", "x-original-uri"];

fn forwarded_path(headers: &HeaderMap) -> Option<String> {
    FORWARDED_URI_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(|uri| {
            let path = uri.split(['?', '#']).next().unwrap_or_default();
            path.to_string()
        })
}

#[utoipa::path(
    get,
    path = "/gate/check",
    responses(
        (status = 204, description = "Request may proceed"),
        (status = 307, description = "Redirect to login, verify, dashboard or home"),
        (status = 400, description = "Missing forwarded URI")
    ),
    tag = "folio"
)]
pub async fn check(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let Some(path) = forwarded_path(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing X-Forwarded-Uri").into_response();
    };

    let evaluation = evaluate(&auth_state, &path, &headers).await;
    let mut response_headers = HeaderMap::new();
    evaluation.apply_cookies(&mut response_headers);

    match evaluation
        .decision
        .redirect_target(auth_state.gate().config())
    {
        None => (StatusCode::NO_CONTENT, response_headers).into_response(),
        Some(target) => match HeaderValue::from_str(target) {
            Ok(location) => {
                response_headers.insert(LOCATION, location);
                (StatusCode::TEMPORARY_REDIRECT, response_headers).into_response()
            }
            Err(err) => {
                error!("Invalid redirect target {target}: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
    }
}
