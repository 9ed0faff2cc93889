use crate::api::handlers::health;
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::from_fn,
    response::IntoResponse,
    routing::options,
};
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    services::ServeDir,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod middleware;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;
pub mod rate_limit;
pub mod state;

pub use openapi::openapi;
pub use rate_limit::{FixedWindowLimiter, NoopRateLimiter, RateLimitPolicy, RateLimiter};
pub use state::{AuthConfig, AuthState};

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Static admin pages served under the protected prefix.
#[must_use]
pub fn admin_pages(prefix: &str, admin_dir: &Path) -> Router {
    let pages = ServeDir::new(admin_dir).append_index_html_on_directories(true);
    if prefix == "/" {
        Router::new().fallback_service(pages)
    } else {
        Router::new().nest_service(prefix, pages)
    }
}

/// Assemble the full application: documented API routes, admin pages, and the
/// middleware stack with the access gate innermost.
pub fn app(auth_state: Arc<AuthState>, cors: CorsLayer, pages: Router) -> Router {
    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like preflight-only `OPTIONS /health` and the admin pages.
    let (router, _openapi) = router().split_for_parts();
    router
        .route("/health", options(health::health))
        .merge(pages)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(from_fn(rate_limit::limit_api))
                .layer(from_fn(middleware::access_gate)),
        )
}

/// Start the server
/// # Errors
/// Return error if the origins are invalid or the listener fails
pub async fn new(
    port: u16,
    auth_state: Arc<AuthState>,
    allowed_origins: &[String],
    admin_dir: Option<&Path>,
) -> Result<()> {
    let cors = cors_layer(allowed_origins)?;
    let pages = admin_dir.map_or_else(Router::new, |dir| {
        admin_pages(auth_state.gate().config().protected_prefix(), dir)
    });
    let app = app(auth_state, cors, pages);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// CORS for the admin frontend origins, with credentials.
/// # Errors
/// Return error if an origin is not an absolute URL with a host
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|origin| origin_header(origin))
        .collect::<Result<Vec<_>>>()?;
    if origins.is_empty() {
        return Err(anyhow!("At least one allowed origin is required"));
    }
    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

fn origin_header(url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(url.trim()).with_context(|| format!("Invalid origin: {url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin must include a valid host: {url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}
