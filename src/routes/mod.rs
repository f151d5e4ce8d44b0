//! HTTP surface: `/api/*` handlers, docs, metrics and static uploads.

mod auth;
mod orders;
mod products;
mod uploads;

use crate::error::ServiceError;
use crate::models::ApiError;
use crate::security::{attach_user, require_admin, require_auth};
use crate::state::AppState;
use crate::store::StoreError;
use crate::uploads::MULTIPART_BODY_LIMIT;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{MethodRouter, get, post, put},
};
use chrono::Utc;
use serde_json::{Value, json};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route(
            "/api/auth/me",
            authed(&state, get(auth::me).put(auth::update_me)),
        )
        .route("/api/auth/users", admin_only(&state, get(auth::list_users)))
        .route("/api/upload", with_upload_limit(post(uploads::upload_image)))
        .route(
            "/api/products",
            get(products::list_products).merge(admin_only(
                &state,
                with_upload_limit(post(products::create_product)),
            )),
        )
        .route(
            "/api/products/{identifier}",
            get(products::get_product).merge(admin_only(
                &state,
                with_upload_limit(put(products::update_product)).delete(products::delete_product),
            )),
        )
        .route(
            "/api/orders",
            optional_auth(&state, post(orders::place_order))
                .merge(admin_only(&state, get(orders::list_orders))),
        )
        .route("/api/orders/mine", authed(&state, get(orders::my_orders)))
        .route("/api/orders/{id}", authed(&state, get(orders::get_order)))
        .route(
            "/api/orders/{id}/cancel",
            authed(&state, put(orders::cancel_order)),
        )
        .route(
            "/api/orders/{id}/status",
            admin_only(&state, put(orders::update_status)),
        )
        .route(
            "/api/dashboard/stats",
            admin_only(&state, get(orders::dashboard_stats)),
        );

    let system = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui));

    let body_limit = state.config.request_max_bytes;
    let cors = cors_layer(&state);
    let uploads = ServeDir::new(&state.config.upload_dir);

    api.merge(system)
        .nest_service("/uploads", uploads)
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(security_header("x-content-type-options", "nosniff"))
        .layer(security_header("x-frame-options", "DENY"))
        .layer(security_header("x-xss-protection", "1; mode=block"))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Routes taking image files get room for a full set of uploads; the
/// router-wide limit still applies everywhere else.
fn with_upload_limit(route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.layer(DefaultBodyLimit::max(MULTIPART_BODY_LIMIT))
}

fn authed(state: &AppState, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
}

fn admin_only(state: &AppState, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    authed(state, route.route_layer(middleware::from_fn(require_admin)))
}

fn optional_auth(state: &AppState, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(state.clone(), attach_user))
}

fn security_header(
    name: &'static str,
    value: &'static str,
) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::if_not_present(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

/// Configured origins plus `FRONTEND_URL`; development reflects any origin.
fn cors_layer(state: &AppState) -> CorsLayer {
    let origin = if state.config.is_development() {
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_origins()
            .into_iter()
            .filter_map(|origin| match HeaderValue::from_str(&origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(target = "storefront.api", origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("idempotency-key"),
            HeaderName::from_static("x-docs-key"),
        ])
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/api/health`
/// - Auth: none
///
/// Reports the database connection and per-collection document counts.
async fn health(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    crate::metrics::inc_requests("/api/health");
    let connected = state.db.ping().await;
    let failed = |err: StoreError| {
        ServiceError::internal("health", "Health check failed").with_detail(err.to_string())
    };
    let users = state.db.count_users(None).await.map_err(failed)?;
    let products = state.db.count_products(false).await.map_err(failed)?;
    let orders = state.db.count_orders().await.map_err(failed)?;
    Ok(Json(json!({
        "success": true,
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "database": if connected { "connected" } else { "disconnected" },
        "backend": state.db.backend_name(),
        "stats": {
            "users": users,
            "products": products,
            "orders": orders,
        },
    })))
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ServiceError> {
    if let Some(key) = &state.config.openapi_key {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(ServiceError::unauthorized("docs", "Invalid docs key"));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> Response {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Storefront API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.config.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    let body = state
        .prometheus_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("Route not found", None)),
    )
}
