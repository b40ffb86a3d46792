use crate::api::errors::ApiError;
use crate::api::render::OutputFormat;
use crate::api::{countries, stats};
use crate::config::Config;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    /// Validated schema name holding `countries`; `None` disables country endpoints.
    pub statistics_schema: Option<String>,
    pub recent_months: u32,
    pub default_format: OutputFormat,
    pub dashboard_origin: Option<String>,
    /// Prefix every statistics route is nested under, e.g. `/statistics`.
    pub route_prefix: String,
}

impl AppState {
    pub fn new(conn: Connection, config: &Config) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            statistics_schema: config.statistics_schema.clone(),
            recent_months: config.recent_months,
            default_format: config.default_format.parse().unwrap_or_default(),
            dashboard_origin: config.dashboard_origin.clone(),
            route_prefix: config.route_prefix(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let dashboard_cors = build_dashboard_cors(state.dashboard_origin.as_deref());

    let stats_routes = Router::new()
        .route("/users", get(stats::get_profiles))
        .route("/users/count/{field}", get(stats::get_users_count))
        .route("/users/countries/{shape}", get(countries::get_countries))
        .route(
            "/users/downloads/count",
            get(stats::get_users_downloads_count),
        )
        .route("/new/users", get(stats::get_new_users))
        .route("/new/users/count", get(stats::get_new_users_count))
        .route(
            "/countries",
            post(countries::post_countries).fallback(route_not_found),
        )
        .route("/countries/{*rest}", any(route_not_found))
        .route("/{service}", get(stats::get_usage))
        .route("/{service}/{view}", get(stats::get_usage_view))
        .layer(dashboard_cors);

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check));

    let router = if state.route_prefix == "/" {
        router.merge(stats_routes)
    } else {
        router.nest(&state.route_prefix, stats_routes)
    };

    router
        .fallback(route_not_found)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("No such statistics route".to_string())
}

/// Security headers on every HTTP response.
async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// CORS layer for the statistics routes based on the configured dashboard origin.
fn build_dashboard_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    dashboard_origin.map_or_else(
        || {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        },
        |origin| {
            let allowed_origin = origin
                .parse::<HeaderValue>()
                .unwrap_or_else(|_| HeaderValue::from_static("*"));
            CorsLayer::new()
                .allow_origin(allowed_origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
                .allow_credentials(true)
        },
    )
}

/// GET /health
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed — store reachability and effective settings.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    let conn = Arc::clone(&state.conn);
    let database_ok = tokio::task::spawn_blocking(move || {
        conn.lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
            .is_ok()
    })
    .await
    .unwrap_or(false);
    let status = if database_ok { "ok" } else { "degraded" };

    axum::Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "database_ok": database_ok,
        "route": state.route_prefix,
        "countries_enabled": state.statistics_schema.is_some(),
        "recent_months": state.recent_months,
    }))
}
