use crate::api::errors::ApiError;
use crate::api::filters::{CountField, Filters};
use crate::api::render::{render_rows, Envelope, OutputFormat};
use crate::query::usage::{query_usage, Service, Shape, UsageQuery};
use crate::query::users::{self, NEW_USERS_COLUMNS, PROFILE_COLUMNS};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{NaiveDateTime, Utc};
use duckdb::Connection;
use std::sync::Arc;

/// Run `f` against the shared connection on a blocking thread.
///
/// The DuckDB mutex is held for the duration of `f` only, and no Tokio
/// worker is blocked.
pub(crate) async fn with_connection<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = state.conn.lock();
        f(&mut conn)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))?
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn resolve_service(segment: &str) -> Result<Service, ApiError> {
    Service::from_segment(segment)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown statistics '{segment}'")))
}

async fn usage_response(
    state: Arc<AppState>,
    service: Service,
    shape: Shape,
    format: OutputFormat,
    filters: Filters,
) -> Result<Response, ApiError> {
    let recent_months = state.recent_months;
    let now = now();

    let rows = with_connection(state, move |conn| {
        let query = UsageQuery {
            service,
            shape,
            filters: &filters,
        };
        Ok(query_usage(conn, &query, now, recent_months)?)
    })
    .await?;

    tracing::debug!(service = service.as_str(), ?shape, rows = rows.len(), "Usage aggregation");

    let envelope = Envelope {
        message: shape.describe(service),
        key: service.result_key(),
    };
    render_rows(format, &envelope, shape.columns(), &rows)
}

/// GET /{service} — counts by month and collection.
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    format: OutputFormat,
    filters: Filters,
) -> Result<Response, ApiError> {
    let service = resolve_service(&service)?;
    usage_response(state, service, Shape::ByMonth, format, filters).await
}

/// GET /{service}/{recent|best|products}
pub async fn get_usage_view(
    State(state): State<Arc<AppState>>,
    Path((service, view)): Path<(String, String)>,
    format: OutputFormat,
    filters: Filters,
) -> Result<Response, ApiError> {
    let service = resolve_service(&service)?;
    let shape = Shape::from_view(&view)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown view '{view}'")))?;
    usage_response(state, service, shape, format, filters).await
}

/// GET /users/downloads/count — downloads per user, busiest first.
pub async fn get_users_downloads_count(
    State(state): State<Arc<AppState>>,
    format: OutputFormat,
    filters: Filters,
) -> Result<Response, ApiError> {
    usage_response(state, Service::Download, Shape::ByUser, format, filters).await
}

/// GET /users/count/{field}
pub async fn get_users_count(
    State(state): State<Arc<AppState>>,
    Path(field): Path<String>,
    format: OutputFormat,
) -> Result<Response, ApiError> {
    let field: CountField = field.parse()?;

    let rows = with_connection(state, move |conn| {
        Ok(users::query_count_by_field(conn, field)?)
    })
    .await?;

    let column = field.column_name();
    let envelope = Envelope {
        message: format!("Count users for field {column}"),
        key: "counts",
    };
    render_rows(format, &envelope, &[column, "count"], &rows)
}

/// GET /users — profile listing with keywords, limit and offset.
pub async fn get_profiles(
    State(state): State<Arc<AppState>>,
    format: OutputFormat,
    filters: Filters,
) -> Result<Response, ApiError> {
    let rows = with_connection(state, move |conn| {
        Ok(users::query_profiles(conn, &filters)?)
    })
    .await?;

    let envelope = Envelope {
        message: "Profiles for all users".to_string(),
        key: "profiles",
    };
    render_rows(format, &envelope, PROFILE_COLUMNS, &rows)
}

/// GET /new/users — profiles registered within the recency window.
pub async fn get_new_users(
    State(state): State<Arc<AppState>>,
    format: OutputFormat,
) -> Result<Response, ApiError> {
    let recent_months = state.recent_months;
    let now = now();

    let rows = with_connection(state, move |conn| {
        Ok(users::query_new_profiles(conn, now, recent_months)?)
    })
    .await?;

    let envelope = Envelope {
        message: format!("Profiles of users registered in the last {recent_months} months"),
        key: "profiles",
    };
    render_rows(format, &envelope, PROFILE_COLUMNS, &rows)
}

/// GET /new/users/count — registrations per month within the recency window.
pub async fn get_new_users_count(
    State(state): State<Arc<AppState>>,
    format: OutputFormat,
) -> Result<Response, ApiError> {
    let recent_months = state.recent_months;
    let now = now();

    let rows = with_connection(state, move |conn| {
        Ok(users::query_new_users_by_month(conn, now, recent_months)?)
    })
    .await?;

    let envelope = Envelope {
        message: "Users count by month".to_string(),
        key: "count",
    };
    render_rows(format, &envelope, NEW_USERS_COLUMNS, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::Months;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_test_state() -> Arc<AppState> {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::migrations::run_migrations(&conn, None).unwrap();
        Arc::new(AppState::new(conn, &Config::default()))
    }

    fn insert_log(state: &AppState, service: &str, resourceid: &str, email: &str, at: &str) {
        state
            .conn
            .lock()
            .execute(
                "INSERT INTO usermanagement.history (service, collection, resourceid, email, querytime)
                 VALUES (?, 'S2', ?, ?, CAST(? AS TIMESTAMP))",
                duckdb::params![service, resourceid, email, at],
            )
            .unwrap();
    }

    fn insert_user(state: &AppState, email: &str, country: &str, at: &str) {
        state
            .conn
            .lock()
            .execute(
                "INSERT INTO usermanagement.users (email, country, registrationdate)
                 VALUES (?, ?, CAST(? AS TIMESTAMP))",
                duckdb::params![email, country, at],
            )
            .unwrap();
    }

    fn months_ago(months: u32) -> String {
        Utc::now()
            .naive_utc()
            .checked_sub_months(Months::new(months))
            .unwrap()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    async fn get_json(state: &Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let app = crate::server::build_router(Arc::clone(state));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_usage_by_month_envelope() {
        let state = make_test_state();
        insert_log(&state, "search", "p1", "a@x.org", "2024-01-10 10:00:00");

        let (status, json) = get_json(&state, "/statistics/search").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["message"], "Search count by month by collection");
        assert_eq!(
            json["search"],
            serde_json::json!([{"date": "2024-01", "collection": "S2", "count": 1}])
        );
    }

    #[tokio::test]
    async fn test_usage_best_with_legacy_limit_alias() {
        let state = make_test_state();
        for (id, hits) in [("p1", 1), ("p2", 2), ("p3", 3)] {
            for _ in 0..hits {
                insert_log(&state, "download", id, "a@x.org", "2024-01-10 10:00:00");
            }
        }

        let (status, json) = get_json(&state, "/statistics/downloads/best?_limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Downloads count by product sort by count");
        let rows = json["downloads"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["resourceid"], "p3");
    }

    #[tokio::test]
    async fn test_usage_recent_window() {
        let state = make_test_state();
        insert_log(&state, "insert", "p1", "a@x.org", &months_ago(1));
        insert_log(&state, "insert", "p2", "a@x.org", &months_ago(11));

        let (_, json) = get_json(&state, "/statistics/insert/recent").await;
        assert_eq!(json["insert"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_filter_rejected() {
        let state = make_test_state();
        let (status, json) = get_json(&state, "/statistics/downloads?mindate=yesterday").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_filter_sent_under_both_names_is_json_400() {
        let state = make_test_state();
        for uri in [
            "/statistics/downloads?mindate=2024-01-01&_mindate=2024-01-01",
            "/statistics/downloads/best?limit=2&_limit=3",
            "/statistics/users/downloads/count?maxdate=2024-01-01&_maxdate=2024-02-01",
            "/statistics/users?limit=1&_limit=1",
        ] {
            let (status, json) = get_json(&state, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(json["error"].as_str().unwrap().contains("duplicate field"), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_users_count_by_field() {
        let state = make_test_state();
        insert_user(&state, "a@x.org", "france", "2024-01-01 00:00:00");
        insert_user(&state, "b@x.org", "france", "2024-01-01 00:00:00");

        let (status, json) = get_json(&state, "/statistics/users/count/country").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Count users for field country");
        assert_eq!(
            json["counts"],
            serde_json::json!([{"country": "france", "count": 2}])
        );
    }

    #[tokio::test]
    async fn test_users_count_unknown_field() {
        let state = make_test_state();
        let (status, json) = get_json(&state, "/statistics/users/count/password").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Cannot count users by field 'password'");
    }

    #[tokio::test]
    async fn test_users_downloads_count() {
        let state = make_test_state();
        insert_log(&state, "download", "p1", "a@x.org", "2024-01-10 10:00:00");
        insert_log(&state, "download", "p2", "b@x.org", "2024-01-10 10:00:00");
        insert_log(&state, "download", "p3", "b@x.org", "2024-01-10 10:00:00");

        let (_, json) = get_json(&state, "/statistics/users/downloads/count").await;
        assert_eq!(json["message"], "Downloads count by user sort by count");
        assert_eq!(json["downloads"][0], serde_json::json!({"userid": "b@x.org", "count": 2}));
    }

    #[tokio::test]
    async fn test_profiles_and_new_users() {
        let state = make_test_state();
        insert_user(&state, "old@x.org", "italy", &months_ago(20));
        insert_user(&state, "new@x.org", "france", &months_ago(1));

        let (_, json) = get_json(&state, "/statistics/users?keywords=ital").await;
        assert_eq!(json["profiles"].as_array().unwrap().len(), 1);
        assert_eq!(json["profiles"][0]["email"], "old@x.org");

        let (_, json) = get_json(&state, "/statistics/new/users").await;
        assert_eq!(json["profiles"].as_array().unwrap().len(), 1);
        assert_eq!(json["profiles"][0]["email"], "new@x.org");

        let (_, json) = get_json(&state, "/statistics/new/users/count").await;
        assert_eq!(json["message"], "Users count by month");
        assert_eq!(json["count"][0]["count"], 1);
    }

    #[tokio::test]
    async fn test_csv_via_accept_header() {
        let state = make_test_state();
        insert_user(&state, "a@x.org", "france", "2024-01-01 00:00:00");

        let app = crate::server::build_router(Arc::clone(&state));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/statistics/users/count/country")
                    .header(header::ACCEPT, "text/csv")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"country,count\nfrance,1\n");
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let state = make_test_state();
        let (status, _) = get_json(&state, "/statistics/downloads?format=xml").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
