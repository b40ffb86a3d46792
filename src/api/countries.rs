use crate::api::errors::ApiError;
use crate::api::render::{render_features, OutputFormat};
use crate::api::stats::with_connection;
use crate::ingest::countries::ingest_features;
use crate::query::countries::{query_country_counts, CountryShape};
use crate::query::ranking::classify;
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

const GEOMETRY_COLUMNS: &[&str] = &["id", "name", "count", "ranking", "geometry"];
const CENTROID_COLUMNS: &[&str] = &["id", "name", "count", "ranking", "longitude", "latitude"];

fn statistics_schema(state: &AppState) -> Result<String, ApiError> {
    state
        .statistics_schema
        .clone()
        .ok_or_else(|| ApiError::NotFound("Country statistics are not configured".to_string()))
}

/// GET /users/countries/{geometry|centroid} — users per country with rank bins.
pub async fn get_countries(
    State(state): State<Arc<AppState>>,
    Path(shape): Path<String>,
    format: OutputFormat,
) -> Result<Response, ApiError> {
    let shape = CountryShape::from_segment(&shape)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown country shape '{shape}'")))?;
    let schema = statistics_schema(&state)?;

    let rows = with_connection(state, move |conn| {
        Ok(query_country_counts(conn, &schema, shape)?)
    })
    .await?;

    let header = match shape {
        CountryShape::Geometry => GEOMETRY_COLUMNS,
        CountryShape::Centroid => CENTROID_COLUMNS,
    };
    render_features(format, header, &classify(rows))
}

/// POST /countries — store a GeoJSON FeatureCollection of countries.
///
/// Each feature is committed on its own; the response lists what was stored
/// and what failed, with 500 when anything failed. Without a statistics
/// schema the answer is 404 whatever the body.
pub async fn post_countries(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let schema = statistics_schema(&state)?;
    let body: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;
    let features = match body["features"].as_array() {
        Some(features) if body["type"] == "FeatureCollection" => features.clone(),
        _ => {
            return Err(ApiError::BadRequest(
                "Body must be a GeoJSON FeatureCollection".to_string(),
            ))
        }
    };

    let report = with_connection(state, move |conn| {
        Ok(ingest_features(conn, &schema, &features))
    })
    .await?;

    let (status, outcome, message) = if report.is_complete() {
        (
            StatusCode::OK,
            "success",
            format!("Inserted {} countries", report.inserted.len()),
        )
    } else {
        let ids: Vec<&str> = report.failed.iter().map(|f| f.id.as_str()).collect();
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "error",
            format!("Cannot insert countries: {}", ids.join(", ")),
        )
    };

    let body = serde_json::json!({
        "status": outcome,
        "message": message,
        "inserted": report.inserted,
        "failed": report.failed,
    });
    Ok((status, Json(body)).into_response())
}
