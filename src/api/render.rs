use crate::api::errors::ApiError;
use crate::query::ranking::RankedFeature;
use crate::server::AppState;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// A result row that can be laid out as CSV cells.
pub trait Tabular {
    /// Text of the cell under `column`; empty when the row has no such column.
    fn cell(&self, column: &str) -> String;
}

/// Response body format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ApiError::BadRequest(format!(
                "Invalid format: '{other}'. Use 'csv' or 'json'."
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FormatParam {
    format: Option<String>,
}

impl OutputFormat {
    /// Pick the format: explicit parameter, then `Accept: text/csv`, then the fallback.
    pub fn negotiate(
        requested: Option<&str>,
        headers: &HeaderMap,
        fallback: Self,
    ) -> Result<Self, ApiError> {
        if let Some(requested) = requested.filter(|r| !r.is_empty()) {
            return requested.parse();
        }

        let wants_csv = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/csv"));

        Ok(if wants_csv { Self::Csv } else { fallback })
    }
}

impl FromRequestParts<Arc<AppState>> for OutputFormat {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Query(param) = Query::<FormatParam>::try_from_uri(&parts.uri)
            .map_err(|e| ApiError::BadRequest(format!("Invalid query string: {e}")))?;
        Self::negotiate(param.format.as_deref(), &parts.headers, state.default_format)
    }
}

/// Message and result key of the JSON envelope.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    pub message: String,
    pub key: &'a str,
}

/// Render tabular rows as a JSON envelope or a CSV attachment.
pub fn render_rows<T>(
    format: OutputFormat,
    envelope: &Envelope<'_>,
    header: &[&str],
    rows: &[T],
) -> Result<Response, ApiError>
where
    T: Serialize + Tabular,
{
    match format {
        OutputFormat::Json => {
            let rows = serde_json::to_value(rows)
                .map_err(|e| ApiError::Internal(format!("JSON serialization failed: {e}")))?;
            let mut body = serde_json::Map::new();
            body.insert("status".to_string(), "success".into());
            body.insert("message".to_string(), envelope.message.clone().into());
            body.insert(envelope.key.to_string(), rows);
            Ok(Json(serde_json::Value::Object(body)).into_response())
        }
        OutputFormat::Csv => Ok(csv_response(write_csv(header, rows))),
    }
}

/// Render ranked countries as a GeoJSON FeatureCollection or a CSV attachment.
pub fn render_features(
    format: OutputFormat,
    header: &[&str],
    features: &[RankedFeature],
) -> Result<Response, ApiError> {
    match format {
        OutputFormat::Json => Ok(Json(serde_json::json!({
            "type": "FeatureCollection",
            "features": features,
        }))
        .into_response()),
        OutputFormat::Csv => Ok(csv_response(write_csv(header, features))),
    }
}

fn csv_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"data.csv\"",
            ),
        ],
        body,
    )
        .into_response()
}

/// Header line followed by one line per row, each terminated by `\n`.
pub fn write_csv<T: Tabular>(header: &[&str], rows: &[T]) -> String {
    let mut out = String::new();
    write_line(&mut out, header.iter().map(|h| (*h).to_string()));
    for row in rows {
        write_line(&mut out, header.iter().map(|column| row.cell(column)));
    }
    out
}

fn write_line(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_csv_field(&cell));
    }
    out.push('\n');
}

/// Escape a CSV field (RFC 4180).
///
/// The field is quoted only if it contains a separator, a quote, a line
/// break, or surrounding whitespace. Cell text is never rewritten.
fn escape_csv_field(field: &str) -> String {
    let needs_quotes = field.contains([',', '"', '\r', '\n'])
        || field.starts_with(char::is_whitespace)
        || field.ends_with(char::is_whitespace);

    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
