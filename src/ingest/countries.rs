use crate::ingest::geometry::{extent_of, point_geojson, GeometryError};
use duckdb::Connection;
use serde::Serialize;
use serde_json::Value;

/// A country feature ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryFeature {
    pub identifier: String,
    pub name: String,
    pub geometry: Value,
    pub centroid: Value,
}

#[derive(Debug)]
pub enum IngestError {
    MissingId,
    MissingName,
    MissingGeometry,
    Geometry(GeometryError),
    Database(duckdb::Error),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingId => write!(f, "feature has no id"),
            Self::MissingName => write!(f, "feature has no name property"),
            Self::MissingGeometry => write!(f, "feature has no geometry"),
            Self::Geometry(e) => write!(f, "invalid geometry: {e}"),
            Self::Database(e) => write!(f, "database error: {e}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<GeometryError> for IngestError {
    fn from(e: GeometryError) -> Self {
        Self::Geometry(e)
    }
}

impl From<duckdb::Error> for IngestError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}

/// One feature that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of a country batch: stored identifiers and per-feature failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: Vec<String>,
    pub failed: Vec<FeatureFailure>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Feature identifier as text; numeric ids are accepted.
fn feature_id(feature: &Value) -> Option<String> {
    match &feature["id"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Validate a GeoJSON feature and compute its centroid.
pub fn parse_feature(feature: &Value) -> Result<CountryFeature, IngestError> {
    let identifier = feature_id(feature).ok_or(IngestError::MissingId)?;
    let name = feature["properties"]["name"]
        .as_str()
        .filter(|n| !n.is_empty())
        .ok_or(IngestError::MissingName)?
        .to_string();
    let geometry = match &feature["geometry"] {
        Value::Null => return Err(IngestError::MissingGeometry),
        g => g.clone(),
    };
    let centroid = point_geojson(extent_of(&geometry)?.centroid());

    Ok(CountryFeature {
        identifier,
        name,
        geometry,
        centroid,
    })
}

/// Store one feature inside its own transaction.
///
/// The transaction rolls back when dropped without a commit.
fn insert_feature(
    conn: &mut Connection,
    schema: &str,
    feature: &CountryFeature,
) -> Result<(), IngestError> {
    let tx = conn.transaction()?;
    tx.execute(
        &format!(
            "INSERT INTO {schema}.countries (identifier, name, geometry, centroid) VALUES (?, ?, ?, ?)"
        ),
        duckdb::params![
            feature.identifier,
            feature.name,
            feature.geometry.to_string(),
            feature.centroid.to_string(),
        ],
    )?;
    tx.commit()?;
    Ok(())
}

/// Insert every feature of a FeatureCollection, one transaction per feature.
///
/// A failing feature does not stop the batch and never undoes features that
/// were already committed. `schema` must be a validated identifier.
pub fn ingest_features(conn: &mut Connection, schema: &str, features: &[Value]) -> IngestReport {
    let mut report = IngestReport::default();

    for (index, raw) in features.iter().enumerate() {
        let label = feature_id(raw).unwrap_or_else(|| format!("#{index}"));
        let result = parse_feature(raw).and_then(|feature| insert_feature(conn, schema, &feature));

        match result {
            Ok(()) => report.inserted.push(label),
            Err(e) => {
                tracing::warn!(feature = %label, error = %e, "Country feature cannot be inserted");
                report.failed.push(FeatureFailure {
                    id: label,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        inserted = report.inserted.len(),
        failed = report.failed.len(),
        "Country ingestion finished"
    );
    report
}
