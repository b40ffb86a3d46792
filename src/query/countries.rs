use crate::query::Statement;
use duckdb::Connection;

/// Which stored shape accompanies each country in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountryShape {
    Geometry,
    Centroid,
}

impl CountryShape {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "geometry" => Some(Self::Geometry),
            "centroid" => Some(Self::Centroid),
            _ => None,
        }
    }

    const fn column_name(self) -> &'static str {
        match self {
            Self::Geometry => "geometry",
            Self::Centroid => "centroid",
        }
    }
}

/// Number of users registered in one country, with its stored GeoJSON.
#[derive(Debug, Clone, PartialEq)]
pub struct CountryCount {
    pub id: String,
    pub name: String,
    pub count: u64,
    pub geometry: serde_json::Value,
}

/// Count users per country, joining `users.country` to the lower-cased
/// country name. Countries without any user are not returned.
///
/// `schema` must be a validated identifier.
pub fn query_country_counts(
    conn: &Connection,
    schema: &str,
    shape: CountryShape,
) -> Result<Vec<CountryCount>, duckdb::Error> {
    let col = shape.column_name();

    let statement = Statement {
        sql: format!(
            "SELECT c.identifier, c.name, COUNT(u.country) AS n, c.{col}
             FROM usermanagement.users u
             INNER JOIN {schema}.countries c ON u.country = lower(c.name)
             GROUP BY u.country, c.identifier, c.name, c.{col}
             ORDER BY c.identifier"
        ),
        params: Vec::new(),
    };

    statement.fetch(conn, |row| {
        let id: String = row.get(0)?;
        let raw: String = row.get(3)?;
        let geometry = serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(country = %id, error = %e, "Stored geometry is not valid GeoJSON");
            serde_json::Value::Null
        });
        Ok(CountryCount {
            id,
            name: row.get(1)?,
            count: row.get(2)?,
            geometry,
        })
    })
}
