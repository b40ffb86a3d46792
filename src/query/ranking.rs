use crate::api::render::Tabular;
use crate::query::countries::CountryCount;
use serde::{Serialize, Serializer};

/// Number of rank bins.
pub const RANK_BINS: u64 = 10;

/// Classify counts into rank bins.
///
/// The bin width is `ceil((max - min) / 10)` and each count lands in
/// `floor((count - min) / width)`, capped at the last bin. When every count
/// is equal the width would be zero; all counts then share bin 0.
pub fn rank_counts(counts: &[u64]) -> Vec<u32> {
    let (Some(&min), Some(&max)) = (counts.iter().min(), counts.iter().max()) else {
        return Vec::new();
    };

    let width = (max - min).div_ceil(RANK_BINS);
    if width == 0 {
        return vec![0; counts.len()];
    }

    counts
        .iter()
        .map(|&count| {
            let bin = ((count - min) / width).min(RANK_BINS - 1);
            u32::try_from(bin).unwrap_or(0)
        })
        .collect()
}

/// A country with its user count and rank bin, rendered as a GeoJSON Feature.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFeature {
    pub id: String,
    pub name: String,
    pub count: u64,
    pub ranking: u32,
    /// Country polygon or centroid point.
    pub geometry: serde_json::Value,
}

/// Attach a rank bin to every country row.
pub fn classify(rows: Vec<CountryCount>) -> Vec<RankedFeature> {
    let counts: Vec<u64> = rows.iter().map(|r| r.count).collect();
    let rankings = rank_counts(&counts);

    rows.into_iter()
        .zip(rankings)
        .map(|(row, ranking)| RankedFeature {
            id: row.id,
            name: row.name,
            count: row.count,
            ranking,
            geometry: row.geometry,
        })
        .collect()
}

#[derive(Serialize)]
struct FeatureJson<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: &'a str,
    properties: FeatureProperties<'a>,
    geometry: &'a serde_json::Value,
}

#[derive(Serialize)]
struct FeatureProperties<'a> {
    name: &'a str,
    count: u64,
    ranking: u32,
}

impl Serialize for RankedFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FeatureJson {
            kind: "Feature",
            id: &self.id,
            properties: FeatureProperties {
                name: &self.name,
                count: self.count,
                ranking: self.ranking,
            },
            geometry: &self.geometry,
        }
        .serialize(serializer)
    }
}

impl Tabular for RankedFeature {
    fn cell(&self, column: &str) -> String {
        match column {
            "id" => self.id.clone(),
            "name" => self.name.clone(),
            "count" => self.count.to_string(),
            "ranking" => self.ranking.to_string(),
            "geometry" => self.geometry.to_string(),
            "longitude" => coordinate(&self.geometry, 0),
            "latitude" => coordinate(&self.geometry, 1),
            _ => String::new(),
        }
    }
}

/// Axis `axis` of a Point geometry, or an empty string for other geometries.
fn coordinate(geometry: &serde_json::Value, axis: usize) -> String {
    geometry["coordinates"][axis]
        .as_f64()
        .map(|v| v.to_string())
        .unwrap_or_default()
}
