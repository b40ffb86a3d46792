use serde_json::Value;

/// Planar bounding extent of a geometry, in longitude/latitude degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    fn include(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// A longitudinal span of 180° or more is taken as crossing the antimeridian.
    pub fn crosses_dateline(&self) -> bool {
        (self.max_x - self.min_x).abs() >= 180.0
    }

    /// Label point of the extent as `(x, y)`.
    ///
    /// For dateline-crossing extents the western bound is negated before
    /// averaging so the point lands on the geometry's side of the
    /// antimeridian rather than near longitude 0.
    pub fn centroid(&self) -> (f64, f64) {
        let factor = if self.crosses_dateline() { -1.0 } else { 1.0 };
        (
            self.min_x.mul_add(factor, self.max_x) / 2.0,
            (self.max_y + self.min_y) / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    MissingType,
    UnsupportedType(String),
    NoCoordinates,
    InvalidPosition,
}

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingType => write!(f, "geometry has no type"),
            Self::UnsupportedType(t) => write!(f, "unsupported geometry type '{t}'"),
            Self::NoCoordinates => write!(f, "geometry has no coordinates"),
            Self::InvalidPosition => write!(f, "geometry contains an invalid position"),
        }
    }
}

impl std::error::Error for GeometryError {}

/// Compute the bounding extent of a GeoJSON geometry object.
pub fn extent_of(geometry: &Value) -> Result<Extent, GeometryError> {
    let mut extent = None;
    collect_geometry(geometry, &mut extent)?;
    extent.ok_or(GeometryError::NoCoordinates)
}

fn collect_geometry(geometry: &Value, extent: &mut Option<Extent>) -> Result<(), GeometryError> {
    let kind = geometry["type"].as_str().ok_or(GeometryError::MissingType)?;
    match kind {
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "Polygon"
        | "MultiPolygon" => collect_positions(&geometry["coordinates"], extent),
        "GeometryCollection" => {
            let members = geometry["geometries"]
                .as_array()
                .ok_or(GeometryError::NoCoordinates)?;
            for member in members {
                collect_geometry(member, extent)?;
            }
            Ok(())
        }
        other => Err(GeometryError::UnsupportedType(other.to_string())),
    }
}

/// Walk nested coordinate arrays down to `[x, y, ...]` positions.
fn collect_positions(coords: &Value, extent: &mut Option<Extent>) -> Result<(), GeometryError> {
    let items = coords.as_array().ok_or(GeometryError::InvalidPosition)?;
    if items.first().is_some_and(Value::is_number) {
        let (Some(x), Some(y)) = (
            items.first().and_then(Value::as_f64),
            items.get(1).and_then(Value::as_f64),
        ) else {
            return Err(GeometryError::InvalidPosition);
        };
        match extent {
            Some(e) => e.include(x, y),
            None => *extent = Some(Extent::point(x, y)),
        }
        return Ok(());
    }
    for item in items {
        collect_positions(item, extent)?;
    }
    Ok(())
}

/// GeoJSON Point for a centroid.
pub fn point_geojson((x, y): (f64, f64)) -> Value {
    serde_json::json!({ "type": "Point", "coordinates": [x, y] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_centroid_simple() {
        let extent = Extent::new(-10.0, -10.0, 10.0, 10.0);
        assert!(!extent.crosses_dateline());
        assert_eq!(extent.centroid(), (0.0, 0.0));
    }

    #[test]
    fn test_centroid_dateline_crossing() {
        let extent = Extent::new(170.0, -10.0, -170.0, 10.0);
        assert!(extent.crosses_dateline());
        // factor = -1: (-170 + 170 * -1) / 2
        assert_eq!(extent.centroid(), (-170.0, 0.0));
    }

    #[test]
    fn test_centroid_wide_extent() {
        // Fiji-like extent spanning the whole longitude range
        let extent = Extent::new(-180.0, -21.0, 180.0, -12.0);
        assert!(extent.crosses_dateline());
        assert_eq!(extent.centroid(), (180.0, -16.5));
    }

    #[test]
    fn test_centroid_just_below_threshold() {
        let extent = Extent::new(0.0, 0.0, 179.0, 10.0);
        assert!(!extent.crosses_dateline());
        assert_eq!(extent.centroid(), (89.5, 5.0));
    }

    #[test]
    fn test_extent_polygon() {
        let geometry = json!({
            "type": "Polygon",
            "coordinates": [[[2.0, 42.0], [8.0, 42.0], [8.0, 51.0], [2.0, 51.0], [2.0, 42.0]]]
        });
        assert_eq!(
            extent_of(&geometry).unwrap(),
            Extent::new(2.0, 42.0, 8.0, 51.0)
        );
    }

    #[test]
    fn test_extent_multipolygon() {
        let geometry = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[177.0, -18.0], [179.9, -18.0], [179.9, -16.0], [177.0, -18.0]]],
                [[[-180.0, -17.0], [-179.8, -17.0], [-179.8, -16.0], [-180.0, -17.0]]]
            ]
        });
        let extent = extent_of(&geometry).unwrap();
        assert_eq!(extent, Extent::new(-180.0, -18.0, 179.9, -16.0));
        assert!(extent.crosses_dateline());
    }

    #[test]
    fn test_extent_point_and_collection() {
        let geometry = json!({
            "type": "GeometryCollection",
            "geometries": [
                {"type": "Point", "coordinates": [1.0, 2.0]},
                {"type": "LineString", "coordinates": [[3.0, -4.0], [5.0, 6.0, 100.0]]}
            ]
        });
        assert_eq!(
            extent_of(&geometry).unwrap(),
            Extent::new(1.0, -4.0, 5.0, 6.0)
        );
    }

    #[test]
    fn test_extent_errors() {
        assert_eq!(
            extent_of(&json!({"coordinates": [1.0, 2.0]})),
            Err(GeometryError::MissingType)
        );
        assert_eq!(
            extent_of(&json!({"type": "Circle", "coordinates": [1.0, 2.0]})),
            Err(GeometryError::UnsupportedType("Circle".to_string()))
        );
        assert_eq!(
            extent_of(&json!({"type": "Polygon", "coordinates": []})),
            Err(GeometryError::NoCoordinates)
        );
        assert_eq!(
            extent_of(&json!({"type": "Point", "coordinates": [1.0]})),
            Err(GeometryError::InvalidPosition)
        );
        assert_eq!(
            extent_of(&json!({"type": "Point", "coordinates": "1 2"})),
            Err(GeometryError::InvalidPosition)
        );
    }

    #[test]
    fn test_point_geojson() {
        assert_eq!(
            point_geojson((1.5, -2.0)),
            json!({"type": "Point", "coordinates": [1.5, -2.0]})
        );
    }
}
