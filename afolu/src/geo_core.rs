use anyhow::{Context, Result};
use geo::{BoundingRect, Coord, GeodesicArea, HaversineDestination, LineString, MultiPolygon, Point, Polygon};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::collect::global_variables::{DEFAULT_AOI_LAT, DEFAULT_AOI_LON, DEFAULT_AOI_RADIUS_M};

/// Vertices used to approximate a point buffer
const BUFFER_SEGMENTS: usize = 64;

/// Area of interest under analysis.
/// Always a (multi)polygon in WGS84 longitude/latitude; immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    geometry: MultiPolygon<f64>,
}

impl AreaOfInterest {
    /// Build from a single polygon
    pub fn from_polygon(polygon: Polygon<f64>) -> Result<Self> {
        Self::from_multi_polygon(MultiPolygon::new(vec![polygon]))
    }

    /// Build from a multipolygon, validating it first
    pub fn from_multi_polygon(geometry: MultiPolygon<f64>) -> Result<Self> {
        validate(&geometry)?;
        Ok(AreaOfInterest { geometry })
    }

    /// Parse a drawn area from GeoJSON text.
    /// A FeatureCollection contributes its last feature with a geometry (the most recent drawing).
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let geojson: GeoJson = text.parse().context("Failed to parse area of interest GeoJSON")?;

        let geometry = match geojson {
            GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .rev()
                .find_map(|f| f.geometry)
                .context("FeatureCollection has no feature with a geometry")?,
            GeoJson::Feature(f) => f.geometry.context("Feature has no geometry")?,
            GeoJson::Geometry(g) => g,
        };

        let geo_geom = geo::Geometry::<f64>::try_from(geometry)
            .context("Failed to convert GeoJSON geometry to geo geometry")?;

        match geo_geom {
            geo::Geometry::Polygon(p) => Self::from_polygon(p),
            geo::Geometry::MultiPolygon(mp) => Self::from_multi_polygon(mp),
            other => anyhow::bail!(
                "Area of interest must be a Polygon or MultiPolygon, got {}",
                geometry_kind(&other)
            ),
        }
    }

    /// Read a drawn area from a GeoJSON file
    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read area of interest file: {:?}", path))?;
        Self::from_geojson_str(&text)
    }

    /// Circle of `radius_m` metres around a lon/lat point
    pub fn point_buffer(lon: f64, lat: f64, radius_m: f64) -> Result<Self> {
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            anyhow::bail!("Buffer centre ({}, {}) is outside WGS84 bounds", lon, lat);
        }
        if !(radius_m.is_finite() && radius_m > 0.0) {
            anyhow::bail!("Buffer radius must be positive, got {}", radius_m);
        }

        let centre = Point::new(lon, lat);
        let mut ring: Vec<Coord<f64>> = (0..BUFFER_SEGMENTS)
            .map(|i| {
                let bearing = 360.0 * i as f64 / BUFFER_SEGMENTS as f64;
                centre.haversine_destination(bearing, radius_m).into()
            })
            .collect();
        ring.push(ring[0]);

        Self::from_polygon(Polygon::new(LineString::from(ring), vec![]))
    }

    /// Fallback area used when the user has not drawn one
    pub fn default_fallback() -> Result<Self> {
        Self::point_buffer(DEFAULT_AOI_LON, DEFAULT_AOI_LAT, DEFAULT_AOI_RADIUS_M)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn bbox(&self) -> BoundingBox {
        // validate() guarantees at least one coordinate
        match self.geometry.bounding_rect() {
            Some(rect) => BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
            None => BoundingBox::new(0.0, 0.0, 0.0, 0.0),
        }
    }

    /// Geodesic area in hectares
    pub fn area_hectares(&self) -> f64 {
        self.geometry.geodesic_area_unsigned() / 10_000.0
    }

    pub fn to_geojson(&self) -> geojson::Geometry {
        if self.geometry.0.len() == 1 {
            geojson::Geometry::new(geojson::Value::from(&self.geometry.0[0]))
        } else {
            geojson::Geometry::new(geojson::Value::from(&self.geometry))
        }
    }

    pub fn to_geojson_string(&self) -> String {
        serde_json::to_string(&self.to_geojson()).unwrap_or_default()
    }
}

fn validate(geometry: &MultiPolygon<f64>) -> Result<()> {
    if geometry.0.is_empty() {
        anyhow::bail!("Area of interest is empty");
    }
    for polygon in &geometry.0 {
        let exterior = polygon.exterior();
        if exterior.0.len() < 4 {
            anyhow::bail!(
                "Area of interest ring needs at least 4 positions, got {}",
                exterior.0.len()
            );
        }
        for c in exterior.coords() {
            if !c.x.is_finite() || !c.y.is_finite() {
                anyhow::bail!("Area of interest has a non-finite coordinate");
            }
            if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
                anyhow::bail!(
                    "Coordinate ({}, {}) is outside WGS84 bounds",
                    c.x,
                    c.y
                );
            }
        }
    }
    if geometry.geodesic_area_unsigned() <= 0.0 {
        anyhow::bail!("Area of interest has zero area");
    }
    Ok(())
}

fn geometry_kind(geom: &geo::Geometry<f64>) -> &'static str {
    match geom {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{
        "type": "Polygon",
        "coordinates": [[[-75.6, -8.6], [-75.5, -8.6], [-75.5, -8.5], [-75.6, -8.5], [-75.6, -8.6]]]
    }"#;

    #[test]
    fn test_default_fallback() {
        let aoi = AreaOfInterest::default_fallback().unwrap();
        let bbox = aoi.bbox();
        assert!(bbox.min_x < DEFAULT_AOI_LON && DEFAULT_AOI_LON < bbox.max_x);
        assert!(bbox.min_y < DEFAULT_AOI_LAT && DEFAULT_AOI_LAT < bbox.max_y);
        // pi * 10 km^2 ~= 31,400 ha
        let area = aoi.area_hectares();
        assert!(area > 30_000.0 && area < 32_000.0, "area = {}", area);
    }

    #[test]
    fn test_from_geojson_geometry() {
        let aoi = AreaOfInterest::from_geojson_str(SQUARE).unwrap();
        let bbox = aoi.bbox();
        assert_eq!(bbox.min_x, -75.6);
        assert_eq!(bbox.max_y, -8.5);
    }

    #[test]
    fn test_from_feature_collection_uses_last_drawing() {
        let fc = format!(
            r#"{{"type": "FeatureCollection", "features": [
                {{"type": "Feature", "properties": {{}}, "geometry": {{"type": "Point", "coordinates": [0.0, 0.0]}}}},
                {{"type": "Feature", "properties": {{}}, "geometry": {}}}
            ]}}"#,
            SQUARE
        );
        let aoi = AreaOfInterest::from_geojson_str(&fc).unwrap();
        assert_eq!(aoi.bbox().min_x, -75.6);
    }

    #[test]
    fn test_rejects_non_polygon() {
        let point = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        let err = AreaOfInterest::from_geojson_str(point).unwrap_err();
        assert!(err.to_string().contains("Point"));
    }

    #[test]
    fn test_rejects_invalid_buffer() {
        assert!(AreaOfInterest::point_buffer(200.0, 0.0, 100.0).is_err());
        assert!(AreaOfInterest::point_buffer(0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_rejects_degenerate_polygon() {
        let flat = r#"{"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 0.0]]]}"#;
        assert!(AreaOfInterest::from_geojson_str(flat).is_err());
    }

    #[test]
    fn test_geojson_round_trip_is_stable() {
        let aoi = AreaOfInterest::from_geojson_str(SQUARE).unwrap();
        let again = AreaOfInterest::from_geojson_str(&aoi.to_geojson_string()).unwrap();
        assert_eq!(aoi, again);
    }
}
