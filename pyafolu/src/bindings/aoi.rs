use afolu::geo_core::AreaOfInterest;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::path::Path;

/// AreaOfInterest Python binding
#[pyclass]
#[derive(Clone)]
pub struct PyAreaOfInterest {
    pub(crate) inner: AreaOfInterest,
}

#[pymethods]
impl PyAreaOfInterest {
    /// Build from a GeoJSON Polygon, MultiPolygon, Feature or FeatureCollection
    #[new]
    fn new(geojson: &str) -> PyResult<Self> {
        AreaOfInterest::from_geojson_str(geojson)
            .map(|inner| PyAreaOfInterest { inner })
            .map_err(|e| PyValueError::new_err(format!("Failed to create AreaOfInterest: {}", e)))
    }

    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        AreaOfInterest::from_geojson_file(Path::new(path))
            .map(|inner| PyAreaOfInterest { inner })
            .map_err(|e| PyValueError::new_err(format!("Failed to read AreaOfInterest: {}", e)))
    }

    /// Geodesic circle of `radius_m` metres around (lon, lat)
    #[staticmethod]
    #[pyo3(signature = (lon, lat, radius_m = 10_000.0))]
    fn point_buffer(lon: f64, lat: f64, radius_m: f64) -> PyResult<Self> {
        AreaOfInterest::point_buffer(lon, lat, radius_m)
            .map(|inner| PyAreaOfInterest { inner })
            .map_err(|e| PyValueError::new_err(format!("Failed to buffer point: {}", e)))
    }

    /// Area used when none is drawn
    #[staticmethod]
    fn fallback() -> PyResult<Self> {
        AreaOfInterest::default_fallback()
            .map(|inner| PyAreaOfInterest { inner })
            .map_err(|e| PyValueError::new_err(format!("Failed to build fallback area: {}", e)))
    }

    #[getter]
    fn area_hectares(&self) -> f64 {
        self.inner.area_hectares()
    }

    /// (min_lon, min_lat, max_lon, max_lat)
    #[getter]
    fn bbox(&self) -> (f64, f64, f64, f64) {
        let b = self.inner.bbox();
        (b.min_x, b.min_y, b.max_x, b.max_y)
    }

    /// Geometry as a GeoJSON dict
    fn get_geojson(&self, py: Python) -> PyResult<Py<PyAny>> {
        let json = py.import("json")?;
        let geometry: Bound<PyAny> = json.call_method1("loads", (self.inner.to_geojson_string(),))?;
        Ok(geometry.unbind())
    }

    fn __repr__(&self) -> String {
        format!("AreaOfInterest({:.2} ha)", self.inner.area_hectares())
    }
}
