// Report interpretation rules, exposed as plain functions returning labels

use afolu::report::classify;
use pyo3::prelude::*;

#[pyfunction]
pub fn classify_ndvi(ndvi: f64) -> String {
    classify::classify_ndvi(ndvi).to_string()
}

/// Rough forest cover share (percent) implied by an NDVI mean
#[pyfunction]
pub fn forest_cover_percent(ndvi: f64) -> f64 {
    classify::forest_cover_percent(ndvi)
}

#[pyfunction]
pub fn evi_ndvi_consistency(evi: f64, ndvi: f64) -> String {
    classify::evi_ndvi_consistency(evi, ndvi).to_string()
}

#[pyfunction]
pub fn lai_assessment(lai: f64) -> String {
    classify::lai_assessment(lai).to_string()
}

#[pyfunction]
pub fn additionality(ndvi: f64) -> String {
    classify::additionality(ndvi).to_string()
}

#[pyfunction]
pub fn certification_potential(co2: f64) -> String {
    classify::certification_potential(co2).to_string()
}
