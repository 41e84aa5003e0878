use afolu::collect::catalog::SpectralBands;
use afolu::config::ReportConfig;
use afolu::report::assembler::{ReportAssembler, ReportInput};
use afolu::report::export::SavedResults;
use afolu::report::narrative::NarrativeText;
use chrono::Local;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

/// ReportAssembler Python binding, renders reports from saved results offline
#[pyclass]
pub struct PyReportAssembler {
    inner: ReportAssembler,
}

#[pymethods]
impl PyReportAssembler {
    #[new]
    #[pyo3(signature = (reference_price = 15.0, projection_area_ha = 100.0, projection_years = 10))]
    fn new(reference_price: f64, projection_area_ha: f64, projection_years: u32) -> Self {
        let settings = ReportConfig {
            reference_price,
            projection_area_ha,
            projection_years,
        };
        PyReportAssembler {
            inner: ReportAssembler::new(settings, SpectralBands::default()),
        }
    }

    /// Render `(text, csv)` from the JSON written next to each report
    /// (`carbon_stats_*.json`). Without `narrative` the fallback marker is used.
    #[pyo3(signature = (results_json, narrative = None))]
    fn render(&self, results_json: &str, narrative: Option<String>) -> PyResult<(String, String)> {
        let results: SavedResults = serde_json::from_str(results_json)
            .map_err(|e| PyValueError::new_err(format!("Invalid results JSON: {}", e)))?;
        let narrative = narrative.map_or(NarrativeText::Unavailable, NarrativeText::Generated);

        let input = ReportInput {
            indices: &results.indices,
            carbon: results.carbon.as_ref(),
            metadata: &results.metadata,
            narrative: &narrative,
            land_cover: results.land_cover.as_ref(),
            area_hectares: results.area_hectares,
        };
        let report = self.inner.render(&input, Local::now());
        let csv = report
            .table
            .to_csv()
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to render table: {}", e)))?;
        Ok((report.text, csv))
    }

    #[getter]
    fn reference_price(&self) -> f64 {
        self.inner.settings().reference_price
    }
}
