use afolu::collect::anthropic::AnthropicClient;
use afolu::collect::earth_engine::EarthEngineCollect;
use afolu::pipeline::{PipelineContext, RunKey};
use afolu::report::export::{write_report, write_results, SavedResults};
use afolu::report::narrative::NarrativeService;
use afolu::{AnalysisConfig, AnalysisParams, RunOptions, Session};
use chrono::{Local, NaiveDate};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::bindings::aoi::PyAreaOfInterest;

/// Analysis session against Earth Engine and the narrative service.
/// Credentials come from EARTHENGINE_TOKEN, EARTHENGINE_PROJECT and ANTHROPIC_API_KEY.
/// Runs release the GIL while they wait on the network.
#[pyclass]
pub struct PySession {
    inner: Session,
    last_run: Mutex<Option<RunKey>>,
}

fn parse_date(text: &str) -> PyResult<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| PyValueError::new_err(format!("Invalid date {:?} (expected YYYY-MM-DD): {}", text, e)))
}

impl PySession {
    /// Write the report and the results file, then describe them as a dict
    fn export(&self, py: Python, ctx: &PipelineContext) -> PyResult<Py<PyAny>> {
        let config = self.inner.config();
        let report = ctx
            .report
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("Run finished without a report"))?;
        let results = SavedResults::from_context(ctx, config);

        let files = write_report(report, &config.output_dir)
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to write report: {}", e)))?;
        let stats_path = write_results(&results, &report.generated_at, &config.output_dir)
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to write results: {}", e)))?;

        let summary = serde_json::json!({
            "results": results,
            "narrative": ctx.narrative.as_ref().map(|n| n.as_str()),
            "report_path": files.text_path.to_string_lossy(),
            "table_path": files.table_path.to_string_lossy(),
            "stats_path": stats_path.to_string_lossy(),
        });
        let json = py.import("json")?;
        let dict: Bound<PyAny> = json.call_method1("loads", (summary.to_string(),))?;
        Ok(dict.unbind())
    }

    fn last_run(&self) -> PyResult<RunKey> {
        self.last_run
            .lock()
            .map_err(|_| PyRuntimeError::new_err("Session state poisoned"))?
            .clone()
            .ok_or_else(|| PyRuntimeError::new_err("No analysis has been run yet. Call analyze() first."))
    }
}

#[pymethods]
impl PySession {
    #[new]
    #[pyo3(signature = (config_path = None, narrative = true))]
    fn new(config_path: Option<&str>, narrative: bool) -> PyResult<Self> {
        let mut config = AnalysisConfig::load(config_path.map(Path::new))
            .map_err(|e| PyValueError::new_err(format!("Failed to load config: {}", e)))?;
        config.narrative.enabled &= narrative;

        let catalog = EarthEngineCollect::from_env(&config.imagery, config.retry)
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to connect to Earth Engine: {}", e)))?;
        let narrator: Option<Arc<dyn NarrativeService>> = if config.narrative.enabled {
            let client = AnthropicClient::from_env(config.narrative.api_url.clone(), config.retry)
                .map_err(|e| PyRuntimeError::new_err(format!("Failed to create narrative client: {}", e)))?;
            Some(Arc::new(client))
        } else {
            None
        };

        Ok(PySession {
            inner: Session::new(config, Arc::new(catalog), narrator),
            last_run: Mutex::new(None),
        })
    }

    /// Run the analysis and write report, table and results into the output directory
    #[pyo3(signature = (aoi, start, end, cloud_cover = None, change_years = None))]
    fn analyze(
        &self,
        py: Python,
        aoi: &PyAreaOfInterest,
        start: &str,
        end: &str,
        cloud_cover: Option<u8>,
        change_years: Option<(i32, i32)>,
    ) -> PyResult<Py<PyAny>> {
        let cloud_cover = cloud_cover.unwrap_or(self.inner.config().cloud_cover_ceiling);
        let params = AnalysisParams::new(aoi.inner.clone(), parse_date(start)?, parse_date(end)?, cloud_cover);
        let key = params.key();

        let mut options = RunOptions::new(Local::now());
        if let Some(years) = change_years {
            options = options.with_land_cover(years);
        }
        let session = &self.inner;
        let ctx = py
            .detach(|| session.run(params, &options))
            .map_err(|e| PyRuntimeError::new_err(format!("Analysis failed: {}", e)))?;

        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(key);
        }
        self.export(py, &ctx)
    }

    /// Ask for a new narrative on the last run and rewrite its report
    fn regenerate_narrative(&self, py: Python) -> PyResult<Py<PyAny>> {
        let key = self.last_run()?;
        let session = &self.inner;
        let ctx = py
            .detach(|| session.regenerate_narrative(&key, Local::now()))
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to regenerate narrative: {}", e)))?;
        self.export(py, &ctx)
    }

    /// Re-render the report of the last run without any remote call
    fn regenerate_report(&self, py: Python) -> PyResult<Py<PyAny>> {
        let key = self.last_run()?;
        let session = &self.inner;
        let ctx = py
            .detach(|| session.regenerate_report(&key, Local::now()))
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to regenerate report: {}", e)))?;
        self.export(py, &ctx)
    }

    /// Forget every cached run
    fn clear_cache(&self) {
        self.inner.clear();
    }

    /// Effective configuration as a dict
    #[getter]
    fn config(&self, py: Python) -> PyResult<Py<PyAny>> {
        let text = serde_json::to_string(self.inner.config())
            .map_err(|e| PyRuntimeError::new_err(format!("Failed to serialize config: {}", e)))?;
        let json = py.import("json")?;
        let dict: Bound<PyAny> = json.call_method1("loads", (text,))?;
        Ok(dict.unbind())
    }
}
