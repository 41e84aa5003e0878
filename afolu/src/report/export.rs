use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::carbon::CarbonEstimate;
use crate::analysis::land_cover::LandCoverChange;
use crate::analysis::zonal::ZonalStats;
use crate::config::AnalysisConfig;
use crate::pipeline::PipelineContext;
use crate::report::assembler::Report;
use crate::report::narrative::AnalysisMetadata;

/// Scalar results of a run, enough to render its report again offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResults {
    pub metadata: AnalysisMetadata,
    pub indices: ZonalStats,
    #[serde(default)]
    pub carbon: Option<CarbonEstimate>,
    #[serde(default)]
    pub land_cover: Option<LandCoverChange>,
    #[serde(default)]
    pub area_hectares: Option<f64>,
}

impl SavedResults {
    /// Scalars of a completed (or partially completed) run
    pub fn from_context(ctx: &PipelineContext, config: &AnalysisConfig) -> Self {
        SavedResults {
            metadata: ctx.metadata(config),
            indices: ctx.indices.clone().unwrap_or_default(),
            carbon: ctx.carbon.as_ref().and_then(|c| c.estimate),
            land_cover: ctx.land_cover.change().copied(),
            area_hectares: Some(ctx.params.aoi.area_hectares()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context(format!("Failed to read results file: {:?}", path))?;
        serde_json::from_str(&text).context(format!("Failed to parse results file: {:?}", path))
    }
}

/// Paths of one exported report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub text_path: PathBuf,
    pub table_path: PathBuf,
}

/// `carbon_stats_<stamp>.json`
pub fn results_file_name(generated_at: &DateTime<Local>) -> String {
    format!("carbon_stats_{}.json", generated_at.format("%Y%m%d_%H%M%S"))
}

/// Save `results` next to the report files
pub fn write_results(results: &SavedResults, generated_at: &DateTime<Local>, output_dir: &Path) -> Result<PathBuf> {
    create_dir_all(output_dir).context(format!("Failed to create output directory: {:?}", output_dir))?;
    let path = output_dir.join(results_file_name(generated_at));
    let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
    write(&path, json).context(format!("Failed to write results: {:?}", path))?;
    info!("Results saved to: {:?}", path);
    Ok(path)
}

/// `carbon_report_<stamp>.txt` and `carbon_data_<stamp>.csv`
pub fn report_file_names(generated_at: &DateTime<Local>) -> (String, String) {
    let stamp = generated_at.format("%Y%m%d_%H%M%S");
    (format!("carbon_report_{}.txt", stamp), format!("carbon_data_{}.csv", stamp))
}

/// Write the text and CSV files into `output_dir`, creating it if needed.
/// Existing files with the same names are overwritten.
pub fn write_report(report: &Report, output_dir: &Path) -> Result<ExportedFiles> {
    create_dir_all(output_dir).context(format!("Failed to create output directory: {:?}", output_dir))?;

    let (text_name, table_name) = report_file_names(&report.generated_at);
    let text_path = output_dir.join(text_name);
    let table_path = output_dir.join(table_name);

    write(&text_path, &report.text).context(format!("Failed to write report: {:?}", text_path))?;
    let csv = report.table.to_csv()?;
    write(&table_path, csv).context(format!("Failed to write table: {:?}", table_path))?;

    info!("Report saved to: {:?}", text_path);
    info!("Table saved to: {:?}", table_path);
    Ok(ExportedFiles { text_path, table_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::assembler::{MetricRow, MetricTable};
    use chrono::{NaiveDate, TimeZone};

    fn report(text: &str) -> Report {
        Report {
            generated_at: Local.with_ymd_and_hms(2024, 6, 1, 9, 5, 3).unwrap(),
            text: text.to_string(),
            table: MetricTable {
                rows: vec![MetricRow {
                    metric: "NDVI".to_string(),
                    value: "0.6500".to_string(),
                    unit: "dimensionless".to_string(),
                }],
            },
        }
    }

    #[test]
    fn test_file_names() {
        let (txt, csv) = report_file_names(&report("").generated_at);
        assert_eq!(txt, "carbon_report_20240601_090503.txt");
        assert_eq!(csv, "carbon_data_20240601_090503.csv");
    }

    #[test]
    fn test_regeneration_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let first = write_report(&report("first"), &out).unwrap();
        let second = write_report(&report("second"), &out).unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(&second.text_path).unwrap(), "second");
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
        let csv = std::fs::read_to_string(&second.table_path).unwrap();
        assert_eq!(csv, "Metric,Value,Unit\nNDVI,0.6500,dimensionless\n");
    }

    #[test]
    fn test_results_file_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let at = report("").generated_at;
        let results = SavedResults {
            metadata: AnalysisMetadata {
                start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                cloud_cover_ceiling: 10,
                image_count: Some(3),
                sensor: "Sentinel-2 Level-2A".to_string(),
                resolution_m: 10.0,
            },
            indices: vec![("NDVI", Some(0.7)), ("EVI", None)].into_iter().collect(),
            carbon: Some(CarbonEstimate::from_agb(20.0)),
            land_cover: None,
            area_hectares: Some(12.5),
        };
        let path = write_results(&results, &at, dir.path()).unwrap();
        assert!(path.ends_with("carbon_stats_20240601_090503.json"));
        let loaded = SavedResults::from_file(&path).unwrap();
        assert_eq!(loaded.metadata, results.metadata);
        assert_eq!(loaded.indices, results.indices);
        approx::assert_relative_eq!(loaded.carbon.unwrap().co2, results.carbon.unwrap().co2, epsilon = 1e-9);
    }

    #[test]
    fn test_minimal_results_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(
            &path,
            r#"{"metadata": {"start_date": "2023-01-01", "end_date": "2024-01-01", "cloud_cover_ceiling": 20},
                "indices": {"NDVI": 0.55}}"#,
        )
        .unwrap();
        let results = SavedResults::from_file(&path).unwrap();
        assert_eq!(results.indices.get("NDVI"), Some(0.55));
        assert_eq!(results.metadata.sensor, "Sentinel-2 Level-2A");
        assert!(results.carbon.is_none());
    }
}
