//! Run configuration.
//!
//! Loaded from an optional JSON file; every field has a default. Credentials
//! never live here: they are read from the environment by the collectors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::collect::catalog::Mission;
use crate::collect::global_variables::{
    get_output_path, ANTHROPIC_API_URL, DEFAULT_CHANGE_YEARS, DEFAULT_CLOUD_COVER, DEFAULT_LAND_COVER_SCALE_M,
    DEFAULT_MAX_PIXELS, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_PROJECTION_AREA_HA, DEFAULT_PROJECTION_YEARS,
    DEFAULT_REFERENCE_PRICE, DEFAULT_SCALE_M, EE_API_URL, WORLDCOVER_BAND, WORLDCOVER_RELEASES,
};
use crate::collect::retry::RetryPolicy;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Maximum scene cloud cover in percent (0-100)
    pub cloud_cover_ceiling: u8,
    /// Reduction resolution in metres
    pub scale: f64,
    /// Pixel ceiling for every reduction
    pub max_pixels: u64,
    /// Resolution of the land-cover comparison
    pub land_cover_scale: f64,
    pub output_dir: PathBuf,
    pub imagery: ImageryConfig,
    pub narrative: NarrativeConfig,
    pub report: ReportConfig,
    pub retry: RetryPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            cloud_cover_ceiling: DEFAULT_CLOUD_COVER,
            scale: DEFAULT_SCALE_M,
            max_pixels: DEFAULT_MAX_PIXELS,
            land_cover_scale: DEFAULT_LAND_COVER_SCALE_M,
            output_dir: get_output_path(),
            imagery: ImageryConfig::default(),
            narrative: NarrativeConfig::default(),
            report: ReportConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageryConfig {
    pub api_url: String,
    /// Cloud project billed for requests; falls back to `EARTHENGINE_PROJECT`
    pub project: Option<String>,
    pub mission: Mission,
    /// Classification dataset holding each map year
    pub land_cover_datasets: BTreeMap<i32, String>,
    pub land_cover_band: String,
    /// Years compared by the land-cover change branch
    pub change_years: (i32, i32),
}

impl Default for ImageryConfig {
    fn default() -> Self {
        ImageryConfig {
            api_url: EE_API_URL.to_string(),
            project: None,
            mission: Mission::default(),
            land_cover_datasets: WORLDCOVER_RELEASES
                .iter()
                .map(|(year, dataset)| (*year, dataset.to_string()))
                .collect(),
            land_cover_band: WORLDCOVER_BAND.to_string(),
            change_years: DEFAULT_CHANGE_YEARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub enabled: bool,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        NarrativeConfig {
            enabled: true,
            api_url: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Financial projection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// USD per tCO2
    pub reference_price: f64,
    pub projection_area_ha: f64,
    pub projection_years: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            reference_price: DEFAULT_REFERENCE_PRICE,
            projection_area_ha: DEFAULT_PROJECTION_AREA_HA,
            projection_years: DEFAULT_PROJECTION_YEARS,
        }
    }
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;
        let config: AnalysisConfig =
            serde_json::from_str(&text).context(format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Defaults, overlaid with `path` when given, then validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidInput(msg));
        if self.cloud_cover_ceiling > 100 {
            return invalid(format!("cloud cover ceiling must be 0-100, got {}", self.cloud_cover_ceiling));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return invalid(format!("scale must be positive, got {}", self.scale));
        }
        if !(self.land_cover_scale.is_finite() && self.land_cover_scale > 0.0) {
            return invalid(format!("land cover scale must be positive, got {}", self.land_cover_scale));
        }
        if self.max_pixels == 0 {
            return invalid("pixel ceiling must be at least 1".to_string());
        }
        if !(self.report.reference_price.is_finite() && self.report.reference_price >= 0.0) {
            return invalid(format!("reference price must be non-negative, got {}", self.report.reference_price));
        }
        if !(self.report.projection_area_ha.is_finite() && self.report.projection_area_ha >= 0.0) {
            return invalid(format!(
                "projection area must be non-negative, got {}",
                self.report.projection_area_ha
            ));
        }
        if self.narrative.max_tokens == 0 {
            return invalid("narrative max tokens must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.cloud_cover_ceiling, 10);
        assert_eq!(config.scale, 30.0);
        assert_eq!(config.max_pixels, 10_000_000_000_000);
        assert_eq!(config.report.reference_price, 15.0);
        assert_eq!(config.imagery.change_years, (2020, 2021));
        assert_eq!(config.narrative.max_tokens, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scale": 60, "report": {{"reference_price": 18.0}}}}"#).unwrap();
        let config = AnalysisConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scale, 60.0);
        assert_eq!(config.report.reference_price, 18.0);
        assert_eq!(config.report.projection_area_ha, 100.0);
        assert_eq!(config.cloud_cover_ceiling, 10);
        assert_eq!(config.imagery.mission.bands.nir, "B8");
    }

    #[test]
    fn test_land_cover_dataset_per_year() {
        let dataset = |config: &AnalysisConfig, year: i32| config.imagery.land_cover_datasets.get(&year).cloned();
        let config = AnalysisConfig::default();
        assert_eq!(dataset(&config, 2020).as_deref(), Some("ESA/WorldCover/v100"));
        assert_eq!(dataset(&config, 2021).as_deref(), Some("ESA/WorldCover/v200"));
        assert_eq!(dataset(&config, 2019), None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"imagery": {{"land_cover_datasets": {{"2021": "ESA/WorldCover/v200", "2022": "custom/lc"}}}}}}"#
        )
        .unwrap();
        let config = AnalysisConfig::load(Some(file.path())).unwrap();
        assert_eq!(dataset(&config, 2022).as_deref(), Some("custom/lc"));
        assert_eq!(dataset(&config, 2020), None);
    }

    #[test]
    fn test_validation() {
        let mut config = AnalysisConfig::default();
        config.cloud_cover_ceiling = 101;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidInput(_))));

        let mut config = AnalysisConfig::default();
        config.scale = 0.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.report.reference_price = -1.0;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.max_pixels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cloud_cover_ceiling": 150}}"#).unwrap();
        assert!(AnalysisConfig::load(Some(file.path())).is_err());
    }
}
