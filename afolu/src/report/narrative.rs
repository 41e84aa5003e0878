use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::analysis::carbon::CarbonEstimate;
use crate::analysis::indices::{EVI, LAI, NDVI};
use crate::analysis::zonal::ZonalStats;
use crate::commons::basic_functions::{fmt_opt, MISSING};
use crate::error::NarrativeError;

/// Text substituted when no narrative could be generated
pub const NARRATIVE_UNAVAILABLE: &str = "Analysis not available";

/// External text-generation service
pub trait NarrativeService: Send + Sync {
    fn generate(&self, prompt: &str, max_tokens: u32, model: &str) -> Result<String, NarrativeError>;
}

/// Run parameters embedded in prompts and reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub cloud_cover_ceiling: u8,
    #[serde(default)]
    pub image_count: Option<usize>,
    /// Sensor label, e.g. "Sentinel-2 Level-2A"
    #[serde(default = "default_sensor")]
    pub sensor: String,
    #[serde(default = "default_resolution")]
    pub resolution_m: f64,
}

fn default_sensor() -> String {
    "Sentinel-2 Level-2A".to_string()
}

fn default_resolution() -> f64 {
    crate::collect::global_variables::SENTINEL2_RESOLUTION_M
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NarrativeText {
    Generated(String),
    Unavailable,
}

impl NarrativeText {
    pub fn as_str(&self) -> &str {
        match self {
            NarrativeText::Generated(text) => text,
            NarrativeText::Unavailable => NARRATIVE_UNAVAILABLE,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, NarrativeText::Generated(_))
    }
}

impl fmt::Display for NarrativeText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt asking for an expert reading of the results. Missing values are
/// written as `N/A`.
pub fn build_prompt(carbon: Option<&CarbonEstimate>, indices: &ZonalStats, metadata: &AnalysisMetadata) -> String {
    let image_count = metadata
        .image_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| MISSING.to_string());

    format!(
        "\
AFOLU CARBON POTENTIAL - PROFESSIONAL ANALYSIS
===============================================

GEOSPATIAL DATA:
- Sensor: {sensor} ({resolution:.0} m resolution)
- Period analysed: {start} to {end}
- Cloud cover ceiling: {cloud}%
- Images processed: {image_count}

VEGETATION METRICS:
- NDVI (Normalized Difference Vegetation Index): {ndvi}
  -> Scale: -1 to +1
  -> Interpretation: >0.6 dense forest, 0.4-0.6 moderate forest, <0.2 little vegetation
- EVI (Enhanced Vegetation Index): {evi}
  -> More sensitive to canopy changes
- LAI (Leaf Area Index): {lai}
  -> Optimal forest range: 4-8

CARBON ESTIMATES (IPCC Tier 1):
- Above-ground biomass (AGB): {agb} Mg/ha
- Carbon stock: {carbon} tC/ha
- CO2 sequestration: {co2} tCO2/ha/yr

RESPONSE REQUIREMENTS:

1. INDEX INTERPRETATION
   - Assess the quality and reliability of the NDVI/EVI data
   - Identify anomalies or limitations in the classification
   - Compare with typical ranges for tropical ecosystems

2. METHODOLOGICAL VALIDATION
   - Check conformity with IPCC 2019 (AFOLU) guidance
   - Point out critical methodological assumptions
   - Identify sources of uncertainty

3. CARBON ESTIMATE VALIDATION
   - Validate the computed tCO2/ha/yr figures
   - Give confidence ranges (+/- percent)
   - Compare with reference values per ecosystem type

4. CARBON CREDIT ELIGIBILITY
   - Does the area meet minimum certification requirements?
   - Recommendations to improve credit potential
   - Next steps for validation and verification

5. STRATEGIC RECOMMENDATIONS
   - Recommended management interventions
   - Suggested monitoring (frequency and method)
   - Carbon revenue estimates

Provide a professional analysis suitable for environmental audit reports.
Keep a technical but accessible tone. Use a structured format with headers.
",
        sensor = metadata.sensor,
        resolution = metadata.resolution_m,
        start = metadata.start_date,
        end = metadata.end_date,
        cloud = metadata.cloud_cover_ceiling,
        image_count = image_count,
        ndvi = fmt_opt(indices.get(NDVI), 3),
        evi = fmt_opt(indices.get(EVI), 3),
        lai = fmt_opt(indices.get(LAI), 3),
        agb = fmt_opt(carbon.map(|c| c.agb), 2),
        carbon = fmt_opt(carbon.map(|c| c.carbon), 2),
        co2 = fmt_opt(carbon.map(|c| c.co2), 2),
    )
}

/// Narrative Synthesizer
/// Forwards the prompt to the service; any failure degrades to
/// [`NarrativeText::Unavailable`]
pub struct NarrativeSynthesizer<'a> {
    service: &'a dyn NarrativeService,
    model: String,
    max_tokens: u32,
}

impl<'a> NarrativeSynthesizer<'a> {
    pub fn new(service: &'a dyn NarrativeService, model: impl Into<String>, max_tokens: u32) -> Self {
        NarrativeSynthesizer {
            service,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn run(&self, carbon: Option<&CarbonEstimate>, indices: &ZonalStats, metadata: &AnalysisMetadata) -> NarrativeText {
        let prompt = build_prompt(carbon, indices, metadata);
        match self.service.generate(&prompt, self.max_tokens, &self.model) {
            Ok(text) => {
                info!("Narrative received ({} chars)", text.len());
                NarrativeText::Generated(text)
            }
            Err(e) => {
                warn!("Narrative unavailable: {}", e);
                NarrativeText::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        prompts: Mutex<Vec<String>>,
        reply: Option<String>,
    }

    impl NarrativeService for Recorder {
        fn generate(&self, prompt: &str, _max_tokens: u32, _model: &str) -> Result<String, NarrativeError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().ok_or(NarrativeError::Transient {
                status: 529,
                message: "overloaded".to_string(),
            })
        }
    }

    fn metadata() -> AnalysisMetadata {
        AnalysisMetadata {
            start_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            cloud_cover_ceiling: 10,
            image_count: Some(12),
            sensor: default_sensor(),
            resolution_m: 10.0,
        }
    }

    #[test]
    fn test_prompt_embeds_values() {
        let indices: ZonalStats = vec![(NDVI, Some(0.65)), (EVI, Some(0.6)), (LAI, Some(4.2))]
            .into_iter()
            .collect();
        let carbon = CarbonEstimate::from_ndvi(0.5);
        let prompt = build_prompt(Some(&carbon), &indices, &metadata());
        assert!(prompt.contains("NDVI (Normalized Difference Vegetation Index): 0.650"));
        assert!(prompt.contains("LAI (Leaf Area Index): 4.200"));
        assert!(prompt.contains("CO2 sequestration: 6.40 tCO2/ha/yr"));
        assert!(prompt.contains("2023-01-01 to 2024-01-01"));
        assert!(prompt.contains("Images processed: 12"));
        for section in [
            "1. INDEX INTERPRETATION",
            "2. METHODOLOGICAL VALIDATION",
            "3. CARBON ESTIMATE VALIDATION",
            "4. CARBON CREDIT ELIGIBILITY",
            "5. STRATEGIC RECOMMENDATIONS",
        ] {
            assert!(prompt.contains(section), "missing {}", section);
        }
    }

    #[test]
    fn test_prompt_renders_missing_values() {
        let indices: ZonalStats = vec![(NDVI, Some(0.5)), (EVI, None)].into_iter().collect();
        let prompt = build_prompt(None, &indices, &metadata());
        assert!(prompt.contains("EVI (Enhanced Vegetation Index): N/A"));
        assert!(prompt.contains("LAI (Leaf Area Index): N/A"));
        assert!(prompt.contains("Above-ground biomass (AGB): N/A Mg/ha"));
    }

    #[test]
    fn test_service_failure_yields_fallback() {
        let service = Recorder {
            prompts: Mutex::new(Vec::new()),
            reply: None,
        };
        let text = NarrativeSynthesizer::new(&service, "m", 100).run(None, &ZonalStats::new(), &metadata());
        assert_eq!(text, NarrativeText::Unavailable);
        assert_eq!(text.to_string(), NARRATIVE_UNAVAILABLE);
        assert_eq!(service.prompts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_service_text_is_returned_verbatim() {
        let service = Recorder {
            prompts: Mutex::new(Vec::new()),
            reply: Some("  ## Findings\nDense canopy.  ".to_string()),
        };
        let text = NarrativeSynthesizer::new(&service, "m", 100).run(None, &ZonalStats::new(), &metadata());
        assert_eq!(text.as_str(), "  ## Findings\nDense canopy.  ");
        assert!(text.is_available());
    }
}
