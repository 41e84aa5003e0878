use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::analysis::carbon::{CarbonEstimate, AGB_COEFFICIENT, AGB_EXPONENT, CARBON_FRACTION};
use crate::analysis::indices::{EVI, LAI, NDVI};
use crate::analysis::land_cover::LandCoverChange;
use crate::analysis::zonal::ZonalStats;
use crate::collect::catalog::SpectralBands;
use crate::commons::basic_functions::{fmt_opt, fmt_opt_unit, label_opt, MISSING};
use crate::config::ReportConfig;
use crate::report::classify::{
    additionality, certification_potential, classify_ndvi, evi_ndvi_consistency, forest_cover_percent,
    lai_assessment,
};
use crate::report::narrative::{AnalysisMetadata, NarrativeText};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const DOUBLE_RULE: &str = "═══════════════════════════════════════════════════════════════════════════";

/// Everything a report is rendered from
#[derive(Debug, Clone, Copy)]
pub struct ReportInput<'a> {
    pub indices: &'a ZonalStats,
    pub carbon: Option<&'a CarbonEstimate>,
    pub metadata: &'a AnalysisMetadata,
    pub narrative: &'a NarrativeText,
    pub land_cover: Option<&'a LandCoverChange>,
    /// Geodesic area of the AOI
    pub area_hectares: Option<f64>,
}

/// One line of the tabular export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Unit")]
    pub unit: String,
}

impl MetricRow {
    fn new(metric: &str, value: Option<f64>, decimals: usize, unit: &str) -> Self {
        MetricRow {
            metric: metric.to_string(),
            value: fmt_opt(value, decimals),
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTable {
    pub rows: Vec<MetricRow>,
}

impl MetricTable {
    /// `Metric,Value,Unit` CSV
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row).context("Failed to write metric row")?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
        String::from_utf8(bytes).context("CSV output is not UTF-8")
    }
}

/// Rendered report. Regenerating replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub generated_at: DateTime<Local>,
    pub text: String,
    pub table: MetricTable,
}

/// Report Assembler
/// Classifies the results and renders the text document and its table
#[derive(Debug, Clone)]
pub struct ReportAssembler {
    settings: ReportConfig,
    bands: SpectralBands,
}

impl ReportAssembler {
    pub fn new(settings: ReportConfig, bands: SpectralBands) -> Self {
        ReportAssembler { settings, bands }
    }

    pub fn settings(&self) -> &ReportConfig {
        &self.settings
    }

    pub fn render(&self, input: &ReportInput<'_>, generated_at: DateTime<Local>) -> Report {
        Report {
            generated_at,
            text: self.render_text(input, &generated_at),
            table: self.render_table(input),
        }
    }

    pub fn render_table(&self, input: &ReportInput<'_>) -> MetricTable {
        let carbon = input.carbon;
        MetricTable {
            rows: vec![
                MetricRow::new("NDVI", input.indices.get(NDVI), 4, "dimensionless"),
                MetricRow::new("EVI", input.indices.get(EVI), 4, "dimensionless"),
                MetricRow::new("LAI", input.indices.get(LAI), 2, "m²/m²"),
                MetricRow::new("AGB", carbon.map(|c| c.agb), 2, "Mg/ha"),
                MetricRow::new("Carbon", carbon.map(|c| c.carbon), 2, "tC/ha"),
                MetricRow::new("CO2/ha/yr", carbon.map(|c| c.co2), 2, "tCO2/ha/yr"),
            ],
        }
    }

    fn permanence(&self, land_cover: Option<&LandCoverChange>) -> String {
        match land_cover {
            Some(change) => format!(
                "review annual changes; {} pixel(s) changed between {} and {} (~{:.1} ha at {} m)",
                change.changed_pixels,
                change.year_before,
                change.year_after,
                change.changed_hectares(),
                change.scale
            ),
            None => "review annual changes (land-cover change not available)".to_string(),
        }
    }

    pub fn render_text(&self, input: &ReportInput<'_>, generated_at: &DateTime<Local>) -> String {
        let ndvi = input.indices.get(NDVI);
        let evi = input.indices.get(EVI);
        let lai = input.indices.get(LAI);
        let co2 = input.carbon.map(|c| c.co2);
        let meta = input.metadata;

        let price = self.settings.reference_price;
        let area = self.settings.projection_area_ha;
        let years = self.settings.projection_years;

        let consistency = match (evi, ndvi) {
            (Some(e), Some(n)) => evi_ndvi_consistency(e, n).to_string(),
            _ => MISSING.to_string(),
        };
        let money = |value: Option<f64>, decimals: usize| match value {
            Some(v) if v.is_finite() => format!("${:.*}", decimals, v),
            _ => MISSING.to_string(),
        };

        format!(
            "\
╔══════════════════════════════════════════════════════════════════════════╗
║                 AFOLU CARBON ANALYSIS - TECHNICAL REPORT                 ║
║                          CARBON CREDIT PROJECT                           ║
╚══════════════════════════════════════════════════════════════════════════╝

ANALYSIS DATE: {timestamp}
PERIOD ANALYSED: {start} to {end}

{rule}

1. INPUT DATA
   • Sensor: {sensor}
   • Resolution: {resolution} metres
   • NIR band: {nir} | Red band: {red} | Blue band: {blue} | SWIR band: {swir}
   • Cloud filter: < {cloud}%
   • Images processed: {images}
   • Area analysed: {area_analysed}

2. VEGETATION METRICS

   NDVI (Normalized Difference Vegetation Index):
   ├─ Value: {ndvi}
   ├─ Classification: {ndvi_class}
   └─ Estimated forest cover: {cover}

   EVI (Enhanced Vegetation Index):
   ├─ Value: {evi}
   └─ Check: {consistency}

   LAI (Leaf Area Index):
   ├─ Value: {lai}
   └─ Interpretation: {lai_class}

3. CARBON ESTIMATES

   Above-ground biomass (AGB):
   ├─ Value: {agb}
   └─ Formula: AGB = {agb_coef} × NDVI^{agb_exp} (IPCC Tier 1)

   Carbon stock:
   ├─ Value: {carbon}
   └─ Conversion factor: {carbon_fraction} (carbon content of dry biomass)

   CO2 SEQUESTRATION [KEY METRIC]:
   ├─ Value: {co2}
   ├─ Uncertainty range: ±20-30%
   └─ Annual equivalent ({area} ha): {co2_area}

4. METHODOLOGY VALIDATION

   ✓ IPCC 2019 conformity:
     • Tier 1: default equations and factors
     • Data: Sentinel-2 multispectral imagery
     • Period: {start} to {end} (5 years minimum recommended)

   ⚠ Identified limitations:
     • Field validation recommended
     • Potential uncertainty under heterogeneous canopy
     • Soil carbon not included (requires further analysis)

5. CARBON CREDIT ELIGIBILITY

   Criteria assessed:
   ├─ Additionality: {additionality}
   ├─ Permanence: {permanence}
   ├─ No leakage: requires a territorial baseline analysis
   └─ Verifiability: public data (Sentinel-2)

   Certification potential:
   └─ {certification}

6. EXPERT ANALYSIS (AI)

{narrative}

7. RECOMMENDATIONS

   Immediate (0-3 months):
   □ Validate with field data (DBH of at least 50 trees)
   □ Establish permanent GPS control points
   □ Document the full methodology

   Short term (3-6 months):
   □ Request methodology approval (Verra/Gold Standard)
   □ Prepare a Monitoring and Verification Plan
   □ Start a degradation baseline

   Medium term (6-12 months):
   □ First independent verification
   □ Carbon credit issuance
   □ Structure revenue and benefit sharing

8. FINANCIAL PROJECTION

   Reference price: ${price:.2}/tCO2

   Annual potential:
   ├─ Per hectare: {per_ha}/yr
   └─ Per {area} hectares: {per_area}/yr

   {years}-year projection (assuming retention):
   └─ {horizon} USD ({area} ha)

{rule}

RECOMMENDED CERTIFICATIONS:
• VCS (Verified Carbon Standard) - most stringent
• Gold Standard for the SDGs - higher price
• Plan Vivo - community projects

NEXT STEPS:
1. Contact an accredited independent validator
2. Submit the methodology for approval
3. Start the project operating period (36 months typical)
4. Annual verification report

{rule}

TECHNICAL REFERENCES:
• IPCC 2019: Refinement to the 2006 IPCC Guidelines
• GFOI Methods Document v3.1
• Verra Standard VCS Version 4.4
• Gold Standard Carbon Methodologies

CONFIDENTIALITY: This document contains confidential technical information.
Distribution restricted to authorised parties.

{double_rule}
Generated by: afolu {version}
{double_rule}
",
            timestamp = generated_at.format("%Y-%m-%d %H:%M:%S"),
            start = meta.start_date,
            end = meta.end_date,
            rule = RULE,
            double_rule = DOUBLE_RULE,
            sensor = meta.sensor,
            resolution = meta.resolution_m,
            nir = self.bands.nir,
            red = self.bands.red,
            blue = self.bands.blue,
            swir = self.bands.swir,
            cloud = meta.cloud_cover_ceiling,
            images = meta.image_count.map(|n| n.to_string()).unwrap_or_else(|| MISSING.to_string()),
            area_analysed = fmt_opt_unit(input.area_hectares, 2, "ha"),
            ndvi = fmt_opt(ndvi, 4),
            ndvi_class = label_opt(ndvi, classify_ndvi),
            cover = fmt_opt_unit(ndvi.map(forest_cover_percent), 1, "%"),
            evi = fmt_opt(evi, 4),
            consistency = consistency,
            lai = fmt_opt_unit(lai, 2, "m²/m²"),
            lai_class = label_opt(lai, lai_assessment),
            agb = fmt_opt_unit(input.carbon.map(|c| c.agb), 2, "Mg/ha"),
            agb_coef = AGB_COEFFICIENT,
            agb_exp = AGB_EXPONENT,
            carbon = fmt_opt_unit(input.carbon.map(|c| c.carbon), 2, "tC/ha"),
            carbon_fraction = CARBON_FRACTION,
            co2 = fmt_opt_unit(co2, 2, "tCO2/ha/yr"),
            area = area,
            co2_area = fmt_opt_unit(co2.map(|c| c * area), 0, "tCO2"),
            additionality = label_opt(ndvi, additionality),
            permanence = self.permanence(input.land_cover),
            certification = label_opt(co2, certification_potential),
            narrative = input.narrative,
            price = price,
            per_ha = money(co2.map(|c| c * price), 2),
            per_area = money(co2.map(|c| c * area * price), 0),
            years = years,
            horizon = fmt_opt(co2.map(|c| c * f64::from(years) * area * price), 0),
            version = env!("CARGO_PKG_VERSION"),
        )
    }
}
