//! Session orchestrator.
//!
//! A run moves an immutable [`PipelineContext`] through the stages; each
//! stage reads the context and returns a new one. [`Session`] memoizes the
//! latest context per [`RunKey`], so a failed or abandoned run resumes from
//! its last completed stage.

use chrono::{DateTime, Duration, Local, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::analysis::carbon::{CarbonEstimator, CarbonResult};
use crate::analysis::indices::{IndexCalculator, IndexedImage};
use crate::analysis::land_cover::{LandCoverChange, LandCoverChangeDetector};
use crate::analysis::zonal::{ZonalReducer, ZonalStats};
use crate::collect::catalog::{CollectionQuery, ImageCollection, ImageryCatalog};
use crate::collect::global_variables::DEFAULT_ANALYSIS_DAYS;
use crate::config::AnalysisConfig;
use crate::error::PipelineError;
use crate::geo_core::AreaOfInterest;
use crate::report::assembler::{Report, ReportAssembler, ReportInput};
use crate::report::narrative::{AnalysisMetadata, NarrativeService, NarrativeSynthesizer, NarrativeText};

/// User-facing parameters of one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    pub aoi: AreaOfInterest,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Exclusive
    pub end_date: NaiveDate,
    pub cloud_cover_ceiling: u8,
}

impl AnalysisParams {
    pub fn new(aoi: AreaOfInterest, start_date: NaiveDate, end_date: NaiveDate, cloud_cover_ceiling: u8) -> Self {
        AnalysisParams {
            aoi,
            start_date,
            end_date,
            cloud_cover_ceiling,
        }
    }

    /// The year of imagery ending at `today`
    pub fn last_year(aoi: AreaOfInterest, today: NaiveDate, cloud_cover_ceiling: u8) -> Self {
        Self::new(aoi, today - Duration::days(DEFAULT_ANALYSIS_DAYS), today, cloud_cover_ceiling)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.end_date <= self.start_date {
            return Err(PipelineError::InvalidInput(format!(
                "end date {} must be after start date {}",
                self.end_date, self.start_date
            )));
        }
        if self.cloud_cover_ceiling > 100 {
            return Err(PipelineError::InvalidInput(format!(
                "cloud cover ceiling must be 0-100, got {}",
                self.cloud_cover_ceiling
            )));
        }
        if !(self.aoi.area_hectares() > 0.0) {
            return Err(PipelineError::InvalidInput("area of interest is empty".to_string()));
        }
        Ok(())
    }

    pub fn key(&self) -> RunKey {
        RunKey {
            aoi: self.aoi.to_geojson_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            cloud_cover_ceiling: self.cloud_cover_ceiling,
        }
    }
}

/// Memoization key: area, date range and cloud ceiling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    aoi: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    cloud_cover_ceiling: u8,
}

/// Outcome of the land-cover side branch
#[derive(Debug, Clone, PartialEq)]
pub enum LandCoverStatus {
    NotRequested,
    Unavailable { year_before: i32, year_after: i32 },
    Detected(LandCoverChange),
}

impl LandCoverStatus {
    pub fn change(&self) -> Option<&LandCoverChange> {
        match self {
            LandCoverStatus::Detected(change) => Some(change),
            _ => None,
        }
    }

    fn covers(&self, years: (i32, i32)) -> bool {
        match self {
            LandCoverStatus::NotRequested => false,
            LandCoverStatus::Unavailable { year_before, year_after } => (*year_before, *year_after) == years,
            LandCoverStatus::Detected(c) => (c.year_before, c.year_after) == years,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    ComputeIndices,
    EstimateCarbon,
    SynthesizeNarrative,
    DetectChange,
    AssembleReport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Acquire => "Fetching imagery",
            Stage::ComputeIndices => "Computing vegetation indices",
            Stage::EstimateCarbon => "Estimating carbon",
            Stage::SynthesizeNarrative => "Generating expert analysis",
            Stage::DetectChange => "Detecting land-cover change",
            Stage::AssembleReport => "Assembling report",
        })
    }
}

/// State of one run. Never mutated in place: every stage returns a copy
/// with its own result filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineContext {
    pub params: AnalysisParams,
    pub collection: Option<ImageCollection>,
    pub indexed: Option<IndexedImage>,
    pub indices: Option<ZonalStats>,
    pub carbon: Option<CarbonResult>,
    pub narrative: Option<NarrativeText>,
    pub land_cover: LandCoverStatus,
    pub report: Option<Report>,
}

impl PipelineContext {
    pub fn new(params: AnalysisParams) -> Self {
        PipelineContext {
            params,
            collection: None,
            indexed: None,
            indices: None,
            carbon: None,
            narrative: None,
            land_cover: LandCoverStatus::NotRequested,
            report: None,
        }
    }

    pub fn metadata(&self, config: &AnalysisConfig) -> AnalysisMetadata {
        let mission = &config.imagery.mission;
        AnalysisMetadata {
            start_date: self.params.start_date,
            end_date: self.params.end_date,
            cloud_cover_ceiling: self.params.cloud_cover_ceiling,
            image_count: self.collection.as_ref().map(ImageCollection::len),
            sensor: mission.label.clone(),
            resolution_m: mission.resolution_m,
        }
    }
}

/// Stage implementations over borrowed collaborators
pub struct Pipeline<'a> {
    catalog: &'a dyn ImageryCatalog,
    narrator: Option<&'a dyn NarrativeService>,
    config: &'a AnalysisConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        catalog: &'a dyn ImageryCatalog,
        narrator: Option<&'a dyn NarrativeService>,
        config: &'a AnalysisConfig,
    ) -> Self {
        Pipeline {
            catalog,
            narrator,
            config,
        }
    }

    pub fn acquire(&self, ctx: &PipelineContext) -> Result<PipelineContext, PipelineError> {
        let params = &ctx.params;
        let query = CollectionQuery {
            mission: &self.config.imagery.mission,
            aoi: &params.aoi,
            start: params.start_date,
            end: params.end_date,
            cloud_cover_ceiling: params.cloud_cover_ceiling,
        };
        let collection = self
            .catalog
            .fetch_collection(&query)
            .map_err(|e| PipelineError::ImageryUnavailable(e.to_string()))?;
        if collection.is_empty() {
            return Err(PipelineError::NoImagery {
                start: params.start_date.to_string(),
                end: params.end_date.to_string(),
                cloud_cover: params.cloud_cover_ceiling,
            });
        }
        info!("Imagery acquired: {} scene(s)", collection.len());
        Ok(PipelineContext {
            collection: Some(collection),
            ..ctx.clone()
        })
    }

    pub fn compute_indices(&self, ctx: &PipelineContext) -> Result<PipelineContext, PipelineError> {
        let collection = ctx.collection.clone().ok_or(PipelineError::MissingStage {
            stage: "index calculation",
            missing: "an image collection",
        })?;
        let indexed = IndexCalculator::new(self.config.imagery.mission.bands.clone()).run(collection);
        let indices = ZonalReducer::new(self.catalog, self.config.scale, self.config.max_pixels).reduce(
            &indexed.source,
            &indexed.bands,
            &ctx.params.aoi,
        );
        let missing = indices.missing();
        if !missing.is_empty() {
            warn!("Index statistics missing for {:?}", missing);
        }
        Ok(PipelineContext {
            indexed: Some(indexed),
            indices: Some(indices),
            ..ctx.clone()
        })
    }

    pub fn estimate_carbon(&self, ctx: &PipelineContext) -> Result<PipelineContext, PipelineError> {
        let indexed = ctx.indexed.as_ref().ok_or(PipelineError::MissingStage {
            stage: "carbon estimate",
            missing: "vegetation indices",
        })?;
        let carbon =
            CarbonEstimator::new(self.catalog, self.config.scale, self.config.max_pixels).run(indexed, &ctx.params.aoi)?;
        Ok(PipelineContext {
            carbon: Some(carbon),
            ..ctx.clone()
        })
    }

    /// Never fails on the service side: errors become the fallback text
    pub fn synthesize_narrative(&self, ctx: &PipelineContext) -> Result<PipelineContext, PipelineError> {
        let indices = ctx.indices.as_ref().ok_or(PipelineError::MissingStage {
            stage: "narrative",
            missing: "index statistics",
        })?;
        let carbon = ctx.carbon.as_ref().ok_or(PipelineError::MissingStage {
            stage: "narrative",
            missing: "a carbon estimate",
        })?;

        let narrative = match self.narrator {
            Some(service) if self.config.narrative.enabled => {
                let settings = &self.config.narrative;
                NarrativeSynthesizer::new(service, settings.model.clone(), settings.max_tokens).run(
                    carbon.estimate.as_ref(),
                    indices,
                    &ctx.metadata(self.config),
                )
            }
            _ => {
                info!("Narrative disabled");
                NarrativeText::Unavailable
            }
        };
        Ok(PipelineContext {
            narrative: Some(narrative),
            ..ctx.clone()
        })
    }

    /// Side branch; failures are logged and recorded as unavailable
    pub fn detect_change(&self, ctx: &PipelineContext, years: (i32, i32)) -> PipelineContext {
        let imagery = &self.config.imagery;
        let detector = LandCoverChangeDetector::new(
            self.catalog,
            imagery.land_cover_datasets.clone(),
            self.config.land_cover_scale,
            self.config.max_pixels,
        );
        let land_cover = match detector.run(&ctx.params.aoi, years.0, years.1) {
            Some(change) => LandCoverStatus::Detected(change),
            None => LandCoverStatus::Unavailable {
                year_before: years.0,
                year_after: years.1,
            },
        };
        PipelineContext {
            land_cover,
            ..ctx.clone()
        }
    }

    pub fn assemble_report(
        &self,
        ctx: &PipelineContext,
        generated_at: DateTime<Local>,
    ) -> Result<PipelineContext, PipelineError> {
        let missing = |what| PipelineError::MissingStage {
            stage: "report",
            missing: what,
        };
        let indices = ctx.indices.as_ref().ok_or_else(|| missing("index statistics"))?;
        let carbon = ctx.carbon.as_ref().ok_or_else(|| missing("a carbon estimate"))?;
        let narrative = ctx.narrative.as_ref().ok_or_else(|| missing("the narrative"))?;

        let metadata = ctx.metadata(self.config);
        let assembler = ReportAssembler::new(self.config.report.clone(), self.config.imagery.mission.bands.clone());
        let input = ReportInput {
            indices,
            carbon: carbon.estimate.as_ref(),
            metadata: &metadata,
            narrative,
            land_cover: ctx.land_cover.change(),
            area_hectares: Some(ctx.params.aoi.area_hectares()),
        };
        let report = assembler.render(&input, generated_at);
        info!("Report assembled");
        Ok(PipelineContext {
            report: Some(report),
            ..ctx.clone()
        })
    }
}

/// Per-run options that do not affect memoization
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Years compared by the land-cover branch; `None` skips it
    pub land_cover_years: Option<(i32, i32)>,
    /// Timestamp embedded in the report
    pub generated_at: DateTime<Local>,
}

impl RunOptions {
    pub fn new(generated_at: DateTime<Local>) -> Self {
        RunOptions {
            land_cover_years: None,
            generated_at,
        }
    }

    pub fn with_land_cover(mut self, years: (i32, i32)) -> Self {
        self.land_cover_years = Some(years);
        self
    }
}

/// One user session: collaborators, configuration and the run cache
pub struct Session {
    catalog: Arc<dyn ImageryCatalog>,
    narrator: Option<Arc<dyn NarrativeService>>,
    config: AnalysisConfig,
    cache: Mutex<BTreeMap<RunKey, PipelineContext>>,
}

impl Session {
    pub fn new(
        config: AnalysisConfig,
        catalog: Arc<dyn ImageryCatalog>,
        narrator: Option<Arc<dyn NarrativeService>>,
    ) -> Self {
        Session {
            catalog,
            narrator,
            config,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self.catalog.as_ref(), self.narrator.as_deref(), &self.config)
    }

    fn cache(&self) -> MutexGuard<'_, BTreeMap<RunKey, PipelineContext>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, key: &RunKey, ctx: &PipelineContext) {
        self.cache().insert(key.clone(), ctx.clone());
    }

    pub fn cached(&self, key: &RunKey) -> Option<PipelineContext> {
        self.cache().get(key).cloned()
    }

    /// Drop the cached context of one run; true if there was one
    pub fn invalidate(&self, key: &RunKey) -> bool {
        self.cache().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.cache().clear();
    }

    pub fn run(&self, params: AnalysisParams, options: &RunOptions) -> Result<PipelineContext, PipelineError> {
        self.run_observed(params, options, &|_| {})
    }

    /// Run every stage not already cached for these parameters. `observer`
    /// is told when a stage starts.
    pub fn run_observed(
        &self,
        params: AnalysisParams,
        options: &RunOptions,
        observer: &(dyn Fn(Stage) + Sync),
    ) -> Result<PipelineContext, PipelineError> {
        params.validate()?;
        self.config.validate()?;

        let key = params.key();
        let ctx = self.cached(&key).unwrap_or_else(|| PipelineContext::new(params));
        let change_years = options.land_cover_years.filter(|years| !ctx.land_cover.covers(*years));

        let main = || self.advance(&key, ctx.clone(), observer);
        let branch = || {
            change_years.map(|years| {
                observer(Stage::DetectChange);
                self.pipeline().detect_change(&ctx, years).land_cover
            })
        };

        #[cfg(feature = "rayon")]
        let (main, land_cover) = rayon::join(main, branch);
        #[cfg(not(feature = "rayon"))]
        let (main, land_cover) = (main(), branch());

        let mut ctx = main?;
        if let Some(land_cover) = land_cover {
            ctx = PipelineContext { land_cover, ..ctx };
        }

        observer(Stage::AssembleReport);
        let ctx = self.pipeline().assemble_report(&ctx, options.generated_at)?;
        self.store(&key, &ctx);
        Ok(ctx)
    }

    fn advance(
        &self,
        key: &RunKey,
        mut ctx: PipelineContext,
        observer: &(dyn Fn(Stage) + Sync),
    ) -> Result<PipelineContext, PipelineError> {
        let pipeline = self.pipeline();
        if ctx.collection.is_none() {
            observer(Stage::Acquire);
            ctx = pipeline.acquire(&ctx)?;
            self.store(key, &ctx);
        }
        if ctx.indices.is_none() {
            observer(Stage::ComputeIndices);
            ctx = pipeline.compute_indices(&ctx)?;
            self.store(key, &ctx);
        }
        if ctx.carbon.is_none() {
            observer(Stage::EstimateCarbon);
            ctx = pipeline.estimate_carbon(&ctx)?;
            self.store(key, &ctx);
        }
        if ctx.narrative.is_none() {
            observer(Stage::SynthesizeNarrative);
            ctx = pipeline.synthesize_narrative(&ctx)?;
            self.store(key, &ctx);
        }
        Ok(ctx)
    }

    /// Ask the service again and rebuild the report around the new text
    pub fn regenerate_narrative(
        &self,
        key: &RunKey,
        generated_at: DateTime<Local>,
    ) -> Result<PipelineContext, PipelineError> {
        let ctx = self.require(key, "a completed carbon estimate")?;
        let pipeline = self.pipeline();
        let ctx = pipeline.synthesize_narrative(&ctx)?;
        let ctx = pipeline.assemble_report(&ctx, generated_at)?;
        self.store(key, &ctx);
        Ok(ctx)
    }

    /// Re-render the report of a cached run, replacing the previous one
    pub fn regenerate_report(
        &self,
        key: &RunKey,
        generated_at: DateTime<Local>,
    ) -> Result<PipelineContext, PipelineError> {
        let ctx = self.require(key, "a completed narrative")?;
        let ctx = self.pipeline().assemble_report(&ctx, generated_at)?;
        self.store(key, &ctx);
        Ok(ctx)
    }

    fn require(&self, key: &RunKey, missing: &'static str) -> Result<PipelineContext, PipelineError> {
        self.cached(key).ok_or(PipelineError::MissingStage {
            stage: "regeneration",
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::memory::MemoryCatalog;
    use chrono::{TimeZone, Utc};

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::point_buffer(-75.5, -8.5, 1_000.0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::new().with_uniform_scene(
            "COPERNICUS/S2_SR",
            "s1",
            Utc.with_ymd_and_hms(2024, 2, 1, 15, 0, 0).unwrap(),
            3.0,
            &[("B8", 0.3), ("B4", 0.1), ("B2", 0.05), ("B12", 0.15)],
            4,
        )
    }

    #[test]
    fn test_params_validation() {
        let params = AnalysisParams::new(aoi(), date(2024, 2, 1), date(2024, 1, 1), 10);
        assert!(matches!(params.validate(), Err(PipelineError::InvalidInput(_))));

        let params = AnalysisParams::new(aoi(), date(2024, 1, 1), date(2024, 2, 1), 101);
        assert!(params.validate().is_err());

        let params = AnalysisParams::last_year(aoi(), date(2024, 12, 31), 10);
        assert_eq!(params.start_date, date(2024, 1, 1));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_run_key_depends_on_inputs() {
        let a = AnalysisParams::new(aoi(), date(2024, 1, 1), date(2024, 6, 1), 10);
        let b = AnalysisParams::new(aoi(), date(2024, 1, 1), date(2024, 6, 1), 20);
        assert_eq!(a.key(), a.clone().key());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_stages_fill_context_in_order() {
        let catalog = catalog();
        let config = AnalysisConfig::default();
        let pipeline = Pipeline::new(&catalog, None, &config);
        let ctx = PipelineContext::new(AnalysisParams::new(aoi(), date(2024, 1, 1), date(2024, 6, 1), 10));

        let err = pipeline.estimate_carbon(&ctx).unwrap_err();
        assert!(matches!(err, PipelineError::MissingStage { .. }));

        let ctx = pipeline.acquire(&ctx).unwrap();
        let ctx = pipeline.compute_indices(&ctx).unwrap();
        let ctx = pipeline.estimate_carbon(&ctx).unwrap();
        let ctx = pipeline.synthesize_narrative(&ctx).unwrap();
        assert_eq!(ctx.narrative, Some(NarrativeText::Unavailable));
        assert_eq!(ctx.metadata(&config).image_count, Some(1));
        assert!(ctx.report.is_none());
    }

    #[test]
    fn test_no_imagery_is_fatal() {
        let catalog = MemoryCatalog::new();
        let config = AnalysisConfig::default();
        let pipeline = Pipeline::new(&catalog, None, &config);
        let ctx = PipelineContext::new(AnalysisParams::new(aoi(), date(2024, 1, 1), date(2024, 6, 1), 10));
        assert!(matches!(pipeline.acquire(&ctx), Err(PipelineError::NoImagery { .. })));
    }

    #[test]
    fn test_land_cover_status_covers_years() {
        let status = LandCoverStatus::Unavailable {
            year_before: 2020,
            year_after: 2021,
        };
        assert!(status.covers((2020, 2021)));
        assert!(!status.covers((2019, 2021)));
        assert!(!LandCoverStatus::NotRequested.covers((2020, 2021)));
        assert!(status.change().is_none());
    }
}
