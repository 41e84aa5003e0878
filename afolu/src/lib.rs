pub mod analysis;
pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod pipeline;
pub mod report;

pub use analysis::carbon::CarbonEstimate;
pub use analysis::zonal::ZonalStats;
pub use config::AnalysisConfig;
pub use error::{CatalogError, NarrativeError, PipelineError};
pub use geo_core::AreaOfInterest;
pub use pipeline::{AnalysisParams, PipelineContext, RunOptions, Session};
