use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::analysis::band::{BandExpr, BandImage};
use crate::collect::catalog::{ImageSource, ImageryCatalog, ReduceRequest, Reducer, PAIR_AFTER, PAIR_BEFORE};
use crate::geo_core::AreaOfInterest;

pub const CHANGE: &str = "Change";

/// Pixels whose land-cover class differs between two years
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandCoverChange {
    pub year_before: i32,
    pub year_after: i32,
    pub changed_pixels: u64,
    /// Pixel size in metres the count was taken at
    pub scale: f64,
}

impl LandCoverChange {
    pub fn changed_hectares(&self) -> f64 {
        self.changed_pixels as f64 * self.scale * self.scale / 10_000.0
    }
}

/// Land-Cover Change Detector
/// Compares two annual classification maps at their native resolution.
/// Each year is read from the dataset `datasets` maps it to.
pub struct LandCoverChangeDetector<'a> {
    catalog: &'a dyn ImageryCatalog,
    datasets: BTreeMap<i32, String>,
    scale: f64,
    max_pixels: u64,
}

impl<'a> LandCoverChangeDetector<'a> {
    pub fn new(catalog: &'a dyn ImageryCatalog, datasets: BTreeMap<i32, String>, scale: f64, max_pixels: u64) -> Self {
        LandCoverChangeDetector {
            catalog,
            datasets,
            scale,
            max_pixels,
        }
    }

    /// Count changed pixels between `year_before` and `year_after`.
    /// Any failure is logged and yields `None`; it never fails the session.
    pub fn run(&self, aoi: &AreaOfInterest, year_before: i32, year_after: i32) -> Option<LandCoverChange> {
        let fetch = |year: i32| {
            let Some(dataset) = self.datasets.get(&year) else {
                warn!("No land cover dataset configured for {}", year);
                return None;
            };
            match self.catalog.fetch_classification(dataset, year) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!("Land cover {} for {} unavailable: {}", dataset, year, e);
                    None
                }
            }
        };
        let before = fetch(year_before)?;
        let after = fetch(year_after)?;

        let source = ImageSource::ClassificationPair { before, after };
        let change = BandImage::new(CHANGE, BandExpr::band(PAIR_BEFORE).not_equal(BandExpr::band(PAIR_AFTER)));
        let request = ReduceRequest {
            source: &source,
            bands: std::slice::from_ref(&change),
            reducer: Reducer::Sum,
            aoi,
            scale: self.scale,
            max_pixels: self.max_pixels,
        };

        let changed = match self.catalog.reduce_region(&request) {
            Ok(stats) => stats.get(CHANGE).copied().flatten().unwrap_or(0.0),
            Err(e) => {
                warn!("Land cover change {}-{} not computed: {}", year_before, year_after, e);
                return None;
            }
        };

        let result = LandCoverChange {
            year_before,
            year_after,
            changed_pixels: changed.max(0.0).round() as u64,
            scale: self.scale,
        };
        info!(
            "Land cover change {}-{}: {} pixel(s), ~{:.1} ha",
            year_before,
            year_after,
            result.changed_pixels,
            result.changed_hectares()
        );
        Some(result)
    }
}
