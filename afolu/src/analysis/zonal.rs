use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::analysis::band::BandImage;
use crate::collect::catalog::{ImageSource, ImageryCatalog, ReduceRequest, Reducer};
use crate::geo_core::AreaOfInterest;

/// Area mean per band. A `None` entry is a band whose reduction failed or had
/// no valid pixel; partial results are expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZonalStats {
    values: BTreeMap<String, Option<f64>>,
}

impl ZonalStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, band: impl Into<String>, value: Option<f64>) {
        self.values.insert(band.into(), value);
    }

    /// Mean of `band`, `None` when missing or never requested
    pub fn get(&self, band: &str) -> Option<f64> {
        self.values.get(band).copied().flatten()
    }

    pub fn contains(&self, band: &str) -> bool {
        self.values.contains_key(band)
    }

    /// Bands recorded as missing
    pub fn missing(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn valid_count(&self) -> usize {
        self.values.values().filter(|v| v.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, Option<f64>)> for ZonalStats {
    fn from_iter<I: IntoIterator<Item = (S, Option<f64>)>>(iter: I) -> Self {
        ZonalStats {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Zonal Statistics Reducer
/// Spatial mean of each band, one catalog reduction per band so that one
/// failing band never takes the others down
pub struct ZonalReducer<'a> {
    catalog: &'a dyn ImageryCatalog,
    scale: f64,
    max_pixels: u64,
}

impl<'a> ZonalReducer<'a> {
    pub fn new(catalog: &'a dyn ImageryCatalog, scale: f64, max_pixels: u64) -> Self {
        ZonalReducer {
            catalog,
            scale,
            max_pixels,
        }
    }

    /// Reduce `bands` of `source` over `aoi`. Never fails.
    pub fn reduce(&self, source: &ImageSource, bands: &[BandImage], aoi: &AreaOfInterest) -> ZonalStats {
        let mut stats = ZonalStats::new();
        for band in bands {
            let request = ReduceRequest {
                source,
                bands: std::slice::from_ref(band),
                reducer: Reducer::Mean,
                aoi,
                scale: self.scale,
                max_pixels: self.max_pixels,
            };
            let value = match self.catalog.reduce_region(&request) {
                Ok(mut values) => values.remove(&band.name).flatten(),
                Err(e) => {
                    warn!("Statistics for band {} unavailable: {}", band.name, e);
                    None
                }
            };
            if value.is_none() {
                debug!("Band {} recorded as missing", band.name);
            }
            stats.insert(band.name.clone(), value);
        }
        stats
    }
}
