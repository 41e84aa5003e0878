//! Imagery catalog contract.
//!
//! The catalog owns the rasters: it lists scenes, resolves annual land-cover
//! maps and evaluates band expressions with a spatial reducer. The pipeline
//! only ever sees scene references and reduced scalars.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::band::BandImage;
use crate::collect::global_variables::{
    BAND_BLUE, BAND_NIR, BAND_RED, BAND_SWIR, SENTINEL2_CLOUD_PROPERTY, SENTINEL2_COLLECTION,
    SENTINEL2_RESOLUTION_M,
};
use crate::error::CatalogError;
use crate::geo_core::AreaOfInterest;

/// Spectral band identifiers of a mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectralBands {
    pub nir: String,
    pub red: String,
    pub blue: String,
    pub swir: String,
}

impl Default for SpectralBands {
    fn default() -> Self {
        SpectralBands {
            nir: BAND_NIR.to_string(),
            red: BAND_RED.to_string(),
            blue: BAND_BLUE.to_string(),
            swir: BAND_SWIR.to_string(),
        }
    }
}

/// Satellite mission queried for optical imagery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mission {
    /// Human-readable sensor name used in prompts and reports
    pub label: String,
    pub collection_id: String,
    /// Scene property holding the cloud percentage
    pub cloud_property: String,
    /// Native resolution in metres
    pub resolution_m: f64,
    pub bands: SpectralBands,
}

impl Default for Mission {
    fn default() -> Self {
        Mission {
            label: "Sentinel-2 Level-2A".to_string(),
            collection_id: SENTINEL2_COLLECTION.to_string(),
            cloud_property: SENTINEL2_CLOUD_PROPERTY.to_string(),
            resolution_m: SENTINEL2_RESOLUTION_M,
            bands: SpectralBands::default(),
        }
    }
}

/// Scene search parameters
#[derive(Debug, Clone)]
pub struct CollectionQuery<'a> {
    pub mission: &'a Mission,
    pub aoi: &'a AreaOfInterest,
    /// Inclusive
    pub start: NaiveDate,
    /// Exclusive
    pub end: NaiveDate,
    pub cloud_cover_ceiling: u8,
}

/// One scene of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRef {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub cloud_cover: Option<f64>,
}

/// Scenes matching a query, ordered by acquisition date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCollection {
    pub collection_id: String,
    scenes: Vec<SceneRef>,
}

impl ImageCollection {
    pub fn new(collection_id: impl Into<String>, mut scenes: Vec<SceneRef>) -> Self {
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));
        ImageCollection {
            collection_id: collection_id.into(),
            scenes,
        }
    }

    pub fn scenes(&self) -> &[SceneRef] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// One annual land-cover classification raster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationImage {
    pub dataset: String,
    pub id: String,
    pub year: i32,
    /// Band holding the class codes
    pub band: String,
}

/// Band name of the earlier map in [`ImageSource::ClassificationPair`]
pub const PAIR_BEFORE: &str = "before";
/// Band name of the later map in [`ImageSource::ClassificationPair`]
pub const PAIR_AFTER: &str = "after";

/// Image a reduction reads its bands from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageSource {
    /// `bands` evaluated on every scene of the collection, then the
    /// per-pixel median of each band across scenes
    MedianComposite {
        collection: ImageCollection,
        bands: Vec<BandImage>,
    },
    /// Two classification maps stacked as bands `before` and `after`
    ClassificationPair {
        before: ClassificationImage,
        after: ClassificationImage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reducer {
    Mean,
    Sum,
}

/// Spatial reduction of derived bands over an area
#[derive(Debug, Clone)]
pub struct ReduceRequest<'a> {
    pub source: &'a ImageSource,
    pub bands: &'a [BandImage],
    pub reducer: Reducer,
    pub aoi: &'a AreaOfInterest,
    /// Pixel size in metres
    pub scale: f64,
    /// Ceiling on the number of pixels the reduction may touch
    pub max_pixels: u64,
}

/// Reduced value per band; `None` when the band has no valid pixel in the area
pub type RegionStats = BTreeMap<String, Option<f64>>;

/// Remote-sensing platform the pipeline pulls imagery from
pub trait ImageryCatalog: Send + Sync {
    fn fetch_collection(&self, query: &CollectionQuery<'_>) -> Result<ImageCollection, CatalogError>;

    fn fetch_classification(&self, dataset: &str, year: i32) -> Result<ClassificationImage, CatalogError>;

    /// Fails with [`CatalogError::PixelLimitExceeded`] rather than truncating
    fn reduce_region(&self, request: &ReduceRequest<'_>) -> Result<RegionStats, CatalogError>;
}
