//! In-process imagery catalog over small pixel grids.
//!
//! Every scene and classification map is a flat list of pixels sharing one
//! grid; reductions evaluate band expressions pixel by pixel with
//! [`BandExpr::eval`](crate::analysis::band::BandExpr::eval). Used for offline
//! runs and as the catalog double in tests.

use chrono::{DateTime, NaiveTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::analysis::band::BandImage;
use crate::collect::catalog::{
    ClassificationImage, CollectionQuery, ImageCollection, ImageSource, ImageryCatalog, ReduceRequest,
    Reducer, RegionStats, SceneRef, PAIR_AFTER, PAIR_BEFORE,
};
use crate::error::CatalogError;

/// Band values of one pixel
pub type Pixel = BTreeMap<String, f64>;

#[derive(Debug, Clone)]
struct MemoryScene {
    collection_id: String,
    scene: SceneRef,
    pixels: Vec<Pixel>,
}

#[derive(Debug, Clone)]
struct MemoryClassification {
    image: ClassificationImage,
    classes: Vec<f64>,
}

/// Catalog backed by in-memory rasters
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    scenes: Vec<MemoryScene>,
    classifications: Vec<MemoryClassification>,
    failing_bands: BTreeSet<String>,
    collection_calls: AtomicUsize,
    reduce_calls: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scene whose pixels carry the given band values
    pub fn with_scene(
        mut self,
        collection_id: &str,
        id: &str,
        acquired: DateTime<Utc>,
        cloud_cover: f64,
        pixels: Vec<Pixel>,
    ) -> Self {
        self.scenes.push(MemoryScene {
            collection_id: collection_id.to_string(),
            scene: SceneRef {
                id: id.to_string(),
                acquired,
                cloud_cover: Some(cloud_cover),
            },
            pixels,
        });
        self
    }

    /// Add a scene of `pixel_count` identical pixels
    pub fn with_uniform_scene(
        self,
        collection_id: &str,
        id: &str,
        acquired: DateTime<Utc>,
        cloud_cover: f64,
        bands: &[(&str, f64)],
        pixel_count: usize,
    ) -> Self {
        let pixel: Pixel = bands.iter().map(|(b, v)| (b.to_string(), *v)).collect();
        self.with_scene(collection_id, id, acquired, cloud_cover, vec![pixel; pixel_count])
    }

    /// Add an annual classification map
    pub fn with_classification(mut self, dataset: &str, year: i32, band: &str, classes: Vec<f64>) -> Self {
        self.classifications.push(MemoryClassification {
            image: ClassificationImage {
                dataset: dataset.to_string(),
                id: format!("{}/{}", dataset, year),
                year,
                band: band.to_string(),
            },
            classes,
        });
        self
    }

    /// Make every reduction that asks for `band` fail
    pub fn with_failing_band(mut self, band: &str) -> Self {
        self.failing_bands.insert(band.to_string());
        self
    }

    /// Number of `fetch_collection` calls served so far
    pub fn collection_calls(&self) -> usize {
        self.collection_calls.load(Ordering::SeqCst)
    }

    /// Number of `reduce_region` calls served so far
    pub fn reduce_calls(&self) -> usize {
        self.reduce_calls.load(Ordering::SeqCst)
    }

    /// Evaluate `bands` on each scene, then take the per-pixel median across scenes
    fn composite(&self, collection: &ImageCollection, bands: &[BandImage]) -> Result<Vec<Pixel>, CatalogError> {
        let members: Vec<&MemoryScene> = collection
            .scenes()
            .iter()
            .filter_map(|s| {
                self.scenes
                    .iter()
                    .find(|m| m.collection_id == collection.collection_id && m.scene.id == s.id)
            })
            .collect();
        if members.is_empty() {
            return Err(CatalogError::NotFound {
                what: format!("scenes of {}", collection.collection_id),
            });
        }

        let width = members.iter().map(|m| m.pixels.len()).min().unwrap_or(0);
        let composite = (0..width)
            .map(|i| {
                bands
                    .iter()
                    .filter_map(|band| {
                        let values: Vec<f64> = members
                            .iter()
                            .filter_map(|m| band.eval(&|name: &str| m.pixels[i].get(name).copied()))
                            .collect();
                        median(values).map(|v| (band.name.clone(), v))
                    })
                    .collect()
            })
            .collect();
        Ok(composite)
    }

    fn classes(&self, image: &ClassificationImage) -> Result<&[f64], CatalogError> {
        self.classifications
            .iter()
            .find(|c| c.image.dataset == image.dataset && c.image.year == image.year)
            .map(|c| c.classes.as_slice())
            .ok_or_else(|| CatalogError::NotFound { what: image.id.clone() })
    }

    fn pixels(&self, source: &ImageSource) -> Result<Vec<Pixel>, CatalogError> {
        match source {
            ImageSource::MedianComposite { collection, bands } => self.composite(collection, bands),
            ImageSource::ClassificationPair { before, after } => {
                let before = self.classes(before)?;
                let after = self.classes(after)?;
                Ok(before
                    .iter()
                    .zip(after)
                    .map(|(b, a)| Pixel::from([(PAIR_BEFORE.to_string(), *b), (PAIR_AFTER.to_string(), *a)]))
                    .collect())
            }
        }
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

impl ImageryCatalog for MemoryCatalog {
    fn fetch_collection(&self, query: &CollectionQuery<'_>) -> Result<ImageCollection, CatalogError> {
        self.collection_calls.fetch_add(1, Ordering::SeqCst);
        let start = query.start.and_time(NaiveTime::MIN).and_utc();
        let end = query.end.and_time(NaiveTime::MIN).and_utc();
        let ceiling = f64::from(query.cloud_cover_ceiling);

        let scenes: Vec<SceneRef> = self
            .scenes
            .iter()
            .filter(|m| m.collection_id == query.mission.collection_id)
            .filter(|m| m.scene.acquired >= start && m.scene.acquired < end)
            .filter(|m| m.scene.cloud_cover.map_or(false, |c| c < ceiling))
            .map(|m| m.scene.clone())
            .collect();
        debug!(
            "memory catalog: {} scene(s) of {} match",
            scenes.len(),
            query.mission.collection_id
        );
        Ok(ImageCollection::new(query.mission.collection_id.clone(), scenes))
    }

    fn fetch_classification(&self, dataset: &str, year: i32) -> Result<ClassificationImage, CatalogError> {
        self.classifications
            .iter()
            .find(|c| c.image.dataset == dataset && c.image.year == year)
            .map(|c| c.image.clone())
            .ok_or_else(|| CatalogError::NotFound {
                what: format!("{} for {}", dataset, year),
            })
    }

    fn reduce_region(&self, request: &ReduceRequest<'_>) -> Result<RegionStats, CatalogError> {
        self.reduce_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(band) = request.bands.iter().find(|b| self.failing_bands.contains(&b.name)) {
            return Err(CatalogError::Rejected {
                status: 400,
                message: format!("band {} cannot be computed", band.name),
            });
        }

        // Same footprint estimate the remote service applies before reducing
        let area_m2 = request.aoi.area_hectares() * 10_000.0;
        let footprint = (area_m2 / (request.scale * request.scale)).ceil();
        if footprint > request.max_pixels as f64 {
            return Err(CatalogError::PixelLimitExceeded {
                max_pixels: request.max_pixels,
            });
        }

        let pixels = self.pixels(request.source)?;
        let stats = request
            .bands
            .iter()
            .map(|band| {
                let values: Vec<f64> = pixels
                    .iter()
                    .filter_map(|p| band.eval(&|name: &str| p.get(name).copied()))
                    .collect();
                let value = if values.is_empty() {
                    None
                } else {
                    let sum: f64 = values.iter().sum();
                    match request.reducer {
                        Reducer::Sum => Some(sum),
                        Reducer::Mean => Some(sum / values.len() as f64),
                    }
                };
                (band.name.clone(), value)
            })
            .collect();
        Ok(stats)
    }
}
