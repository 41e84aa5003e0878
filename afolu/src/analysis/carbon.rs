//! Carbon Estimator, IPCC 2019 Tier 1 defaults for tropical forest.
//!
//! AGB = 10.5 x NDVI^1.5 (NDVI clamped at zero), Carbon = AGB x 0.47,
//! CO2 = Carbon x 3.67.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::band::BandImage;
use crate::analysis::indices::{IndexedImage, NDVI};
use crate::collect::catalog::{ImageryCatalog, ReduceRequest, Reducer};
use crate::error::{CatalogError, PipelineError};
use crate::geo_core::AreaOfInterest;

pub const AGB: &str = "AGB";
pub const CARBON: &str = "Carbon";
pub const CO2: &str = "CO2";

pub const AGB_COEFFICIENT: f64 = 10.5;
pub const AGB_EXPONENT: f64 = 1.5;
/// Carbon fraction of dry biomass
pub const CARBON_FRACTION: f64 = 0.47;
/// Molecular weight ratio CO2 / C
pub const CO2_PER_CARBON: f64 = 3.67;

const STAGE: &str = "carbon estimate";

/// Area-mean carbon figures. AGB in Mg/ha, Carbon in tC/ha, CO2 in tCO2/ha/yr.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbonEstimate {
    #[serde(rename = "AGB")]
    pub agb: f64,
    #[serde(rename = "Carbon")]
    pub carbon: f64,
    #[serde(rename = "CO2")]
    pub co2: f64,
}

impl CarbonEstimate {
    pub fn from_agb(agb: f64) -> Self {
        let carbon = agb * CARBON_FRACTION;
        CarbonEstimate {
            agb,
            carbon,
            co2: carbon * CO2_PER_CARBON,
        }
    }

    /// Back-derive biomass and carbon from a reduced CO2 mean. The conversions
    /// are linear so the area mean commutes with them.
    pub fn from_co2(co2: f64) -> Self {
        let carbon = co2 / CO2_PER_CARBON;
        CarbonEstimate {
            agb: carbon / CARBON_FRACTION,
            carbon,
            co2,
        }
    }

    pub fn from_ndvi(ndvi: f64) -> Self {
        Self::from_agb(agb_from_ndvi(ndvi))
    }
}

/// Scalar form of the AGB equation; negative NDVI yields zero biomass
pub fn agb_from_ndvi(ndvi: f64) -> f64 {
    AGB_COEFFICIENT * ndvi.max(0.0).powf(AGB_EXPONENT)
}

pub fn agb_band(ndvi: &BandImage) -> BandImage {
    BandImage::new(AGB, AGB_COEFFICIENT * ndvi.expr.clone().max(0.0).pow(AGB_EXPONENT))
}

pub fn carbon_band(agb: &BandImage) -> BandImage {
    BandImage::new(CARBON, agb.expr.clone() * CARBON_FRACTION)
}

pub fn co2_band(carbon: &BandImage) -> BandImage {
    BandImage::new(CO2, carbon.expr.clone() * CO2_PER_CARBON)
}

/// Carbon bands plus the reduced estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonResult {
    pub agb_image: BandImage,
    pub carbon_image: BandImage,
    pub co2_image: BandImage,
    /// `None` when the area has no valid NDVI pixel
    pub estimate: Option<CarbonEstimate>,
}

pub struct CarbonEstimator<'a> {
    catalog: &'a dyn ImageryCatalog,
    scale: f64,
    max_pixels: u64,
}

impl<'a> CarbonEstimator<'a> {
    pub fn new(catalog: &'a dyn ImageryCatalog, scale: f64, max_pixels: u64) -> Self {
        CarbonEstimator {
            catalog,
            scale,
            max_pixels,
        }
    }

    /// Derive the carbon bands from the NDVI of `image` and reduce CO2 over
    /// `aoi`. Exceeding the pixel ceiling aborts with
    /// [`PipelineError::ResourceLimit`].
    pub fn run(&self, image: &IndexedImage, aoi: &AreaOfInterest) -> Result<CarbonResult, PipelineError> {
        let ndvi = image.band(NDVI).ok_or(PipelineError::MissingStage {
            stage: STAGE,
            missing: "the NDVI band",
        })?;
        let agb_image = agb_band(ndvi);
        let carbon_image = carbon_band(&agb_image);
        let co2_image = co2_band(&carbon_image);

        let request = ReduceRequest {
            source: &image.source,
            bands: std::slice::from_ref(&co2_image),
            reducer: Reducer::Mean,
            aoi,
            scale: self.scale,
            max_pixels: self.max_pixels,
        };
        let stats = self.catalog.reduce_region(&request).map_err(|e| match e {
            CatalogError::PixelLimitExceeded { max_pixels } => PipelineError::ResourceLimit {
                stage: STAGE,
                max_pixels,
            },
            other => PipelineError::ImageryUnavailable(format!("{}: {}", STAGE, other)),
        })?;

        let estimate = stats.get(CO2).copied().flatten().map(CarbonEstimate::from_co2);
        match &estimate {
            Some(e) => info!(
                "Carbon estimate: AGB {:.2} Mg/ha, Carbon {:.2} tC/ha, CO2 {:.2} tCO2/ha/yr",
                e.agb, e.carbon, e.co2
            ),
            None => info!("Carbon estimate: no valid pixel in the area"),
        }

        Ok(CarbonResult {
            agb_image,
            carbon_image,
            co2_image,
            estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::band::BandExpr;
    use crate::analysis::indices::IndexCalculator;
    use crate::collect::catalog::{ImageCollection, SceneRef, SpectralBands};
    use crate::collect::memory::MemoryCatalog;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_carbon_identities() {
        for agb in [0.0, 0.5, 3.7, 120.0, 450.25] {
            let e = CarbonEstimate::from_agb(agb);
            assert_relative_eq!(e.carbon, agb * 0.47, epsilon = 1e-9);
            assert_relative_eq!(e.co2, e.carbon * 3.67, epsilon = 1e-9);

            let back = CarbonEstimate::from_co2(e.co2);
            assert_relative_eq!(back.agb, agb, epsilon = 1e-9);
            assert_relative_eq!(back.carbon, back.agb * 0.47, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_agb_non_negative() {
        for ndvi in [-1.0, -0.3, 0.0] {
            assert_eq!(agb_from_ndvi(ndvi), 0.0);
        }
        let ndvi = BandImage::new(NDVI, BandExpr::constant(-0.4));
        assert_eq!(agb_band(&ndvi).eval(&|_: &str| None), Some(0.0));
    }

    #[test]
    fn test_reference_scenario() {
        // NDVI 0.5: AGB ~ 3.712, Carbon ~ 1.745, CO2 ~ 6.40
        let e = CarbonEstimate::from_ndvi(0.5);
        assert_relative_eq!(e.agb, 3.712, epsilon = 1e-3);
        assert_relative_eq!(e.carbon, 1.745, epsilon = 1e-3);
        assert_relative_eq!(e.co2, 6.40, epsilon = 1e-2);

        let ndvi = BandImage::new(NDVI, BandExpr::constant(0.5));
        let co2 = co2_band(&carbon_band(&agb_band(&ndvi)));
        assert_relative_eq!(co2.eval(&|_: &str| None).unwrap(), e.co2, epsilon = 1e-9);
    }

    fn indexed(catalog_nir: f64, catalog_red: f64) -> (MemoryCatalog, IndexedImage) {
        let acquired = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let catalog = MemoryCatalog::new().with_uniform_scene(
            "S2",
            "s1",
            acquired,
            1.0,
            &[("B8", catalog_nir), ("B4", catalog_red), ("B2", 0.05), ("B12", 0.2)],
            4,
        );
        let collection = ImageCollection::new(
            "S2",
            vec![SceneRef {
                id: "s1".into(),
                acquired,
                cloud_cover: Some(1.0),
            }],
        );
        (catalog, IndexCalculator::new(SpectralBands::default()).run(collection))
    }

    #[test]
    fn test_estimator_reduces_co2() {
        // NDVI = (0.3 - 0.1) / (0.3 + 0.1) = 0.5
        let (catalog, image) = indexed(0.3, 0.1);
        let aoi = AreaOfInterest::point_buffer(-75.5, -8.5, 1_000.0).unwrap();
        let result = CarbonEstimator::new(&catalog, 30.0, u64::MAX).run(&image, &aoi).unwrap();

        let expected = CarbonEstimate::from_ndvi(0.5);
        let estimate = result.estimate.unwrap();
        assert_relative_eq!(estimate.co2, expected.co2, epsilon = 1e-9);
        assert_relative_eq!(estimate.agb, expected.agb, epsilon = 1e-9);
        assert_eq!(result.co2_image.name, CO2);
        assert_eq!(result.agb_image.name, AGB);
    }

    #[test]
    fn test_pixel_limit_aborts() {
        let (catalog, image) = indexed(0.3, 0.1);
        let aoi = AreaOfInterest::point_buffer(-75.5, -8.5, 1_000.0).unwrap();
        let err = CarbonEstimator::new(&catalog, 30.0, 50).run(&image, &aoi).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceLimit { max_pixels: 50, .. }));
    }
}
