use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::band::{BandExpr, BandImage};
use crate::collect::catalog::{ImageCollection, ImageSource, SpectralBands};

pub const NDVI: &str = "NDVI";
pub const EVI: &str = "EVI";
pub const LAI: &str = "LAI";
pub const NBR: &str = "NBR";

/// LAI = EVI x 4, capped at the IPCC Tier 1 ceiling
pub const LAI_PER_EVI: f64 = 4.0;
pub const LAI_CEILING: f64 = 8.0;

/// Composite of per-scene index bands. `bands` select the composited
/// indices by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedImage {
    pub source: ImageSource,
    pub bands: Vec<BandImage>,
}

impl IndexedImage {
    pub fn band(&self, name: &str) -> Option<&BandImage> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Index Calculator
/// Derives NDVI, EVI, LAI and NBR from the mission's NIR/Red/Blue/SWIR bands
#[derive(Debug, Clone)]
pub struct IndexCalculator {
    bands: SpectralBands,
}

impl IndexCalculator {
    pub fn new(bands: SpectralBands) -> Self {
        IndexCalculator { bands }
    }

    /// (NIR - RED) / (NIR + RED)
    pub fn ndvi(&self) -> BandImage {
        BandImage::new(NDVI, BandExpr::normalized_difference(&self.bands.nir, &self.bands.red))
    }

    /// 2.5 x (NIR - RED) / (NIR + 6 RED - 7.5 BLUE + 1)
    pub fn evi(&self) -> BandImage {
        BandImage::new(EVI, self.evi_expr())
    }

    /// min(EVI x 4, 8)
    pub fn lai(&self) -> BandImage {
        BandImage::new(LAI, (self.evi_expr() * LAI_PER_EVI).min(LAI_CEILING))
    }

    /// (NIR - SWIR) / (NIR + SWIR)
    pub fn nbr(&self) -> BandImage {
        BandImage::new(NBR, BandExpr::normalized_difference(&self.bands.nir, &self.bands.swir))
    }

    fn evi_expr(&self) -> BandExpr {
        let nir = || BandExpr::band(&self.bands.nir);
        let red = || BandExpr::band(&self.bands.red);
        let blue = BandExpr::band(&self.bands.blue);
        2.5 * (nir() - red()) / (nir() + 6.0 * red() - 7.5 * blue + 1.0)
    }

    /// Compute the four indices on every scene of `collection` and take the
    /// per-pixel median of each. Never fails: image access errors surface
    /// when the catalog evaluates the bands.
    pub fn run(&self, collection: ImageCollection) -> IndexedImage {
        let indices = vec![self.ndvi(), self.evi(), self.lai(), self.nbr()];
        let bands = indices
            .iter()
            .map(|b| BandImage::new(b.name.clone(), BandExpr::band(b.name.clone())))
            .collect();
        debug!("Derived index bands {:?}", indices.iter().map(|b| &b.name).collect::<Vec<_>>());
        IndexedImage {
            source: ImageSource::MedianComposite {
                collection,
                bands: indices,
            },
            bands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pixel(nir: f64, red: f64, blue: f64, swir: f64) -> impl Fn(&str) -> Option<f64> {
        move |name: &str| match name {
            "B8" => Some(nir),
            "B4" => Some(red),
            "B2" => Some(blue),
            "B12" => Some(swir),
            _ => None,
        }
    }

    fn calculator() -> IndexCalculator {
        IndexCalculator::new(SpectralBands::default())
    }

    #[test]
    fn test_ndvi_and_nbr() {
        let p = pixel(0.4, 0.1, 0.05, 0.2);
        let calc = calculator();
        assert_relative_eq!(calc.ndvi().eval(&p).unwrap(), 0.3 / 0.5, epsilon = 1e-12);
        assert_relative_eq!(calc.nbr().eval(&p).unwrap(), 0.2 / 0.6, epsilon = 1e-12);
    }

    #[test]
    fn test_evi_closed_form() {
        let p = pixel(0.4, 0.1, 0.05, 0.2);
        let expected = 2.5 * 0.3 / (0.4 + 0.6 - 0.375 + 1.0);
        assert_relative_eq!(calculator().evi().eval(&p).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_lai_is_capped() {
        // NIR + 6 RED - 7.5 BLUE + 1 shrinks toward zero, EVI explodes
        let p = pixel(0.5, 0.05, 0.2, 0.1);
        let lai = calculator().lai().eval(&p).unwrap();
        assert_relative_eq!(lai, LAI_CEILING);

        let p = pixel(0.3, 0.1, 0.05, 0.1);
        let evi = calculator().evi().eval(&p).unwrap();
        assert_relative_eq!(calculator().lai().eval(&p).unwrap(), evi * 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_custom_band_ids() {
        let calc = IndexCalculator::new(SpectralBands {
            nir: "SR_B5".into(),
            red: "SR_B4".into(),
            blue: "SR_B2".into(),
            swir: "SR_B7".into(),
        });
        let names: Vec<String> = calc.ndvi().expr.source_bands().into_iter().collect();
        assert_eq!(names, vec!["SR_B4", "SR_B5"]);
    }

    #[test]
    fn test_run_composites_per_scene_indices() {
        let image = calculator().run(ImageCollection::new("S2", vec![]));
        assert_eq!(image.band_names(), vec![NDVI, EVI, LAI, NBR]);
        assert_eq!(image.band(LAI).unwrap().expr, BandExpr::band(LAI));
        assert!(image.band("AGB").is_none());

        match &image.source {
            ImageSource::MedianComposite { bands, .. } => {
                assert_eq!(bands[0], calculator().ndvi());
                assert_eq!(bands.len(), 4);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }
}
