//! Fixed-threshold classifications used by the report.
//! All comparisons are strict, so a value on a threshold falls in the lower class.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NdviClass {
    DenseForest,
    ModerateForest,
    SparseVegetation,
    LittleOrNoVegetation,
}

impl fmt::Display for NdviClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NdviClass::DenseForest => "Dense Forest",
            NdviClass::ModerateForest => "Moderate Forest",
            NdviClass::SparseVegetation => "Sparse Vegetation",
            NdviClass::LittleOrNoVegetation => "Little/No Vegetation",
        })
    }
}

pub fn classify_ndvi(ndvi: f64) -> NdviClass {
    if ndvi > 0.6 {
        NdviClass::DenseForest
    } else if ndvi > 0.4 {
        NdviClass::ModerateForest
    } else if ndvi > 0.2 {
        NdviClass::SparseVegetation
    } else {
        NdviClass::LittleOrNoVegetation
    }
}

/// Forest cover in percent, clamp((NDVI - 0.2) x 200, 0, 100)
pub fn forest_cover_percent(ndvi: f64) -> f64 {
    ((ndvi - 0.2) * 200.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    Consistent,
    ReviewCorrelation,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Consistency::Consistent => "consistent",
            Consistency::ReviewCorrelation => "review correlation",
        })
    }
}

pub fn evi_ndvi_consistency(evi: f64, ndvi: f64) -> Consistency {
    if (evi - ndvi).abs() < 0.2 {
        Consistency::Consistent
    } else {
        Consistency::ReviewCorrelation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaiAssessment {
    OptimalForForest,
    OutsideTypicalRange,
}

impl fmt::Display for LaiAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LaiAssessment::OptimalForForest => "optimal for forest",
            LaiAssessment::OutsideTypicalRange => "outside typical range",
        })
    }
}

pub fn lai_assessment(lai: f64) -> LaiAssessment {
    if (4.0..=8.0).contains(&lai) {
        LaiAssessment::OptimalForForest
    } else {
        LaiAssessment::OutsideTypicalRange
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Additionality {
    Potential,
    NeedsReview,
}

impl fmt::Display for Additionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Additionality::Potential => "potential, needs business-as-usual analysis",
            Additionality::NeedsReview => "needs review",
        })
    }
}

pub fn additionality(ndvi: f64) -> Additionality {
    if ndvi > 0.5 {
        Additionality::Potential
    } else {
        Additionality::NeedsReview
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertificationPotential {
    High,
    Moderate,
    NeedsManagement,
}

impl fmt::Display for CertificationPotential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CertificationPotential::High => "high potential",
            CertificationPotential::Moderate => "moderate potential",
            CertificationPotential::NeedsManagement => "needs management interventions",
        })
    }
}

/// On CO2 in tCO2/ha/yr
pub fn certification_potential(co2: f64) -> CertificationPotential {
    if co2 > 5.0 {
        CertificationPotential::High
    } else if co2 > 2.0 {
        CertificationPotential::Moderate
    } else {
        CertificationPotential::NeedsManagement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ndvi_boundaries_fall_in_lower_class() {
        assert_eq!(classify_ndvi(0.61), NdviClass::DenseForest);
        assert_eq!(classify_ndvi(0.6), NdviClass::ModerateForest);
        assert_eq!(classify_ndvi(0.4), NdviClass::SparseVegetation);
        assert_eq!(classify_ndvi(0.2), NdviClass::LittleOrNoVegetation);
        assert_eq!(classify_ndvi(-1.0), NdviClass::LittleOrNoVegetation);
        assert_eq!(classify_ndvi(1.0), NdviClass::DenseForest);
    }

    #[test]
    fn test_ndvi_sweep_has_one_class_each() {
        let mut previous = NdviClass::LittleOrNoVegetation;
        let order = |c: NdviClass| match c {
            NdviClass::LittleOrNoVegetation => 0,
            NdviClass::SparseVegetation => 1,
            NdviClass::ModerateForest => 2,
            NdviClass::DenseForest => 3,
        };
        for i in 0..=2000 {
            let ndvi = -1.0 + i as f64 / 1000.0;
            let class = classify_ndvi(ndvi);
            assert!(order(class) >= order(previous), "non-monotonic at {}", ndvi);
            previous = class;
        }
    }

    #[test]
    fn test_forest_cover_is_clamped() {
        assert_eq!(forest_cover_percent(-1.0), 0.0);
        assert_eq!(forest_cover_percent(1.0), 100.0);
        assert_relative_eq!(forest_cover_percent(0.65), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dense_forest_scenario() {
        assert_eq!(classify_ndvi(0.65).to_string(), "Dense Forest");
        assert_eq!(evi_ndvi_consistency(0.60, 0.65), Consistency::Consistent);
        assert_eq!(lai_assessment(4.2), LaiAssessment::OptimalForForest);
        assert_eq!(additionality(0.65), Additionality::Potential);
    }

    #[test]
    fn test_consistency_and_lai_limits() {
        assert_eq!(evi_ndvi_consistency(0.2, 0.7), Consistency::ReviewCorrelation);
        assert_eq!(lai_assessment(4.0), LaiAssessment::OptimalForForest);
        assert_eq!(lai_assessment(8.0), LaiAssessment::OptimalForForest);
        assert_eq!(lai_assessment(3.99), LaiAssessment::OutsideTypicalRange);
        assert_eq!(lai_assessment(8.01).to_string(), "outside typical range");
    }

    #[test]
    fn test_certification_potential() {
        assert_eq!(certification_potential(6.40), CertificationPotential::High);
        assert_eq!(certification_potential(5.0), CertificationPotential::Moderate);
        assert_eq!(certification_potential(2.0), CertificationPotential::NeedsManagement);
        assert_eq!(additionality(0.5).to_string(), "needs review");
    }
}
