//! Band expressions.
//!
//! A derived band is an arithmetic tree over the bands of a source image. The
//! tree is shipped to the imagery catalog, which evaluates it server-side; the
//! local [`BandExpr::eval`] evaluates a single pixel and backs the offline
//! catalog and the formula tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::{Add, Div, Mul, Sub};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BandExpr {
    /// A band of the source image
    Band(String),
    Constant(f64),
    Add(Box<BandExpr>, Box<BandExpr>),
    Sub(Box<BandExpr>, Box<BandExpr>),
    Mul(Box<BandExpr>, Box<BandExpr>),
    Div(Box<BandExpr>, Box<BandExpr>),
    Pow(Box<BandExpr>, f64),
    Min(Box<BandExpr>, Box<BandExpr>),
    Max(Box<BandExpr>, Box<BandExpr>),
    /// 1 where the operands differ, 0 elsewhere
    NotEqual(Box<BandExpr>, Box<BandExpr>),
}

impl BandExpr {
    pub fn band(name: impl Into<String>) -> Self {
        BandExpr::Band(name.into())
    }

    pub fn constant(value: f64) -> Self {
        BandExpr::Constant(value)
    }

    pub fn pow(self, exponent: f64) -> Self {
        BandExpr::Pow(Box::new(self), exponent)
    }

    pub fn min(self, other: impl Into<BandExpr>) -> Self {
        BandExpr::Min(Box::new(self), Box::new(other.into()))
    }

    pub fn max(self, other: impl Into<BandExpr>) -> Self {
        BandExpr::Max(Box::new(self), Box::new(other.into()))
    }

    pub fn not_equal(self, other: impl Into<BandExpr>) -> Self {
        BandExpr::NotEqual(Box::new(self), Box::new(other.into()))
    }

    /// (a - b) / (a + b)
    pub fn normalized_difference(a: &str, b: &str) -> Self {
        (BandExpr::band(a) - BandExpr::band(b)) / (BandExpr::band(a) + BandExpr::band(b))
    }

    /// Evaluate one pixel. `None` when an input band has no data, on division
    /// by zero, or when the result is not finite (masked pixel).
    pub fn eval<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let value = match self {
            BandExpr::Band(name) => lookup(name)?,
            BandExpr::Constant(v) => *v,
            BandExpr::Add(a, b) => a.eval(lookup)? + b.eval(lookup)?,
            BandExpr::Sub(a, b) => a.eval(lookup)? - b.eval(lookup)?,
            BandExpr::Mul(a, b) => a.eval(lookup)? * b.eval(lookup)?,
            BandExpr::Div(a, b) => {
                let num = a.eval(lookup)?;
                let den = b.eval(lookup)?;
                if den == 0.0 {
                    return None;
                }
                num / den
            }
            BandExpr::Pow(a, exponent) => a.eval(lookup)?.powf(*exponent),
            BandExpr::Min(a, b) => a.eval(lookup)?.min(b.eval(lookup)?),
            BandExpr::Max(a, b) => a.eval(lookup)?.max(b.eval(lookup)?),
            BandExpr::NotEqual(a, b) => {
                if a.eval(lookup)? != b.eval(lookup)? {
                    1.0
                } else {
                    0.0
                }
            }
        };
        Some(value).filter(|v| v.is_finite())
    }

    /// Names of the source bands the expression reads
    pub fn source_bands(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_bands(&mut out);
        out
    }

    fn collect_bands(&self, out: &mut BTreeSet<String>) {
        match self {
            BandExpr::Band(name) => {
                out.insert(name.clone());
            }
            BandExpr::Constant(_) => {}
            BandExpr::Pow(a, _) => a.collect_bands(out),
            BandExpr::Add(a, b)
            | BandExpr::Sub(a, b)
            | BandExpr::Mul(a, b)
            | BandExpr::Div(a, b)
            | BandExpr::Min(a, b)
            | BandExpr::Max(a, b)
            | BandExpr::NotEqual(a, b) => {
                a.collect_bands(out);
                b.collect_bands(out);
            }
        }
    }
}

impl From<f64> for BandExpr {
    fn from(value: f64) -> Self {
        BandExpr::Constant(value)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<BandExpr>> $trait<R> for BandExpr {
            type Output = BandExpr;

            fn $method(self, rhs: R) -> BandExpr {
                BandExpr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }

        impl $trait<BandExpr> for f64 {
            type Output = BandExpr;

            fn $method(self, rhs: BandExpr) -> BandExpr {
                BandExpr::$variant(Box::new(BandExpr::Constant(self)), Box::new(rhs))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Sub);
binary_op!(Mul, mul, Mul);
binary_op!(Div, div, Div);

/// A named derived raster layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandImage {
    pub name: String,
    pub expr: BandExpr,
}

impl BandImage {
    pub fn new(name: impl Into<String>, expr: BandExpr) -> Self {
        BandImage {
            name: name.into(),
            expr,
        }
    }

    pub fn eval<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        self.expr.eval(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pixel(name: &str) -> Option<f64> {
        match name {
            "a" => Some(0.5),
            "b" => Some(0.25),
            "zero" => Some(0.0),
            _ => None,
        }
    }

    #[test]
    fn test_operators_build_trees() {
        let expr = 2.0 * (BandExpr::band("a") + 1.0);
        assert_relative_eq!(expr.eval(&pixel).unwrap(), 3.0);
    }

    #[test]
    fn test_normalized_difference() {
        let nd = BandExpr::normalized_difference("a", "b");
        assert_relative_eq!(nd.eval(&pixel).unwrap(), 0.25 / 0.75);
    }

    #[test]
    fn test_missing_band_and_division_by_zero_mask_the_pixel() {
        assert_eq!(BandExpr::band("missing").eval(&pixel), None);
        let div = BandExpr::band("a") / BandExpr::band("zero");
        assert_eq!(div.eval(&pixel), None);
    }

    #[test]
    fn test_negative_base_fractional_power_is_masked() {
        let expr = BandExpr::constant(-0.5).pow(1.5);
        assert_eq!(expr.eval(&pixel), None);
    }

    #[test]
    fn test_min_max_not_equal() {
        assert_eq!(BandExpr::band("a").min(0.3).eval(&pixel), Some(0.3));
        assert_eq!(BandExpr::band("b").max(0.3).eval(&pixel), Some(0.3));
        assert_eq!(BandExpr::band("a").not_equal(BandExpr::band("b")).eval(&pixel), Some(1.0));
        assert_eq!(BandExpr::band("a").not_equal(0.5).eval(&pixel), Some(0.0));
    }

    #[test]
    fn test_source_bands() {
        let expr = BandExpr::normalized_difference("B8", "B4").min(BandExpr::band("B2"));
        let bands: Vec<String> = expr.source_bands().into_iter().collect();
        assert_eq!(bands, vec!["B2", "B4", "B8"]);
    }
}
