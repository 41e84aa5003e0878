use afolu::analysis::carbon::CarbonEstimate;
use pyo3::prelude::*;

/// IPCC Tier 1 carbon figures. AGB in Mg/ha, Carbon in tC/ha, CO2 in tCO2/ha/yr.
#[pyclass]
#[derive(Clone)]
pub struct PyCarbonEstimate {
    pub(crate) inner: CarbonEstimate,
}

#[pymethods]
impl PyCarbonEstimate {
    #[staticmethod]
    fn from_ndvi(ndvi: f64) -> Self {
        PyCarbonEstimate {
            inner: CarbonEstimate::from_ndvi(ndvi),
        }
    }

    #[staticmethod]
    fn from_agb(agb: f64) -> Self {
        PyCarbonEstimate {
            inner: CarbonEstimate::from_agb(agb),
        }
    }

    #[staticmethod]
    fn from_co2(co2: f64) -> Self {
        PyCarbonEstimate {
            inner: CarbonEstimate::from_co2(co2),
        }
    }

    #[getter]
    fn agb(&self) -> f64 {
        self.inner.agb
    }

    #[getter]
    fn carbon(&self) -> f64 {
        self.inner.carbon
    }

    #[getter]
    fn co2(&self) -> f64 {
        self.inner.co2
    }

    fn __repr__(&self) -> String {
        format!(
            "CarbonEstimate(agb={:.2}, carbon={:.2}, co2={:.2})",
            self.inner.agb, self.inner.carbon, self.inner.co2
        )
    }
}
