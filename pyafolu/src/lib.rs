use pyo3::prelude::*;

mod bindings;

use bindings::{PyAreaOfInterest, PyCarbonEstimate, PyReportAssembler, PySession};

/// Python bindings for afolu
/// AFOLU carbon potential analysis from satellite imagery

#[pymodule]
fn pyafolu(m: &Bound<'_, PyModule>) -> PyResult<()> {
    register_classify_module(m)?;

    m.add_class::<PyAreaOfInterest>()?;
    m.add_class::<PyCarbonEstimate>()?;
    m.add_class::<PyReportAssembler>()?;
    m.add_class::<PySession>()?;
    // Aliases for a Pythonic API
    m.setattr("AreaOfInterest", m.getattr("PyAreaOfInterest")?)?;
    m.setattr("CarbonEstimate", m.getattr("PyCarbonEstimate")?)?;
    m.setattr("ReportAssembler", m.getattr("PyReportAssembler")?)?;
    m.setattr("Session", m.getattr("PySession")?)?;

    m.add("__doc__", "Python bindings for afolu - AFOLU carbon potential analysis")?;

    Ok(())
}

fn register_classify_module(py_module: &Bound<'_, PyModule>) -> PyResult<()> {
    let py = py_module.py();
    let submodule = PyModule::new(py, "classify")?;
    submodule.add("__doc__", "Interpretation rules used in reports.")?;

    submodule.add_function(wrap_pyfunction!(bindings::classify::classify_ndvi, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(bindings::classify::forest_cover_percent, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(bindings::classify::evi_ndvi_consistency, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(bindings::classify::lai_assessment, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(bindings::classify::additionality, &submodule)?)?;
    submodule.add_function(wrap_pyfunction!(bindings::classify::certification_potential, &submodule)?)?;

    py_module.add_submodule(&submodule)?;

    Ok(())
}
