// Python bindings module
// Each file contains one or more PyO3 #[pyclass] definitions

pub mod aoi;
pub mod carbon;
pub mod classify;
pub mod report;
pub mod session;

pub use aoi::PyAreaOfInterest;
pub use carbon::PyCarbonEstimate;
pub use report::PyReportAssembler;
pub use session::PySession;
