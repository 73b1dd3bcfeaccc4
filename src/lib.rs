pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod kernel;

#[cfg(feature = "python")]
mod python;

pub use config::{Backend, DebugScope, EngineConfig, KernelPolicy};
pub use device::Device;
pub use engine::{launch_sma, shared_engine, LaunchPlan, SmaEngine};
pub use error::{Error, Result};
pub use kernel::KernelSelected;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn cuda_module(_py: Python, m: &PyModule) -> PyResult<()> {
    python::register(m)
}
