use numpy::{PyArray1, PyReadonlyArray1, PyReadwriteArray1};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::config::{EngineConfig, KernelPolicy};
use crate::engine::{shared_engine, SmaEngine};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PyErrorKind {
    Value,
    Runtime,
}

// Bad arguments are the caller's to fix; everything else is environmental.
fn error_kind(e: &Error) -> PyErrorKind {
    match e {
        Error::ShapeMismatch { .. } | Error::InvalidWindow { .. } => PyErrorKind::Value,
        Error::DeviceExecutionFault { .. } | Error::Config { .. } => PyErrorKind::Runtime,
    }
}

fn to_py_err(e: Error) -> PyErr {
    match error_kind(&e) {
        PyErrorKind::Value => PyValueError::new_err(e.to_string()),
        PyErrorKind::Runtime => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Python passes a signed int; a negative window is an `InvalidWindow`, not an
/// overflow. Shape is still reported first.
fn checked_window(input_len: usize, output_len: usize, window_size: i64) -> Result<usize, Error> {
    if input_len != output_len {
        return Err(Error::ShapeMismatch {
            input: input_len,
            output: output_len,
        });
    }
    usize::try_from(window_size).map_err(|_| Error::InvalidWindow {
        window: window_size,
        len: input_len,
        reason: "window must be at least 1",
    })
}

fn compute_into(
    py: Python<'_>,
    engine: &SmaEngine,
    input: PyReadonlyArray1<'_, f32>,
    mut output: PyReadwriteArray1<'_, f32>,
    window_size: i64,
) -> PyResult<()> {
    let window = checked_window(input.len(), output.len(), window_size).map_err(to_py_err)?;
    let input = input.as_array();
    let output = output.as_array_mut();

    // GIL released while the grid runs
    py.allow_threads(|| engine.compute_array(input, output, window))
        .map_err(to_py_err)
}

/// Launches the Simple Moving Average (SMA) computation, writing into `output`.
///
/// Uses one engine per process, configured from `CUDAFINANCE_*` variables on
/// the first call. A `window_size` longer than the series raises `ValueError`
/// unless `CUDAFINANCE_ALLOW_OVERSIZED_WINDOW=1` is set, in which case the
/// leading outputs are the expanding mean over all available samples.
#[pyfunction]
#[pyo3(name = "launchSMA")]
fn launch_sma(
    py: Python<'_>,
    input: PyReadonlyArray1<'_, f32>,
    output: PyReadwriteArray1<'_, f32>,
    window_size: i64,
) -> PyResult<()> {
    let engine = shared_engine().map_err(to_py_err)?;
    compute_into(py, engine, input, output, window_size)
}

#[pyclass(name = "SmaEngine")]
pub struct PySmaEngine {
    inner: SmaEngine,
}

#[pymethods]
impl PySmaEngine {
    #[new]
    #[pyo3(signature = (policy = KernelPolicy::Auto, threads = None, allow_oversized_window = false))]
    fn new(policy: KernelPolicy, threads: Option<usize>, allow_oversized_window: bool) -> PyResult<Self> {
        let base = EngineConfig::from_env().map_err(to_py_err)?;
        let config = EngineConfig {
            policy,
            threads: threads.or(base.threads),
            allow_oversized_window,
            ..base
        };
        let inner = SmaEngine::new(config).map_err(to_py_err)?;
        Ok(PySmaEngine { inner })
    }

    #[getter]
    fn policy(&self) -> KernelPolicy {
        self.inner.config().policy
    }

    #[getter]
    fn threads(&self) -> usize {
        self.inner.device().threads()
    }

    fn compute(
        &self,
        py: Python<'_>,
        input: PyReadonlyArray1<'_, f32>,
        output: PyReadwriteArray1<'_, f32>,
        window_size: i64,
    ) -> PyResult<()> {
        compute_into(py, &self.inner, input, output, window_size)
    }

    fn sma<'py>(
        &self,
        py: Python<'py>,
        input: PyReadonlyArray1<'py, f32>,
        window_size: i64,
    ) -> PyResult<&'py PyArray1<f32>> {
        let window = checked_window(input.len(), input.len(), window_size).map_err(to_py_err)?;
        let view = input.as_array();
        let result = py.allow_threads(|| match view.as_slice() {
            Some(s) => self.inner.sma(s, window),
            None => self.inner.sma(&view.to_vec(), window),
        });
        Ok(PyArray1::from_vec(py, result.map_err(to_py_err)?))
    }

    /// `(kernel, parallel, block_len, blocks)` for a call with this input and window.
    fn plan(&self, input: PyReadonlyArray1<'_, f32>, window_size: i64) -> PyResult<(String, bool, usize, usize)> {
        let window = checked_window(input.len(), input.len(), window_size).map_err(to_py_err)?;
        let view = input.as_array();
        let plan = match view.as_slice() {
            Some(s) => self.inner.plan(s, window),
            None => self.inner.plan(&view.to_vec(), window),
        };
        Ok((format!("{:?}", plan.kernel), plan.parallel, plan.block_len, plan.blocks))
    }

    fn __repr__(&self) -> String {
        format!(
            "SmaEngine(policy={:?}, threads={})",
            self.inner.config().policy,
            self.inner.device().threads()
        )
    }
}

pub(crate) fn register(m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(launch_sma, m)?)?;
    m.add_class::<PySmaEngine>()?;
    m.add_class::<KernelPolicy>()?;
    Ok(())
}
