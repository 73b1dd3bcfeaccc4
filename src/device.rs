//! Launch model for SMA kernels.
//!
//! A launch splits the output buffer into disjoint blocks and runs one unit
//! per block, mirroring a grid launch on a GPU. The caller blocks until the
//! whole grid has finished. A unit that faults (panics) fails the launch as a
//! whole and leaves the output contents unspecified.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::Backend;
use crate::error::{Error, Result};

/// Work for one block: `(first output index, block slice)`.
pub type Unit<'a> = dyn Fn(usize, &mut [f32]) + Sync + 'a;

#[derive(Clone)]
pub struct Device {
    backend: Backend,
    pool: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("backend", &self.backend)
            .field("threads", &self.threads())
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}

impl Default for Device {
    fn default() -> Self {
        Device {
            backend: Backend::Parallel,
            pool: None,
        }
    }
}

impl Device {
    /// `threads: Some(n)` builds a dedicated pool; `None` shares rayon's global pool.
    pub fn new(backend: Backend, threads: Option<usize>) -> Result<Self> {
        let pool = match (backend, threads) {
            (Backend::Parallel, Some(n)) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("cudafinance-sma-{i}"))
                    .build()
                    .map_err(|e| Error::DeviceExecutionFault {
                        reason: format!("failed to start {n} worker threads: {e}"),
                    })?;
                Some(Arc::new(pool))
            }
            _ => None,
        };
        Ok(Device { backend, pool })
    }

    pub fn host() -> Self {
        Device {
            backend: Backend::Host,
            pool: None,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Units that can run at once.
    pub fn threads(&self) -> usize {
        match (self.backend, &self.pool) {
            (Backend::Host, _) => 1,
            (Backend::Parallel, Some(pool)) => pool.current_num_threads(),
            (Backend::Parallel, None) => rayon::current_num_threads(),
        }
    }

    /// Runs `unit` once per `block_len` chunk of `output`.
    ///
    /// With `parallel == false` (or the host backend) blocks run in order on
    /// the calling thread. Results never depend on which path was taken.
    pub fn launch(
        &self,
        output: &mut [f32],
        block_len: usize,
        parallel: bool,
        unit: &Unit<'_>,
    ) -> Result<()> {
        if output.is_empty() {
            return Ok(());
        }
        let block_len = block_len.max(1);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if !parallel || self.backend == Backend::Host {
                output
                    .chunks_mut(block_len)
                    .enumerate()
                    .for_each(|(b, block)| unit(b * block_len, block));
                return;
            }
            let mut grid = || {
                output
                    .par_chunks_mut(block_len)
                    .enumerate()
                    .for_each(|(b, block)| unit(b * block_len, block))
            };
            match &self.pool {
                Some(pool) => pool.install(grid),
                None => grid(),
            }
        }));

        outcome.map_err(|payload| Error::DeviceExecutionFault {
            reason: panic_reason(payload.as_ref()),
        })
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "execution unit panicked".to_string()
    }
}
