use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use ndarray::{ArrayView1, ArrayViewMut1};

use crate::config::{DebugScope, EngineConfig, KernelPolicy};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::kernel::naive::naive_block;
use crate::kernel::prefix_sum::{exclusive_prefix, finalize_block};
use crate::kernel::{identity_block, select_kernel, KernelSelected};

// Blocks handed to each worker when the block length is derived.
const BLOCKS_PER_THREAD: usize = 4;
const MIN_BLOCK_LEN: usize = 256;

/// Grid layout chosen for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    pub kernel: KernelSelected,
    pub parallel: bool,
    pub block_len: usize,
    pub blocks: usize,
    /// The policy asked for the prefix-sum kernel but the input was not all finite.
    pub non_finite_fallback: bool,
}

/// Simple Moving Average over `f32` buffers with a clamped trailing window.
///
/// `output[i]` is the mean of `input[max(0, i - window + 1)..=i]`; the first
/// `window - 1` outputs average over however many samples exist.
#[derive(Debug)]
pub struct SmaEngine {
    config: EngineConfig,
    device: Device,
    debug_logged: AtomicBool,
}

impl Default for SmaEngine {
    fn default() -> Self {
        SmaEngine::with_device(EngineConfig::default(), Device::default())
    }
}

impl SmaEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let device = Device::new(config.backend, config.threads)?;
        Ok(SmaEngine::with_device(config, device))
    }

    /// Uses `device` as is; `config.backend` and `config.threads` are ignored.
    pub fn with_device(config: EngineConfig, device: Device) -> Self {
        SmaEngine {
            config,
            device,
            debug_logged: AtomicBool::new(false),
        }
    }

    pub fn from_env() -> Result<Self> {
        SmaEngine::new(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Host-side checks, run before anything is dispatched.
    pub fn validate(&self, input_len: usize, output_len: usize, window: usize) -> Result<()> {
        if input_len != output_len {
            return Err(Error::ShapeMismatch {
                input: input_len,
                output: output_len,
            });
        }
        if window == 0 {
            return Err(Error::InvalidWindow {
                window: 0,
                len: input_len,
                reason: "window must be at least 1",
            });
        }
        if input_len > 0 && window > input_len && !self.config.allow_oversized_window {
            return Err(Error::InvalidWindow {
                window: i64::try_from(window).unwrap_or(i64::MAX),
                len: input_len,
                reason: "window exceeds series length",
            });
        }
        Ok(())
    }

    /// Kernel and grid layout `compute` would use for this call.
    pub fn plan(&self, input: &[f32], window: usize) -> LaunchPlan {
        let len = input.len();
        let kernel = select_kernel(
            self.config.policy,
            window,
            self.config.prefix_sum_min_window,
            || input.iter().all(|v| v.is_finite()),
        );
        let parallel = self.device.threads() > 1 && len >= self.config.parallel_min_len;
        let block_len = if !parallel {
            len.max(1)
        } else if self.config.block_len > 0 {
            self.config.block_len
        } else {
            let blocks = self.device.threads() * BLOCKS_PER_THREAD;
            len.div_ceil(blocks).max(MIN_BLOCK_LEN)
        };
        let wanted_prefix = window > 1
            && match self.config.policy {
                KernelPolicy::PrefixSum => true,
                KernelPolicy::Auto => window >= self.config.prefix_sum_min_window,
                KernelPolicy::Naive => false,
            };
        LaunchPlan {
            kernel,
            parallel,
            block_len,
            blocks: len.div_ceil(block_len),
            non_finite_fallback: wanted_prefix && kernel == KernelSelected::Naive,
        }
    }

    /// Writes the SMA of `input` into `output` in place.
    ///
    /// On `ShapeMismatch` or `InvalidWindow` nothing is written. On
    /// `DeviceExecutionFault` the contents of `output` are unspecified.
    pub fn compute(&self, input: &[f32], output: &mut [f32], window: usize) -> Result<()> {
        self.validate(input.len(), output.len(), window)?;
        if input.is_empty() {
            return Ok(());
        }

        let plan = self.plan(input, window);
        self.maybe_log_debug(&plan, window);

        match plan.kernel {
            KernelSelected::Identity => {
                let unit = |start: usize, block: &mut [f32]| identity_block(input, start, block);
                self.device.launch(output, plan.block_len, plan.parallel, &unit)
            }
            KernelSelected::Naive => {
                let unit = |start: usize, block: &mut [f32]| naive_block(input, window, start, block);
                self.device.launch(output, plan.block_len, plan.parallel, &unit)
            }
            KernelSelected::PrefixSum => {
                // scan phase completes before any finalize unit starts
                let prefix = exclusive_prefix(input);
                let unit =
                    |start: usize, block: &mut [f32]| finalize_block(&prefix, window, start, block);
                self.device.launch(output, plan.block_len, plan.parallel, &unit)
            }
        }
    }

    /// Allocating variant of [`compute`](Self::compute).
    pub fn sma(&self, input: &[f32], window: usize) -> Result<Vec<f32>> {
        let mut output = vec![0.0f32; input.len()];
        self.compute(input, &mut output, window)?;
        Ok(output)
    }

    /// `ndarray` variant. Non-contiguous views go through a contiguous copy.
    pub fn compute_array(
        &self,
        input: ArrayView1<'_, f32>,
        mut output: ArrayViewMut1<'_, f32>,
        window: usize,
    ) -> Result<()> {
        self.validate(input.len(), output.len(), window)?;

        let owned_input;
        let input_slice = match input.as_slice() {
            Some(s) => s,
            None => {
                owned_input = input.iter().copied().collect::<Vec<f32>>();
                &owned_input[..]
            }
        };

        match output.as_slice_mut() {
            Some(out) => self.compute(input_slice, out, window),
            None => {
                let mut scratch = vec![0.0f32; input_slice.len()];
                self.compute(input_slice, &mut scratch, window)?;
                for (dst, src) in output.iter_mut().zip(scratch) {
                    *dst = src;
                }
                Ok(())
            }
        }
    }

    /// Returns whether a line was written.
    fn maybe_log_debug(&self, plan: &LaunchPlan, window: usize) -> bool {
        if !self.config.debug {
            return false;
        }
        let per_call = self.config.debug_scope == DebugScope::Call;
        if per_call || !self.debug_logged.swap(true, Ordering::Relaxed) {
            eprintln!("{}", self.debug_line(plan, window));
            return true;
        }
        false
    }

    fn debug_line(&self, plan: &LaunchPlan, window: usize) -> String {
        let mut line = format!(
            "[DEBUG] SMA selected kernel: {:?} (window={}, policy={:?}, parallel={}, block_len={}, blocks={}",
            plan.kernel, window, self.config.policy, plan.parallel, plan.block_len, plan.blocks
        );
        if plan.non_finite_fallback {
            line.push_str(", fallback=non_finite");
        }
        line.push(')');
        line
    }
}

/// One-shot SMA with the default engine.
pub fn launch_sma(input: &[f32], output: &mut [f32], window: usize) -> Result<()> {
    SmaEngine::default().compute(input, output, window)
}

static SHARED_ENGINE: OnceLock<Result<SmaEngine>> = OnceLock::new();

/// Process-wide engine configured from `CUDAFINANCE_*` variables.
///
/// The environment is read and the device built on first use only; a
/// configuration error is reported then and on every later call.
pub fn shared_engine() -> Result<&'static SmaEngine> {
    SHARED_ENGINE
        .get_or_init(SmaEngine::from_env)
        .as_ref()
        .map_err(Clone::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, KernelPolicy};
    use ndarray::{s, Array1};

    fn engine_with(policy: KernelPolicy) -> SmaEngine {
        SmaEngine::new(EngineConfig {
            policy,
            parallel_min_len: 0,
            block_len: 3,
            threads: Some(2),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_basic_all_policies() {
        let input = [1.0, 2.0, 3.0, 4.0, 5.0];
        for policy in [KernelPolicy::Auto, KernelPolicy::Naive, KernelPolicy::PrefixSum] {
            let engine = engine_with(policy);
            let out = engine.sma(&input, 3).unwrap();
            assert_eq!(out, vec![1.0, 1.5, 2.0, 3.0, 4.0], "{policy:?}");
        }
    }

    #[test]
    fn test_validation_order() {
        let engine = SmaEngine::default();
        // shape is checked before the window
        assert_eq!(
            engine.validate(5, 4, 0),
            Err(Error::ShapeMismatch { input: 5, output: 4 })
        );
        assert!(matches!(
            engine.validate(5, 5, 0),
            Err(Error::InvalidWindow { window: 0, .. })
        ));
        assert!(matches!(
            engine.validate(5, 5, 6),
            Err(Error::InvalidWindow { window: 6, len: 5, .. })
        ));
        assert_eq!(engine.validate(5, 5, 5), Ok(()));
        assert_eq!(engine.validate(0, 0, 3), Ok(()));
    }

    #[test]
    fn test_failed_validation_leaves_output_untouched() {
        let engine = SmaEngine::default();
        let mut out = [7.0f32; 4];
        let err = engine.compute(&[1.0, 2.0, 3.0, 4.0, 5.0], &mut out, 3).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(out, [7.0; 4]);

        let mut out = [7.0f32; 5];
        assert!(engine.compute(&[1.0, 2.0, 3.0, 4.0, 5.0], &mut out, 0).is_err());
        assert_eq!(out, [7.0; 5]);
    }

    #[test]
    fn test_plan_selection() {
        let engine = SmaEngine::new(EngineConfig {
            parallel_min_len: 100,
            threads: Some(4),
            ..EngineConfig::default()
        })
        .unwrap();

        let small = vec![1.0f32; 50];
        let plan = engine.plan(&small, 5);
        assert_eq!(plan.kernel, KernelSelected::Naive);
        assert!(!plan.parallel);
        assert_eq!(plan.blocks, 1);

        let large = vec![1.0f32; 100_000];
        let plan = engine.plan(&large, 200);
        assert_eq!(plan.kernel, KernelSelected::PrefixSum);
        assert!(plan.parallel);
        assert_eq!(plan.block_len, 100_000usize.div_ceil(16));
        assert_eq!(plan.blocks, 16);

        assert_eq!(engine.plan(&large, 1).kernel, KernelSelected::Identity);

        let mut poisoned = large.clone();
        poisoned[10] = f32::INFINITY;
        assert_eq!(engine.plan(&poisoned, 200).kernel, KernelSelected::Naive);
    }

    #[test]
    fn test_host_backend_never_parallel() {
        let engine = SmaEngine::new(EngineConfig {
            backend: Backend::Host,
            parallel_min_len: 0,
            ..EngineConfig::default()
        })
        .unwrap();
        let plan = engine.plan(&[1.0; 10_000], 4);
        assert!(!plan.parallel);
        assert_eq!(plan.block_len, 10_000);
    }

    #[test]
    fn test_window_one_is_exact_copy() {
        let input = [0.1f32, -3.7, 1e-7, 12345.678];
        let out = engine_with(KernelPolicy::PrefixSum).sma(&input, 1).unwrap();
        assert_eq!(out, input.to_vec());
    }

    #[test]
    fn test_oversized_window_when_allowed() {
        let engine = SmaEngine::new(EngineConfig {
            allow_oversized_window: true,
            ..EngineConfig::default()
        })
        .unwrap();
        let out = engine.sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 10).unwrap();
        assert_eq!(out, vec![1.0, 1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn test_compute_array_strided_views() {
        let engine = engine_with(KernelPolicy::Auto);
        let backing = Array1::from_vec(vec![1.0f32, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0, 0.0, 5.0, 0.0]);
        let input = backing.slice(s![..;2]);

        let mut out_backing = Array1::<f32>::zeros(10);
        engine
            .compute_array(input, out_backing.slice_mut(s![1..;2]), 3)
            .unwrap();
        assert_eq!(
            out_backing.to_vec(),
            vec![0.0, 1.0, 0.0, 1.5, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0]
        );
    }

    fn debug_engine(scope: DebugScope, policy: KernelPolicy) -> SmaEngine {
        SmaEngine::new(EngineConfig {
            policy,
            debug: true,
            debug_scope: scope,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_debug_once_logs_first_call_only() {
        let engine = debug_engine(DebugScope::Once, KernelPolicy::Auto);
        let input = [1.0f32; 8];
        let plan = engine.plan(&input, 3);
        assert!(engine.maybe_log_debug(&plan, 3));
        assert!(!engine.maybe_log_debug(&plan, 3));
        assert!(!engine.maybe_log_debug(&plan, 3));
    }

    #[test]
    fn test_debug_call_logs_every_call() {
        let engine = debug_engine(DebugScope::Call, KernelPolicy::Auto);
        let input = [1.0f32; 8];
        let plan = engine.plan(&input, 3);
        assert!(engine.maybe_log_debug(&plan, 3));
        assert!(engine.maybe_log_debug(&plan, 3));
    }

    #[test]
    fn test_debug_disabled_never_logs() {
        let engine = SmaEngine::default();
        let plan = engine.plan(&[1.0; 4], 2);
        assert!(!engine.maybe_log_debug(&plan, 2));
    }

    #[test]
    fn test_non_finite_fallback_flagged_in_plan_and_log() {
        let engine = debug_engine(DebugScope::Call, KernelPolicy::PrefixSum);
        let mut input = vec![1.0f32; 64];
        input[7] = f32::NAN;

        let plan = engine.plan(&input, 8);
        assert_eq!(plan.kernel, KernelSelected::Naive);
        assert!(plan.non_finite_fallback);
        assert!(engine.debug_line(&plan, 8).ends_with(", fallback=non_finite)"));

        let clean = engine.plan(&[1.0f32; 64], 8);
        assert!(!clean.non_finite_fallback);
        assert!(!engine.debug_line(&clean, 8).contains("fallback"));

        // naive by request is not a fallback
        let naive = debug_engine(DebugScope::Call, KernelPolicy::Naive);
        assert!(!naive.plan(&input, 8).non_finite_fallback);
        // neither is the identity kernel
        assert!(!engine.plan(&input, 1).non_finite_fallback);
    }

    #[test]
    fn test_shared_engine_is_built_once() {
        match (shared_engine(), shared_engine()) {
            (Ok(a), Ok(b)) => assert!(std::ptr::eq(a, b)),
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("shared engine changed between calls"),
        }
    }

    #[test]
    fn test_launch_sma_free_function() {
        let mut out = [0.0f32; 5];
        launch_sma(&[2.0; 5], &mut out, 3).unwrap();
        assert_eq!(out, [2.0; 5]);
    }
}
