pub mod naive;
pub mod prefix_sum;

use crate::config::KernelPolicy;

/// Kernel that actually ran for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelSelected {
    /// `window == 1`: output is a copy of input.
    Identity,
    Naive,
    PrefixSum,
}

/// First input index of the clamped trailing window ending at `i`.
#[inline]
pub fn window_start(i: usize, window: usize) -> usize {
    (i + 1).saturating_sub(window)
}

/// Number of samples actually averaged at `i`: `min(i + 1, window)`.
#[inline]
pub fn effective_window(i: usize, window: usize) -> usize {
    i + 1 - window_start(i, window)
}

pub fn identity_block(input: &[f32], start: usize, out: &mut [f32]) {
    out.copy_from_slice(&input[start..start + out.len()]);
}

/// Picks a kernel for `window` under `policy`.
///
/// `all_finite` is only consulted when the prefix-sum kernel would be chosen:
/// a single NaN or infinity poisons every later prefix difference, so such
/// input always goes to the naive kernel.
pub fn select_kernel<F>(
    policy: KernelPolicy,
    window: usize,
    prefix_sum_min_window: usize,
    all_finite: F,
) -> KernelSelected
where
    F: FnOnce() -> bool,
{
    if window == 1 {
        return KernelSelected::Identity;
    }
    let wants_prefix = match policy {
        KernelPolicy::Naive => false,
        KernelPolicy::PrefixSum => true,
        KernelPolicy::Auto => window >= prefix_sum_min_window,
    };
    if wants_prefix && all_finite() {
        KernelSelected::PrefixSum
    } else {
        KernelSelected::Naive
    }
}
