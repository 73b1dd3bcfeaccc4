//! Sliding-window SMA from an exclusive prefix sum.
//!
//! Two phases with one barrier between them: `exclusive_prefix` scans the
//! whole series once, then `finalize_block` derives every output as a
//! difference of two prefix entries. Total work is O(len) regardless of the
//! window, at the cost of an extra `len + 1` buffer of `f64`.
//!
//! The prefix is only meaningful for finite input; see
//! [`select_kernel`](super::select_kernel).

use super::window_start;

/// `prefix[k]` is the sum of `input[..k]`, so `prefix.len() == input.len() + 1`.
pub fn exclusive_prefix(input: &[f32]) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(input.len() + 1);
    let mut acc = 0.0f64;
    prefix.push(acc);
    for &v in input {
        acc += v as f64;
        prefix.push(acc);
    }
    prefix
}

pub fn finalize_block(prefix: &[f64], window: usize, start: usize, out: &mut [f32]) {
    for (offset, slot) in out.iter_mut().enumerate() {
        let i = start + offset;
        let lo = window_start(i, window);
        let sum = prefix[i + 1] - prefix[lo];
        *slot = (sum / (i + 1 - lo) as f64) as f32;
    }
}
