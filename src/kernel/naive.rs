use super::window_start;

/// Per-index reduction: each output sums its own window.
///
/// Writes `out[k] = mean(input[lo..=start + k])` with the clamped window.
/// Work is O(len * window); accumulation is in `f64`.
pub fn naive_block(input: &[f32], window: usize, start: usize, out: &mut [f32]) {
    for (offset, slot) in out.iter_mut().enumerate() {
        let i = start + offset;
        let lo = window_start(i, window);
        let sum: f64 = input[lo..=i].iter().map(|&v| v as f64).sum();
        *slot = (sum / (i + 1 - lo) as f64) as f32;
    }
}
