//! Centered moving average
//!
//! The input is edge-padded by `window / 2` on both sides so the output has
//! the same length as the input; values near the ends lean toward the edge
//! value. A prefix sum makes the cost linear regardless of window size.

use crate::series::Series;
use crate::Result;

/// Centered rolling mean with edge padding.
///
/// `window <= 1` and empty input return the input unchanged. The window is
/// clamped to the input length.
///
/// # Example
///
/// ```rust
/// use steplog::smooth::rolling_mean;
///
/// let smoothed = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
/// assert_eq!(smoothed.len(), 5);
/// assert!((smoothed[0] - 4.0 / 3.0).abs() < 1e-12);
/// assert!((smoothed[4] - 14.0 / 3.0).abs() < 1e-12);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let n = values.len();
    let window = window.min(n);
    if window <= 1 {
        return values.to_vec();
    }
    let pad = window / 2;
    let first = values[0];
    let last = values[n - 1];

    let padded = std::iter::repeat(first)
        .take(pad)
        .chain(values.iter().copied())
        .chain(std::iter::repeat(last).take(pad));

    // prefix[i] = sum of the first i padded values
    let mut prefix = Vec::with_capacity(n + 2 * pad + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in padded {
        acc += v;
        prefix.push(acc);
    }

    let w = window as f64;
    (0..n).map(|i| (prefix[i + window] - prefix[i]) / w).collect()
}

/// Smooth a series' values, keeping its steps.
///
/// # Errors
///
/// Never fails in practice; the length check of [`Series::with_values`] is
/// the only error path.
pub fn smooth_series(series: &Series, window: usize) -> Result<Series> {
    series.with_values(rolling_mean(series.values(), window))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-2, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn test_rolling_mean_boundaries() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_close(&out, &[1.33, 2.0, 3.0, 4.0, 4.67]);
    }

    #[test]
    fn test_even_window_keeps_length() {
        let out = rolling_mean(&[1.0, 2.0, 3.0, 4.0], 2);
        // padded [1,1,2,3,4,4], windows of two starting at 0..4
        assert_close(&out, &[1.0, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_window_clamped_to_len() {
        let out = rolling_mean(&[1.0, 3.0], 10);
        // window 2, padded [1,1,3,3]
        assert_close(&out, &[1.0, 2.0]);
    }

    #[test]
    fn test_identity_cases() {
        let x = [3.0, 1.0, 2.0];
        assert_eq!(rolling_mean(&x, 0), x.to_vec());
        assert_eq!(rolling_mean(&x, 1), x.to_vec());
        assert!(rolling_mean(&[], 5).is_empty());
        assert_eq!(rolling_mean(&[7.0], 5), vec![7.0]);
    }

    #[test]
    fn test_constant_input_is_fixed_point() {
        let out = rolling_mean(&[2.5; 9], 4);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_smooth_series_keeps_steps() {
        let s = Series::from_pairs("k", [(0, 1.0), (10, 2.0), (20, 3.0)]);
        let smoothed = smooth_series(&s, 3).unwrap();
        assert_eq!(smoothed.steps(), s.steps());
        assert_eq!(smoothed.key(), "k");
    }
}
