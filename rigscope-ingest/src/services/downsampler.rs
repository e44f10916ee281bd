//! Min/max downsampling for visualization
//!
//! The first `size * (N / size)` samples are split into `size` equal-width
//! bins. Each bin contributes exactly two points, its minimum and its
//! maximum sample, in original index order, so the output stays monotonic in
//! time and keeps the true extremes of every bin. Samples past the last full
//! bin are dropped.

use crate::error::SignalError;
use rigscope_common::entities::Downsample;

/// Downsample `(x, y)` into `size` min/max bins (`2 * size` points)
pub fn min_max_downsample(x: &[f64], y: &[f64], size: usize) -> Result<Downsample, SignalError> {
    if x.len() != y.len() {
        return Err(SignalError::InvalidMetadata(format!(
            "time axis has {} points but waveform has {}",
            x.len(),
            y.len()
        )));
    }
    let n = y.len();
    if size == 0 || size > n {
        return Err(SignalError::DownsampleSize { size, samples: n });
    }

    let width = n / size;
    let mut out_x = Vec::with_capacity(2 * size);
    let mut out_y = Vec::with_capacity(2 * size);

    for bin in 0..size {
        let start = bin * width;
        let (lo, hi) = bin_extremes(&y[start..start + width]);
        let (first, second) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        for i in [start + first, start + second] {
            out_x.push(x[i]);
            out_y.push(y[i]);
        }
    }

    Ok(Downsample { x: out_x, y: out_y })
}

/// Offsets of the first minimum and first maximum within a bin
fn bin_extremes(bin: &[f64]) -> (usize, usize) {
    let mut lo = 0;
    let mut hi = 0;
    for (i, &v) in bin.iter().enumerate().skip(1) {
        if v < bin[lo] || bin[lo].is_nan() {
            lo = i;
        }
        if v > bin[hi] || bin[hi].is_nan() {
            hi = i;
        }
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn axis(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    fn extremes(y: &[f64]) -> (f64, f64) {
        y.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    #[test]
    fn test_thousand_samples_into_five_hundred_bins() {
        let y: Vec<f64> = (0..1000).map(|i| ((i * 37) % 101) as f64 - 50.0).collect();
        let x = axis(1000);

        let ds = min_max_downsample(&x, &y, 500).unwrap();

        assert_eq!(ds.x.len(), 1000);
        assert_eq!(ds.y.len(), 1000);
        assert_eq!(extremes(&ds.y), extremes(&y));
    }

    #[test]
    fn test_pairs_are_in_index_order() {
        // Bin 0 has its max before its min; bin 1 the reverse
        let y = vec![5.0, 1.0, 3.0, 0.0, 2.0, 9.0];
        let x = axis(6);

        let ds = min_max_downsample(&x, &y, 2).unwrap();

        assert_eq!(ds.x, vec![0.0, 1.0, 3.0, 5.0]);
        assert_eq!(ds.y, vec![5.0, 1.0, 0.0, 9.0]);
    }

    #[test]
    fn test_trailing_samples_are_dropped() {
        let y = vec![1.0, 2.0, 3.0, 4.0, 100.0];
        let ds = min_max_downsample(&axis(5), &y, 2).unwrap();
        assert_eq!(ds.y, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_flat_bin_emits_two_points() {
        let y = vec![1.0; 8];
        let ds = min_max_downsample(&axis(8), &y, 4).unwrap();
        assert_eq!(ds.y.len(), 8);
        assert_eq!(ds.x, vec![0.0, 0.0, 2.0, 2.0, 4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn test_size_larger_than_samples_is_error() {
        let err = min_max_downsample(&axis(10), &[0.0; 10], 11).unwrap_err();
        assert_eq!(err, SignalError::DownsampleSize { size: 11, samples: 10 });
        assert!(min_max_downsample(&axis(10), &[0.0; 10], 0).is_err());
    }

    #[test]
    fn test_length_mismatch_is_error() {
        assert!(min_max_downsample(&axis(4), &[0.0; 5], 2).is_err());
    }

    proptest! {
        #[test]
        fn prop_downsample_preserves_extremes_and_order(
            bins in 1usize..64,
            width in 2usize..16,
            seed in prop::collection::vec(-1000.0f64..1000.0, 2 * 16 * 64),
        ) {
            let n = bins * width;
            let y = &seed[..n];
            let x = axis(n);

            let ds = min_max_downsample(&x, y, bins).unwrap();

            prop_assert_eq!(ds.y.len(), 2 * bins);
            prop_assert_eq!(ds.x.len(), 2 * bins);
            prop_assert!(ds.x.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(extremes(&ds.y), extremes(y));
        }
    }
}
