//! Time-axis reconstruction and steady-state detection
//!
//! Steady state is judged from the waveform values alone: a high percentile
//! of the whole capture stands in for the rail's settled value, and the
//! window starts where the signal first crosses a fraction of it.

use crate::error::SignalError;

/// Statistics of the steady-state window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteadyStateStats {
    /// Index in the full waveform where the window starts
    pub window_start: usize,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub pk2pk: f64,
}

/// Evenly spaced timestamps from `0` to `n * x_increment`, both inclusive
///
/// Linspace semantics: the spacing is `n * x_increment / (n - 1)`, and the
/// last timestamp is exactly the stop value.
pub fn time_axis(x_increment: f64, n: usize) -> Result<Vec<f64>, SignalError> {
    if !x_increment.is_finite() || x_increment <= 0.0 {
        return Err(SignalError::InvalidMetadata(format!(
            "x_increment must be a positive number, got {}",
            x_increment
        )));
    }

    let stop = n as f64 * x_increment;
    match n {
        0 => Ok(Vec::new()),
        1 => Ok(vec![0.0]),
        _ => {
            let step = stop / (n - 1) as f64;
            let mut axis: Vec<f64> = (0..n).map(|i| i as f64 * step).collect();
            axis[n - 1] = stop;
            Ok(axis)
        }
    }
}

/// First index with `y[i] >= target`
///
/// Returns 0 when no sample reaches the target, which is indistinguishable
/// from a waveform already settled at sample 0. Callers that need to tell
/// the two apart must check `y[0] >= target` themselves.
pub fn steady_state_index(y: &[f64], target: f64) -> usize {
    y.iter().position(|&v| v >= target).unwrap_or(0)
}

/// Value at `percentile` (0..=100) using linear interpolation between ranks
pub fn percentile(y: &[f64], percentile: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = y.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let rank = (percentile.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sub-slice from the first sample crossing `percentile(y) * accuracy` onward
pub fn steady_state_window(y: &[f64], pct: f64, accuracy: f64) -> Result<(usize, &[f64]), SignalError> {
    let settled = percentile(y, pct).ok_or(SignalError::EmptyWaveform)?;
    let start = steady_state_index(y, settled * accuracy);
    Ok((start, &y[start..]))
}

/// Min/mean/max/peak-to-peak over the steady-state window, ignoring NaN
pub fn steady_state_stats(y: &[f64], pct: f64, accuracy: f64) -> Result<SteadyStateStats, SignalError> {
    let (window_start, window) = steady_state_window(y, pct, accuracy)?;

    let (min, max) = min_max(window).ok_or(SignalError::EmptyWaveform)?;
    let (sum, count) = window
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    let mean = sum / count as f64;

    Ok(SteadyStateStats {
        window_start,
        min,
        mean,
        max,
        pk2pk: max - min,
    })
}

/// Global minimum and maximum, ignoring NaN
pub fn min_max(y: &[f64]) -> Option<(f64, f64)> {
    y.iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
