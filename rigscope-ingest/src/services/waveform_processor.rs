//! Waveform signal processor
//!
//! Turns one capture file plus its acquisition metadata into the
//! [`WaveformSummary`] stored on the Waveform document:
//!
//! 1. Decode the gzip capture into samples
//! 2. Reconstruct the time axis (linspace over `n * x_increment`)
//! 3. Percentile steady-state window and its statistics
//! 4. Steady-state index against `expected_voltage`, or a fraction of the
//!    window mean when no expected voltage is known
//! 5. Min/max downsample for visualization
//!
//! NaN or infinite samples reject the capture.
//!
//! Everything here is synchronous CPU and disk work; async callers go
//! through [`WaveformProcessor::summarize_blocking`].

use crate::error::SignalError;
use crate::services::downsampler::min_max_downsample;
use crate::services::steady_state::{min_max, steady_state_index, steady_state_stats, time_axis};
use crate::services::waveform_decoder::{first_non_finite, read_samples};
use rigscope_common::config::{IngestSettings, SampleFormat};
use rigscope_common::entities::{WaveformSource, WaveformSummary};
use std::path::{Path, PathBuf};

/// Signal-processing parameters taken from `[ingest]`
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSettings {
    pub downsample_size: usize,
    pub percentile: f64,
    pub accuracy: f64,
    pub target_ratio: f64,
    pub sample_format: SampleFormat,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self::from(&IngestSettings::default())
    }
}

impl From<&IngestSettings> for SignalSettings {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            downsample_size: settings.downsample_size,
            percentile: settings.steady_state_percentile,
            accuracy: settings.steady_state_accuracy,
            target_ratio: settings.steady_state_target_ratio,
            sample_format: settings.sample_format,
        }
    }
}

/// Stateless summary calculator; cheap to clone into blocking tasks
#[derive(Debug, Clone, Default)]
pub struct WaveformProcessor {
    settings: SignalSettings,
    /// Base directory for relative capture locations
    base_dir: Option<PathBuf>,
}

impl WaveformProcessor {
    pub fn new(settings: SignalSettings) -> Self {
        Self {
            settings,
            base_dir: None,
        }
    }

    /// Resolve relative capture locations against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn settings(&self) -> &SignalSettings {
        &self.settings
    }

    /// Absolute path of a capture location
    pub fn resolve_location(&self, location: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if location.is_relative() => dir.join(location),
            _ => location.to_path_buf(),
        }
    }

    /// Decode the capture file referenced by `source` and summarize it
    pub fn summarize_file(&self, source: &WaveformSource) -> Result<WaveformSummary, SignalError> {
        let path = self.resolve_location(&source.location);
        let samples = read_samples(&path, source.compressed, self.settings.sample_format)?;
        self.summarize(&samples, source)
    }

    /// Summarize already-decoded samples
    pub fn summarize(
        &self,
        samples: &[f64],
        source: &WaveformSource,
    ) -> Result<WaveformSummary, SignalError> {
        if let Some(index) = first_non_finite(samples) {
            return Err(SignalError::NonFiniteSample { index });
        }
        let (min, max) = min_max(samples).ok_or(SignalError::EmptyWaveform)?;
        let x = time_axis(source.x_increment, samples.len())?;

        let stats = steady_state_stats(samples, self.settings.percentile, self.settings.accuracy)?;
        let target = source
            .expected_voltage
            .unwrap_or(self.settings.target_ratio * stats.mean);
        let index = steady_state_index(samples, target);

        let mut downsample = min_max_downsample(&x, samples, self.settings.downsample_size)?;
        if source.initial_x != 0.0 {
            for t in downsample.x.iter_mut() {
                *t += source.initial_x;
            }
        }

        Ok(WaveformSummary {
            length: samples.len(),
            min,
            max,
            steady_state_index: index,
            steady_state_min: stats.min,
            steady_state_mean: stats.mean,
            steady_state_max: stats.max,
            steady_state_pk2pk: stats.pk2pk,
            downsample,
        })
    }

    /// [`summarize_file`](Self::summarize_file) on the blocking thread pool
    pub async fn summarize_blocking(
        &self,
        source: WaveformSource,
    ) -> Result<WaveformSummary, SignalError> {
        let processor = self.clone();
        let location = source.location.clone();
        tokio::task::spawn_blocking(move || processor.summarize_file(&source))
            .await
            .unwrap_or_else(|e| {
                Err(SignalError::Decode {
                    path: location,
                    reason: format!("decode task failed: {}", e),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn source(location: &str) -> WaveformSource {
        WaveformSource {
            location: PathBuf::from(location),
            x_increment: 1e-6,
            initial_x: 0.0,
            compressed: false,
            units: Some("V".to_string()),
            expected_voltage: None,
        }
    }

    /// 0 V for 100 samples, ramp to 3.3 V over 100 samples, then flat
    fn rail() -> Vec<f64> {
        let mut y = vec![0.0; 100];
        y.extend((1..=100).map(|i| 3.3 * i as f64 / 100.0));
        y.extend(std::iter::repeat(3.3).take(800));
        y
    }

    fn processor(downsample_size: usize) -> WaveformProcessor {
        WaveformProcessor::new(SignalSettings {
            downsample_size,
            ..SignalSettings::default()
        })
    }

    #[test]
    fn test_summary_of_rail() {
        let y = rail();
        let summary = processor(100).summarize(&y, &source("ch1.bin.gz")).unwrap();

        assert_eq!(summary.length, 1000);
        assert_eq!(summary.min, 0.0);
        assert_eq!(summary.max, 3.3);
        assert_eq!(summary.downsample.x.len(), 200);
        assert!((summary.steady_state_mean - 3.3).abs() < 1e-3);
        // Default target is 0.9 * mean of the window
        let target = 0.9 * summary.steady_state_mean;
        assert!(y[summary.steady_state_index] >= target);
        assert!(y[summary.steady_state_index - 1] < target);
    }

    #[test]
    fn test_expected_voltage_sets_target() {
        let y = rail();
        let mut src = source("ch1.bin.gz");
        src.expected_voltage = Some(1.65);

        let summary = processor(100).summarize(&y, &src).unwrap();
        assert_eq!(summary.steady_state_index, 149);
    }

    #[test]
    fn test_initial_x_offsets_downsample() {
        let y = rail();
        let mut src = source("ch1.bin.gz");
        src.initial_x = -5e-4;

        let summary = processor(10).summarize(&y, &src).unwrap();
        assert!((summary.downsample.x[0] + 5e-4).abs() < 1e-15);
    }

    #[test]
    fn test_too_few_samples_for_downsample() {
        let err = processor(1000).summarize(&[1.0; 10], &source("ch1.bin.gz")).unwrap_err();
        assert_eq!(err, SignalError::DownsampleSize { size: 1000, samples: 10 });
    }

    #[test]
    fn test_nan_sample_rejects_capture() {
        let mut y = rail();
        y[700] = f64::NAN;
        let err = processor(100).summarize(&y, &source("ch1.bin.gz")).unwrap_err();
        assert_eq!(err, SignalError::NonFiniteSample { index: 700 });
    }

    #[test]
    fn test_summary_survives_document_round_trip() {
        use rigscope_common::entities::Waveform;
        use rigscope_common::{Entity, NaturalKey};

        let src = source("ch1.bin.gz");
        let summary = processor(100).summarize(&rail(), &src).unwrap();
        let key = NaturalKey::waveform("VCC_3V3", "Load", "1200", "1", "1").unwrap();
        let waveform = Waveform::new(&key, "Waveform_1200_load_1", src, summary.clone()).unwrap();

        let doc = waveform.to_document().unwrap();
        let stored: Waveform = serde_json::from_value(doc.body).unwrap();
        assert_eq!(stored.summary.length, summary.length);
        assert_eq!(stored.summary.steady_state_index, summary.steady_state_index);
        assert!((stored.summary.steady_state_mean - summary.steady_state_mean).abs() < 1e-12);
        assert_eq!(stored.summary.downsample.y.len(), summary.downsample.y.len());
    }

    #[test]
    fn test_empty_waveform() {
        let err = processor(1).summarize(&[], &source("ch1.bin.gz")).unwrap_err();
        assert_eq!(err, SignalError::EmptyWaveform);
    }

    #[tokio::test]
    async fn test_summarize_relative_file_on_blocking_pool() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = rail().iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut encoder = GzEncoder::new(
            File::create(dir.path().join("ch1.bin.gz")).unwrap(),
            Compression::default(),
        );
        encoder.write_all(&payload).unwrap();
        encoder.finish().unwrap();

        let processor = processor(100).with_base_dir(dir.path());
        let summary = processor.summarize_blocking(source("ch1.bin.gz")).await.unwrap();
        assert_eq!(summary.length, 1000);
        assert_eq!(summary.max, 3.3);
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let processor = processor(100);
        let err = processor
            .summarize_blocking(source("/nonexistent/ch1.bin.gz"))
            .await
            .unwrap_err();
        match err {
            SignalError::Decode { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/ch1.bin.gz")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
