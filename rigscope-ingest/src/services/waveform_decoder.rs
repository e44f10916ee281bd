//! Waveform capture file decoding
//!
//! A capture file is a single gzip member wrapping the raw little-endian
//! floating-point samples of one scope channel. Scope-side sample
//! compression (the `compress` flag in the capture metadata) is not
//! supported and is refused up front rather than mis-decoded.

use crate::error::SignalError;
use flate2::read::GzDecoder;
use rigscope_common::config::SampleFormat;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read and decode every sample of a capture file
pub fn read_samples(
    path: &Path,
    compressed_samples: bool,
    format: SampleFormat,
) -> Result<Vec<f64>, SignalError> {
    if compressed_samples {
        return Err(SignalError::UnsupportedCompression {
            path: path.to_path_buf(),
        });
    }

    let decode_err = |reason: String| SignalError::Decode {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = BufReader::new(File::open(path).map_err(|e| decode_err(e.to_string()))?);

    let mut magic = [0u8; 2];
    reader
        .read_exact(&mut magic)
        .map_err(|e| decode_err(format!("cannot read archive header: {}", e)))?;
    if magic != GZIP_MAGIC {
        return Err(decode_err("not a gzip archive".to_string()));
    }

    let mut raw = Vec::new();
    GzDecoder::new((&magic[..]).chain(reader))
        .read_to_end(&mut raw)
        .map_err(|e| decode_err(e.to_string()))?;

    let samples = decode_samples(&raw, format).map_err(decode_err)?;
    tracing::debug!(
        path = %path.display(),
        bytes = raw.len(),
        samples = samples.len(),
        "Decoded waveform capture"
    );
    Ok(samples)
}

/// Decode raw little-endian sample bytes
pub fn decode_samples(raw: &[u8], format: SampleFormat) -> Result<Vec<f64>, String> {
    let width = format.width();
    if raw.len() % width != 0 {
        return Err(format!(
            "{} bytes is not a whole number of {}-byte samples",
            raw.len(),
            width
        ));
    }

    let samples: Vec<f64> = match format {
        SampleFormat::F32 => raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        SampleFormat::F64 => raw
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
    };

    if let Some(index) = first_non_finite(&samples) {
        return Err(format!("non-finite sample at index {}", index));
    }
    Ok(samples)
}

/// Index of the first NaN or infinite sample
pub fn first_non_finite(samples: &[f64]) -> Option<usize> {
    samples.iter().position(|v| !v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_capture(dir: &TempDir, name: &str, payload: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(payload).unwrap();
        encoder.finish().unwrap();
        path
    }

    #[test]
    fn test_reads_f64_samples() {
        let dir = TempDir::new().unwrap();
        let values = [0.0f64, 1.5, -3.25, 12.0];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = write_capture(&dir, "ch1.bin.gz", &payload);

        let samples = read_samples(&path, false, SampleFormat::F64).unwrap();
        assert_eq!(samples, values);
    }

    #[test]
    fn test_reads_f32_samples() {
        let dir = TempDir::new().unwrap();
        let values = [0.5f32, 3.3, -1.0];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = write_capture(&dir, "ch2.bin.gz", &payload);

        let samples = read_samples(&path, false, SampleFormat::F32).unwrap();
        let expected: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        assert_eq!(samples, expected);
    }

    #[test]
    fn test_compressed_mode_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = write_capture(&dir, "ch1.bin.gz", &1.0f64.to_le_bytes());

        let err = read_samples(&path, true, SampleFormat::F64).unwrap_err();
        assert!(matches!(err, SignalError::UnsupportedCompression { .. }));
    }

    #[test]
    fn test_truncated_sample_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = write_capture(&dir, "ch1.bin.gz", &[0u8; 12]);

        let err = read_samples(&path, false, SampleFormat::F64).unwrap_err();
        assert!(matches!(err, SignalError::Decode { .. }));
    }

    #[test]
    fn test_plain_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.bin");
        std::fs::write(&path, 1.0f64.to_le_bytes()).unwrap();

        let err = read_samples(&path, false, SampleFormat::F64).unwrap_err();
        match err {
            SignalError::Decode { path: p, reason } => {
                assert_eq!(p, path);
                assert!(reason.contains("gzip"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_nan_sample_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let values = [3.3f64, f64::NAN, 3.3];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = write_capture(&dir, "ch1.bin.gz", &payload);

        let err = read_samples(&path, false, SampleFormat::F64).unwrap_err();
        match err {
            SignalError::Decode { reason, .. } => assert!(reason.contains("index 1")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_infinite_f32_sample_is_decode_error() {
        let payload: Vec<u8> = [1.0f32, f32::INFINITY].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert!(decode_samples(&payload, SampleFormat::F32).is_err());
    }

    #[test]
    fn test_missing_file_is_decode_error() {
        let err = read_samples(Path::new("/nonexistent/ch9.bin.gz"), false, SampleFormat::F64)
            .unwrap_err();
        assert!(matches!(err, SignalError::Decode { .. }));
    }
}
