//! WAV recordings in and out of the harness
//!
//! Mono recordings are lifted to complex baseband; complex output is stored as a
//! two-channel float file with I on the left and Q on the right.

use berwave_core::hilbert::analytic_signal;
use berwave_core::{Complex32, HarnessError};
use hound::{SampleFormat, WavSpec};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),

    #[error("Expected a mono recording, got {0} channels")]
    UnsupportedChannels(u16),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

pub fn is_wav(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("wav"))
        .unwrap_or(false)
}

/// Read a mono WAV file as complex baseband, returning the samples and rate
pub fn read_wav(path: &Path) -> Result<(Vec<Complex32>, u32), CliError> {
    let file = File::open(path).map_err(HarnessError::from)?;
    let mut reader = hound::WavReader::new(file)?;
    let spec = reader.spec();
    println!(
        "Read WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    if spec.channels != 1 {
        return Err(CliError::UnsupportedChannels(spec.channels));
    }

    let real: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let int_samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
            int_samples?.into_iter().map(|s| s as f32 / 32768.0).collect()
        }
        (SampleFormat::Float, 32) => {
            let float_samples: Result<Vec<f32>, _> = reader.samples::<f32>().collect();
            float_samples?
        }
        (_, bits) => return Err(CliError::UnsupportedBitDepth(bits)),
    };

    Ok((analytic_signal(&real), spec.sample_rate))
}

/// Write complex baseband as a 2-channel 32-bit float I/Q WAV file
pub fn write_wav(path: &Path, samples: &[Complex32], sample_rate: u32) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for s in samples {
        writer.write_sample(s.re)?;
        writer.write_sample(s.im)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_wav() {
        assert!(is_wav(Path::new("capture.WAV")));
        assert!(is_wav(Path::new("dir/capture.wav")));
        assert!(!is_wav(Path::new("capture.bin")));
        assert!(!is_wav(Path::new("wav")));
    }

    #[test]
    fn test_mono_int16_read_and_iq_write() {
        let dir = std::env::temp_dir();
        let mono = dir.join(format!("berwave_mono_{}.wav", std::process::id()));
        let iq = dir.join(format!("berwave_iq_{}.wav", std::process::id()));

        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&mono, spec).unwrap();
        for n in 0..800 {
            let v = (n as f32 * 0.3).sin() * 16000.0;
            writer.write_sample(v as i16).unwrap();
        }
        writer.finalize().unwrap();

        let (samples, rate) = read_wav(&mono).unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 800);

        write_wav(&iq, &samples, rate).unwrap();
        let reader = hound::WavReader::open(&iq).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 1600);

        std::fs::remove_file(&mono).ok();
        std::fs::remove_file(&iq).ok();
    }

    #[test]
    fn test_stereo_input_rejected() {
        let path = std::env::temp_dir().join(format!("berwave_stereo_{}.wav", std::process::id()));
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(read_wav(&path), Err(CliError::UnsupportedChannels(2))));
        std::fs::remove_file(&path).ok();
    }
}
