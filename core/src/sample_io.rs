use crate::error::{HarnessError, Result};
use crate::hilbert::analytic_signal;
use crate::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Raw sample file layouts understood by the codec2 FSK utilities
///
/// All formats are little-endian; complex formats interleave I and Q.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Real 32-bit float
    F32,
    /// Real signed 16-bit
    S16,
    /// Complex 32-bit float
    Cf32,
    /// Complex signed 16-bit
    Cs16,
}

impl SampleFormat {
    pub fn is_real(self) -> bool {
        matches!(self, SampleFormat::F32 | SampleFormat::S16)
    }

    /// Bytes occupied by one sample (both rails for complex formats)
    pub fn frame_bytes(self) -> usize {
        match self {
            SampleFormat::F32 => 4,
            SampleFormat::S16 => 2,
            SampleFormat::Cf32 => 8,
            SampleFormat::Cs16 => 4,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" => Ok(SampleFormat::F32),
            "s16" => Ok(SampleFormat::S16),
            "cf32" | "c8" => Ok(SampleFormat::Cf32),
            "cs16" => Ok(SampleFormat::Cs16),
            other => Err(HarnessError::InvalidConfig(format!("unknown sample format '{}'", other))),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::F32 => "f32",
            SampleFormat::S16 => "s16",
            SampleFormat::Cf32 => "cf32",
            SampleFormat::Cs16 => "cs16",
        };
        f.write_str(name)
    }
}

fn s16_to_f32(bytes: &[u8]) -> f32 {
    i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0
}

fn f32_to_s16(value: f32) -> [u8; 2] {
    // Clamp to [-1.0, 1.0] range to avoid overflow, then scale to i16
    let clamped = value.clamp(-1.0, 1.0);
    ((clamped * 32767.0) as i16).to_le_bytes()
}

fn le_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode a raw byte buffer into complex baseband
///
/// Real formats go through the analytic-signal transform. A trailing partial
/// frame is dropped.
pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<Complex32> {
    let frame = format.frame_bytes();
    if bytes.len() % frame != 0 {
        log::warn!(
            "Dropping {} trailing bytes that do not form a whole {} sample",
            bytes.len() % frame,
            format
        );
    }

    let chunks = bytes.chunks_exact(frame);
    match format {
        SampleFormat::F32 => {
            let real: Vec<f32> = chunks.map(le_f32).collect();
            analytic_signal(&real)
        }
        SampleFormat::S16 => {
            let real: Vec<f32> = chunks.map(s16_to_f32).collect();
            analytic_signal(&real)
        }
        SampleFormat::Cf32 => chunks
            .map(|c| Complex32::new(le_f32(&c[..4]), le_f32(&c[4..])))
            .collect(),
        SampleFormat::Cs16 => chunks
            .map(|c| Complex32::new(s16_to_f32(&c[..2]), s16_to_f32(&c[2..])))
            .collect(),
    }
}

/// Encode complex baseband into a raw byte buffer
///
/// # Errors
///
/// Real formats are rejected: a complex buffer cannot be stored on one rail
/// without discarding information.
pub fn encode_samples(samples: &[Complex32], format: SampleFormat) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(samples.len() * format.frame_bytes());
    match format {
        SampleFormat::Cf32 => {
            for s in samples {
                bytes.extend_from_slice(&s.re.to_le_bytes());
                bytes.extend_from_slice(&s.im.to_le_bytes());
            }
        }
        SampleFormat::Cs16 => {
            for s in samples {
                bytes.extend_from_slice(&f32_to_s16(s.re));
                bytes.extend_from_slice(&f32_to_s16(s.im));
            }
        }
        SampleFormat::F32 | SampleFormat::S16 => {
            return Err(HarnessError::InvalidConfig(format!(
                "cannot write complex samples as real format {}",
                format
            )));
        }
    }
    Ok(bytes)
}

/// Load a sample file as complex baseband
pub fn read_samples(path: &Path, format: SampleFormat) -> Result<Vec<Complex32>> {
    let bytes = fs::read(path)?;
    let samples = decode_samples(&bytes, format);
    log::debug!("Read {} {} samples from {}", samples.len(), format, path.display());
    Ok(samples)
}

/// Store complex baseband in one of the complex file formats
pub fn write_samples(path: &Path, samples: &[Complex32], format: SampleFormat) -> Result<()> {
    let bytes = encode_samples(samples, format)?;
    fs::write(path, bytes)?;
    log::debug!("Wrote {} {} samples to {}", samples.len(), format, path.display());
    Ok(())
}
