use crate::error::{HarnessError, Result};
use crate::Complex32;

/// Magnitude of a sample in dB (20·log10|x|). Zero samples map to -inf.
fn magnitude_db(sample: &Complex32) -> f64 {
    20.0 * (sample.norm() as f64).log10()
}

/// Estimate the average power of a complex buffer
///
/// Only samples whose magnitude exceeds `threshold_db` contribute, so silent
/// stretches before and after a burst do not dilute the estimate. The result is
/// the mean of x·conj(x) over the retained samples (mean square, DC included).
///
/// # Errors
///
/// `EmptySamples` for an empty buffer, `NoSamplesAboveThreshold` when the gate
/// rejects every sample.
pub fn estimate_power(samples: &[Complex32], threshold_db: f64) -> Result<f64> {
    if samples.is_empty() {
        return Err(HarnessError::EmptySamples);
    }

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for sample in samples.iter().filter(|s| magnitude_db(s) > threshold_db) {
        sum += sample.norm_sqr() as f64;
        count += 1;
    }

    if count == 0 {
        return Err(HarnessError::NoSamplesAboveThreshold { threshold_db });
    }

    Ok(sum / count as f64)
}
