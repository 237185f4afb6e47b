use crate::error::{HarnessError, Result};
use crate::power::estimate_power;
use crate::{Complex32, DEFAULT_POWER_THRESHOLD_DB};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Bits carried by one symbol of an M-ary FSK signal (2 → 1, 4 → 2)
pub fn bits_per_symbol(order: u32) -> Result<u32> {
    match order {
        2 => Ok(1),
        4 => Ok(2),
        other => Err(HarnessError::InvalidConfig(format!(
            "FSK order must be 2 or 4, got {}",
            other
        ))),
    }
}

/// Noise variance needed to hit `ebno_db` for a signal of power `signal_power`
///
/// variance = P·fs / (Rs · Eb/No · bits_per_symbol), halved for real-valued
/// samples since a single rail carries half the complex noise power.
pub fn required_variance(
    signal_power: f64,
    sample_rate: f64,
    baud_rate: f64,
    ebno_db: f64,
    bits_per_symbol: f64,
    is_real: bool,
) -> Result<f64> {
    if !(baud_rate > 0.0) {
        return Err(HarnessError::ZeroBaudRate);
    }
    if !(bits_per_symbol > 0.0) {
        return Err(HarnessError::ZeroBitsPerSymbol);
    }

    let ebno = 10f64.powf(ebno_db / 10.0);
    let mut variance = signal_power * sample_rate / (baud_rate * ebno * bits_per_symbol);
    if is_real {
        variance *= 0.5;
    }

    Ok(variance)
}

/// Add complex Gaussian noise of total variance `variance`
///
/// I and Q each get `variance / 2`. With `normalize` the result is scaled so its
/// largest magnitude is exactly 1.0. The random source is supplied by the caller.
pub fn inject_noise<R: Rng + ?Sized>(
    samples: &[Complex32],
    variance: f64,
    normalize: bool,
    rng: &mut R,
) -> Result<Vec<Complex32>> {
    let rail = Normal::new(0.0f64, (variance / 2.0).sqrt()).map_err(|e| {
        HarnessError::InvalidConfig(format!("noise variance {}: {}", variance, e))
    })?;

    let mut noisy: Vec<Complex32> = samples
        .iter()
        .map(|s| {
            let i = rail.sample(rng) as f32;
            let q = rail.sample(rng) as f32;
            *s + Complex32::new(i, q)
        })
        .collect();

    if normalize {
        let peak = noisy.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        if peak > 0.0 {
            let scale = 1.0 / peak;
            noisy.iter_mut().for_each(|s| *s *= scale);
        }
    }

    Ok(noisy)
}

/// Produce a normalized low-SNR copy of a clean complex signal
///
/// Power is estimated with the default silence gate, noise is computed for a
/// complex representation and the result is peak-normalized for storage.
pub fn generate_low_snr<R: Rng + ?Sized>(
    samples: &[Complex32],
    sample_rate: u32,
    baud_rate: u32,
    ebno_db: f64,
    order: u32,
    rng: &mut R,
) -> Result<Vec<Complex32>> {
    let bps = bits_per_symbol(order)?;
    let power = estimate_power(samples, DEFAULT_POWER_THRESHOLD_DB)?;
    let variance = required_variance(
        power,
        sample_rate as f64,
        baud_rate as f64,
        ebno_db,
        bps as f64,
        false,
    )?;

    log::debug!(
        "Eb/No {:.1} dB at {} baud: power {:.4e}, noise variance {:.4e}",
        ebno_db,
        baud_rate,
        power,
        variance
    );

    inject_noise(samples, variance, true, rng)
}
