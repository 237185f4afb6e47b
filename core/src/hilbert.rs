//! Analytic-signal transform for real-valued recordings
//!
//! The modulator emits a real passband signal; noise injection and Doppler
//! rotation work on complex baseband, so real inputs are lifted to their analytic
//! form x + j·H{x} by suppressing the negative half of the spectrum.

use crate::Complex32;
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

/// Compute the analytic signal of a real sequence
///
/// DC (and Nyquist, for even lengths) are kept, positive-frequency bins are
/// doubled and negative-frequency bins zeroed before the inverse FFT. The real
/// part of the output equals the input.
pub fn analytic_signal(real: &[f32]) -> Vec<Complex32> {
    let n = real.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut spectrum: Vec<Complex64> = real.iter().map(|&x| Complex64::new(x as f64, 0.0)).collect();
    forward.process(&mut spectrum);

    // Positive bins run 1..n/2 (exclusive of Nyquist when n is even)
    let positive_end = if n % 2 == 0 { n / 2 } else { (n + 1) / 2 };
    for bin in spectrum.iter_mut().take(positive_end).skip(1) {
        *bin *= 2.0;
    }
    let negative_start = if n % 2 == 0 { n / 2 + 1 } else { (n + 1) / 2 };
    for bin in spectrum.iter_mut().skip(negative_start) {
        *bin = Complex64::new(0.0, 0.0);
    }

    inverse.process(&mut spectrum);

    let scale = 1.0 / n as f64;
    spectrum
        .iter()
        .map(|c| Complex32::new((c.re * scale) as f32, (c.im * scale) as f32))
        .collect()
}
