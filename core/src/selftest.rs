//! AWGN channel self-test and reference BER curves
//!
//! The self-test pushes phase-rotated BPSK through the same power estimate and
//! noise injection used by the sweep and checks the measured BER against the
//! closed form within ±0.25 dB of Eb/No.

use crate::error::Result;
use crate::noise::{inject_noise, required_variance};
use crate::power::estimate_power;
use crate::{Complex32, DEFAULT_POWER_THRESHOLD_DB};
use rand::Rng;
use std::f32::consts::PI;

pub const SELF_TEST_BITS: usize = 100_000;
pub const SELF_TEST_EBNO_DB: f64 = 4.0;

/// Allowed Eb/No deviation of the measured BER
const SELF_TEST_MARGIN_DB: f64 = 0.25;

/// Eb/No points of the reference curves
pub const THEORY_EBNO: [f64; 11] = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];

/// Non-coherent 4FSK bit error rate at [`THEORY_EBNO`]
pub const THEORY_BER_4: [f64; 11] = [
    0.22934, 0.18475, 0.13987, 0.09772, 0.06156, 0.03395, 0.01579, 0.00591, 0.00168, 3.39e-4,
    4.44e-5,
];

/// Non-coherent 2FSK bit error rate at [`THEORY_EBNO`]
pub const THEORY_BER_2: [f64; 11] = [
    0.30327, 0.26644, 0.22637, 0.18438, 0.14240, 0.10287, 0.06831, 0.04080, 0.02132, 0.00942,
    0.00337,
];

/// Reference BER for an order and Eb/No, available at whole-dB points 0 to 10
pub fn theory_ber(order: u32, ebno_db: f64) -> Option<f64> {
    let table = match order {
        2 => &THEORY_BER_2,
        4 => &THEORY_BER_4,
        _ => return None,
    };
    THEORY_EBNO
        .iter()
        .position(|&point| (point - ebno_db).abs() < 1e-9)
        .map(|i| table[i])
}

/// Complementary error function (Chebyshev fit, fractional error below 1.2e-7)
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Coherent BPSK bit error rate
pub fn bpsk_ber(ebno_db: f64) -> f64 {
    let ebno = 10f64.powf(ebno_db / 10.0);
    0.5 * erfc(ebno.sqrt())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelfTestReport {
    pub bits: usize,
    pub errors: usize,
    pub ber: f64,
    /// Estimated power of the clean symbols (should be ~1)
    pub tx_power: f64,
    /// Theoretical BER at Eb/No + margin
    pub ber_lower_limit: f64,
    /// Theoretical BER at Eb/No - margin
    pub ber_upper_limit: f64,
}

impl SelfTestReport {
    pub fn power_ok(&self) -> bool {
        self.tx_power > 0.9 && self.tx_power < 1.1
    }

    pub fn passed(&self) -> bool {
        self.power_ok() && self.ber > self.ber_lower_limit && self.ber < self.ber_upper_limit
    }
}

/// Simulate BPSK over the calibrated AWGN channel and compare with theory
pub fn awgn_self_test<R: Rng + ?Sized>(rng: &mut R, bits: usize, ebno_db: f64) -> Result<SelfTestReport> {
    let rotation = Complex32::from_polar(1.0, PI / 3.0);
    let tx_bits: Vec<bool> = (0..bits).map(|_| rng.gen()).collect();
    let tx_symbols: Vec<Complex32> = tx_bits
        .iter()
        .map(|&b| rotation * if b { 1.0 } else { -1.0 })
        .collect();

    let tx_power = estimate_power(&tx_symbols, DEFAULT_POWER_THRESHOLD_DB)?;

    // One sample per symbol, one bit per symbol, unit baud
    let variance = required_variance(tx_power, 1.0, 1.0, ebno_db, 1.0, false)?;
    let rx_symbols = inject_noise(&tx_symbols, variance, true, rng)?;

    let derotate = rotation.conj();
    let errors = rx_symbols
        .iter()
        .zip(tx_bits.iter())
        .filter(|(s, b)| ((**s * derotate).re > 0.0) != **b)
        .count();

    let report = SelfTestReport {
        bits,
        errors,
        ber: errors as f64 / bits as f64,
        tx_power,
        ber_lower_limit: bpsk_ber(ebno_db + SELF_TEST_MARGIN_DB),
        ber_upper_limit: bpsk_ber(ebno_db - SELF_TEST_MARGIN_DB),
    };

    log::info!(
        "nb_errors: {} ber: {:.4} ber_lower_limit: {:.4} ber_upper_limit: {:.4}",
        report.errors,
        report.ber,
        report.ber_lower_limit,
        report.ber_upper_limit
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_erfc_known_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-7);
        assert!((erfc(1.0) - 0.157_299_207).abs() < 1e-7);
        assert!((erfc(-1.0) - 1.842_700_793).abs() < 1e-7);
        assert!((erfc(2.0) - 0.004_677_735).abs() < 1e-8);
    }

    #[test]
    fn test_bpsk_ber_at_4db() {
        // 0.5·erfc(√10^0.4)
        assert!((bpsk_ber(4.0) - 0.012_500_8).abs() < 1e-5);
    }

    #[test]
    fn test_theory_lookup() {
        assert_eq!(theory_ber(4, 0.0), Some(0.22934));
        assert_eq!(theory_ber(2, 10.0), Some(0.00337));
        assert_eq!(theory_ber(4, 4.5), None);
        assert_eq!(theory_ber(8, 4.0), None);
    }

    #[test]
    fn test_awgn_channel_matches_theory() {
        let mut rng = StdRng::seed_from_u64(2020);
        let report = awgn_self_test(&mut rng, SELF_TEST_BITS, SELF_TEST_EBNO_DB).unwrap();
        assert!(report.power_ok(), "tx power {}", report.tx_power);
        assert!(
            report.passed(),
            "ber {} outside [{}, {}]",
            report.ber,
            report.ber_lower_limit,
            report.ber_upper_limit
        );
    }
}
