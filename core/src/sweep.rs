//! Eb/No sweep orchestration
//!
//! For every baud rate a clean source is generated once (optionally Doppler
//! shifted), then Eb/No points are measured in ascending order until the BER
//! drops below the stop threshold or the list runs out.

use crate::doppler::{apply_doppler, DopplerProfile, DopplerWarning};
use crate::error::{HarnessError, Result};
use crate::modem::{BitReport, DemodOutcome, DemodRequest, Modem, SourceRequest};
use crate::noise::{bits_per_symbol, generate_low_snr};
use crate::scorer::{score_frequency_estimates, ToneLayout};
use crate::stats::TelemetrySeries;
use crate::{
    Complex32, DEFAULT_BAUD_RATES, DEFAULT_BER_STOP, DEFAULT_ESTIMATOR_LOWER,
    DEFAULT_FEST_THRESHOLD, DEFAULT_FRAME_LENGTH, DEFAULT_FRAME_THRESHOLD, DEFAULT_FSK_ORDER,
    DEFAULT_LOW_TONE, DEFAULT_SAMPLE_RATE, DEFAULT_STATS_RATE, DEFAULT_TEST_LENGTH,
    DEFAULT_TONE_SPACING,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 0 to 4.5 dB in 0.5 dB steps, then 5 to 20 dB in 1 dB steps
pub fn default_ebno_range() -> Vec<f64> {
    (0..10)
        .map(|i| i as f64 * 0.5)
        .chain((5..=20).map(|db| db as f64))
        .collect()
}

/// Parameters of one sweep campaign, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Eb/No points in dB, strictly ascending
    pub ebno_db: Vec<f64>,
    pub baud_rates: Vec<u32>,
    /// FSK order (2 or 4)
    pub order: u32,
    pub sample_rate: u32,
    /// Frequency of the lowest tone in Hz
    pub low_tone: f64,
    pub tone_spacing: f64,
    /// Bits requested from the test-bit generator
    pub test_length: u64,
    pub frame_length: u32,
    /// Frame detection threshold of the bit checker; bounds the measurable BER
    pub frame_threshold: f64,
    /// Bits the demodulator may spend spinning up its estimators
    pub frame_ignore: u64,
    pub estimator_lower: u32,
    pub estimator_upper: u32,
    pub mask_estimator: bool,
    /// Stop a baud rate once a point measures below this BER
    pub ber_stop: f64,
    pub score_frequency_estimator: bool,
    /// Estimator error threshold as a fraction of the baud rate
    pub fest_threshold: f64,
    /// Telemetry ticks per second requested from the demodulator
    pub stats_rate: u32,
    pub doppler: bool,
    pub doppler_file: PathBuf,
    /// Seed for the noise generator; entropy when absent
    pub seed: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            ebno_db: default_ebno_range(),
            baud_rates: DEFAULT_BAUD_RATES.to_vec(),
            order: DEFAULT_FSK_ORDER,
            sample_rate: DEFAULT_SAMPLE_RATE,
            low_tone: DEFAULT_LOW_TONE,
            tone_spacing: DEFAULT_TONE_SPACING,
            test_length: DEFAULT_TEST_LENGTH,
            frame_length: DEFAULT_FRAME_LENGTH,
            frame_threshold: DEFAULT_FRAME_THRESHOLD,
            frame_ignore: DEFAULT_FRAME_LENGTH as u64,
            estimator_lower: DEFAULT_ESTIMATOR_LOWER,
            estimator_upper: DEFAULT_SAMPLE_RATE / 2 - 1000,
            mask_estimator: true,
            ber_stop: DEFAULT_BER_STOP,
            score_frequency_estimator: true,
            fest_threshold: DEFAULT_FEST_THRESHOLD,
            stats_rate: DEFAULT_STATS_RATE,
            doppler: false,
            doppler_file: PathBuf::from("doppler.json"),
            seed: None,
            tool_timeout_secs: None,
        }
    }
}

impl SweepConfig {
    /// Reject configurations that would make every measurement meaningless
    pub fn validate(&self) -> Result<()> {
        bits_per_symbol(self.order)?;

        if self.baud_rates.is_empty() {
            return Err(HarnessError::InvalidConfig("no baud rates to sweep".to_string()));
        }
        if self.baud_rates.contains(&0) {
            return Err(HarnessError::ZeroBaudRate);
        }
        if self.sample_rate == 0 {
            return Err(HarnessError::InvalidConfig("sample rate must be positive".to_string()));
        }
        if self.ebno_db.is_empty() {
            return Err(HarnessError::InvalidConfig("no Eb/No points to sweep".to_string()));
        }
        if self.ebno_db.iter().any(|v| !v.is_finite()) {
            return Err(HarnessError::InvalidConfig("Eb/No points must be finite".to_string()));
        }
        if self.ebno_db.windows(2).any(|w| w[1] <= w[0]) {
            return Err(HarnessError::InvalidConfig(
                "Eb/No points must be strictly ascending".to_string(),
            ));
        }
        if self.estimator_lower >= self.estimator_upper {
            return Err(HarnessError::InvalidConfig(format!(
                "estimator range {}..{} Hz is empty",
                self.estimator_lower, self.estimator_upper
            )));
        }
        if self.score_frequency_estimator && self.stats_rate == 0 {
            return Err(HarnessError::InvalidConfig(
                "telemetry rate must be positive when scoring the estimator".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tones(&self) -> ToneLayout {
        ToneLayout::new(self.low_tone, self.tone_spacing)
    }

    /// Bits the demodulator should have checked for a source signal
    ///
    /// A Doppler-shifted source may have been truncated, so its length is
    /// derived from the signal duration instead of the requested bit count.
    pub fn expected_bits(&self, baud_rate: u32, signal_len: usize, doppler_applied: bool) -> f64 {
        let sent = if doppler_applied {
            baud_rate as f64 * (signal_len as f64 / self.sample_rate as f64)
        } else {
            self.test_length as f64
        };
        (sent - self.frame_ignore as f64).max(0.0)
    }

    fn demod_request(&self, baud_rate: u32, ebno_db: f64) -> DemodRequest {
        DemodRequest {
            baud_rate,
            order: self.order,
            sample_rate: self.sample_rate,
            estimator_lower: self.estimator_lower,
            estimator_upper: self.estimator_upper,
            mask_spacing: self.mask_estimator.then_some(self.tone_spacing),
            stats_rate: self.score_frequency_estimator.then_some(self.stats_rate),
            frame_length: self.frame_length,
            frame_threshold: self.frame_threshold,
            label: format!("fsk_{}_{:.1}", baud_rate, ebno_db),
        }
    }
}

/// BER of one point from the bit checker's report
///
/// No report or zero tested bits is the worst case, 1.0. Bits the demodulator
/// should have checked but did not are added to the errors. More tested bits
/// than expected are taken as reported.
pub fn compute_ber(report: Option<BitReport>, expected_bits: f64) -> f64 {
    let report = match report {
        Some(r) if r.bits_tested > 0 => r,
        _ => return 1.0,
    };

    let tested = report.bits_tested as f64;
    let mut errors = report.bit_errors as f64;
    if tested < expected_bits {
        log::info!(
            "Demod got {} bits, but {} were expected",
            report.bits_tested,
            expected_bits
        );
        errors += expected_bits - tested;
    }

    (errors / tested).min(1.0)
}

/// One measured Eb/No point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub ebno: f64,
    pub ber: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq_est_error: Option<f64>,
}

/// Points measured for one baud rate, in ascending Eb/No
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaudSweep {
    pub baud: u32,
    pub points: Vec<SweepPoint>,
    /// Set when the source had to be cut to fit the Doppler profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doppler_warning: Option<DopplerWarning>,
}

/// Final output of a sweep, one entry per baud rate in configured order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SweepResult {
    pub runs: Vec<BaudSweep>,
}

impl SweepResult {
    pub fn baud(&self, baud: u32) -> Option<&BaudSweep> {
        self.runs.iter().find(|run| run.baud == baud)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-baud-rate state machine
enum SweepState {
    GenerateSource,
    LoopEbNo { index: usize },
    Measure { index: usize, noisy: Vec<Complex32> },
    Score { index: usize, ber: f64, outcome: DemodOutcome },
    CheckStop { index: usize, point: SweepPoint },
    Done,
}

/// Runs a sweep against a [`Modem`]
pub struct SweepController<M: Modem> {
    config: SweepConfig,
    modem: M,
    doppler: Option<DopplerProfile>,
    rng: StdRng,
}

impl<M: Modem> SweepController<M> {
    /// Validate the configuration and load the Doppler profile if enabled
    pub fn new(config: SweepConfig, modem: M) -> Result<Self> {
        config.validate()?;

        let doppler = if config.doppler {
            Some(DopplerProfile::load(&config.doppler_file)?)
        } else {
            None
        };

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            modem,
            doppler,
            rng,
        })
    }

    /// Use an already loaded profile instead of the configured file
    pub fn with_doppler_profile(mut self, profile: DopplerProfile) -> Self {
        self.doppler = Some(profile);
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn into_modem(self) -> M {
        self.modem
    }

    /// Run every baud rate. Only configuration errors abort the sweep.
    pub fn run(&mut self) -> Result<SweepResult> {
        let mut result = SweepResult::default();
        for baud in self.config.baud_rates.clone() {
            let run = self.run_baud(baud)?;
            log::info!("{} baud: {} points measured", baud, run.points.len());
            result.runs.push(run);
        }
        Ok(result)
    }

    fn run_baud(&mut self, baud: u32) -> Result<BaudSweep> {
        let mut points = Vec::new();
        let mut source = Vec::new();
        let mut expected_bits = 0.0;
        let mut doppler_warning = None;
        let mut state = SweepState::GenerateSource;

        loop {
            state = match state {
                SweepState::GenerateSource => {
                    let request = SourceRequest {
                        baud_rate: baud,
                        order: self.config.order,
                        sample_rate: self.config.sample_rate,
                        tones: self.config.tones(),
                        num_bits: self.config.test_length,
                        frame_length: self.config.frame_length,
                    };

                    match self.modem.generate_source(&request) {
                        Ok(samples) if !samples.is_empty() => {
                            let doppler_applied = self.doppler.is_some();
                            source = match &self.doppler {
                                Some(profile) => {
                                    log::info!("Applying Doppler to {} baud source", baud);
                                    let shifted =
                                        apply_doppler(&samples, profile, self.config.sample_rate)?;
                                    doppler_warning = shifted.warning;
                                    shifted.samples
                                }
                                None => samples,
                            };
                            expected_bits =
                                self.config.expected_bits(baud, source.len(), doppler_applied);
                            if source.is_empty() {
                                log::error!("Doppler profile left no samples for {} baud", baud);
                                SweepState::Done
                            } else {
                                SweepState::LoopEbNo { index: 0 }
                            }
                        }
                        Ok(_) => {
                            log::error!("Source for {} baud is empty, skipping", baud);
                            SweepState::Done
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            log::error!("Source generation for {} baud failed: {}", baud, e);
                            SweepState::Done
                        }
                    }
                }

                SweepState::LoopEbNo { index } => match self.config.ebno_db.get(index) {
                    Some(&ebno) => {
                        let noisy = generate_low_snr(
                            &source,
                            self.config.sample_rate,
                            baud,
                            ebno,
                            self.config.order,
                            &mut self.rng,
                        )?;
                        SweepState::Measure { index, noisy }
                    }
                    None => SweepState::Done,
                },

                SweepState::Measure { index, noisy } => {
                    let ebno = self.config.ebno_db[index];
                    let request = self.config.demod_request(baud, ebno);
                    let outcome = match self.modem.demodulate(&noisy, &request) {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            log::error!("{} baud at {:.1} dB: {}", baud, ebno, e);
                            DemodOutcome::default()
                        }
                    };

                    let ber = compute_ber(outcome.report, expected_bits);
                    if outcome.report.map_or(true, |r| r.bits_tested == 0) {
                        // Nothing decoded: record the worst case and skip scoring
                        SweepState::CheckStop {
                            index,
                            point: SweepPoint { ebno, ber, freq_est_error: None },
                        }
                    } else {
                        SweepState::Score { index, ber, outcome }
                    }
                }

                SweepState::Score { index, ber, outcome } => {
                    let ebno = self.config.ebno_db[index];
                    let freq_est_error = if self.config.score_frequency_estimator {
                        let series = TelemetrySeries::from_lines(
                            outcome.telemetry.as_deref().unwrap_or("").lines(),
                            self.config.stats_rate as f64,
                        );
                        score_frequency_estimates(
                            &series,
                            baud,
                            &self.config.tones(),
                            self.config.order,
                            self.config.fest_threshold,
                        )?
                    } else {
                        None
                    };
                    SweepState::CheckStop {
                        index,
                        point: SweepPoint { ebno, ber, freq_est_error },
                    }
                }

                SweepState::CheckStop { index, point } => {
                    log::info!("{} baud: {:.1} dB, BER {:.8}", baud, point.ebno, point.ber);
                    points.push(point);
                    if point.ber < self.config.ber_stop {
                        SweepState::Done
                    } else {
                        SweepState::LoopEbNo { index: index + 1 }
                    }
                }

                SweepState::Done => break,
            };
        }

        Ok(BaudSweep {
            baud,
            points,
            doppler_warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ebno_range() {
        let range = default_ebno_range();
        assert_eq!(range.len(), 26);
        assert_eq!(range[0], 0.0);
        assert_eq!(range[9], 4.5);
        assert_eq!(range[10], 5.0);
        assert_eq!(*range.last().unwrap(), 20.0);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = SweepConfig::default();
        config.validate().unwrap();
        assert_eq!(config.estimator_upper, 23000);
        assert_eq!(config.frame_ignore, 2000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = SweepConfig { order: 3, ..Default::default() };
        assert!(config.validate().unwrap_err().is_fatal());

        config = SweepConfig { baud_rates: vec![100, 0], ..Default::default() };
        assert!(matches!(config.validate(), Err(HarnessError::ZeroBaudRate)));

        config = SweepConfig { ebno_db: vec![1.0, 3.0, 2.0], ..Default::default() };
        assert!(config.validate().is_err());

        config = SweepConfig { ebno_db: vec![], ..Default::default() };
        assert!(config.validate().is_err());

        config = SweepConfig { estimator_lower: 30000, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expected_bits() {
        let config = SweepConfig::default();
        assert_eq!(config.expected_bits(100, 123, false), 18000.0);
        // 60 s of 100 baud after Doppler truncation
        assert_eq!(config.expected_bits(100, 48000 * 60, true), 4000.0);
        // Never negative
        assert_eq!(config.expected_bits(100, 48000, true), 0.0);
    }

    #[test]
    fn test_ber_zero_bits_is_worst_case() {
        assert_eq!(compute_ber(None, 18000.0), 1.0);
        assert_eq!(
            compute_ber(Some(BitReport { bits_tested: 0, bit_errors: 0 }), 18000.0),
            1.0
        );
    }

    #[test]
    fn test_ber_penalizes_dropped_bits() {
        let report = BitReport { bits_tested: 16000, bit_errors: 16 };
        let ber = compute_ber(Some(report), 18000.0);
        assert!((ber - 2016.0 / 16000.0).abs() < 1e-12);
    }

    #[test]
    fn test_ber_trusts_excess_bits() {
        let report = BitReport { bits_tested: 20000, bit_errors: 20 };
        assert!((compute_ber(Some(report), 18000.0) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_ber_clamped_to_one() {
        let report = BitReport { bits_tested: 100, bit_errors: 90 };
        assert_eq!(compute_ber(Some(report), 18000.0), 1.0);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: SweepConfig =
            serde_json::from_str(r#"{"baud_rates": [300], "order": 2, "seed": 9}"#).unwrap();
        assert_eq!(config.baud_rates, vec![300]);
        assert_eq!(config.order, 2);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_result_json_shape() {
        let result = SweepResult {
            runs: vec![BaudSweep {
                baud: 100,
                points: vec![
                    SweepPoint { ebno: 0.0, ber: 0.25, freq_est_error: Some(0.5) },
                    SweepPoint { ebno: 0.5, ber: 1.0, freq_est_error: None },
                ],
                doppler_warning: Some(DopplerWarning::SignalTruncated {
                    original_len: 300,
                    kept_len: 200,
                }),
            }],
        };
        let value: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(value[0]["baud"], 100);
        assert_eq!(value[0]["points"][0]["freq_est_error"], 0.5);
        assert!(value[0]["points"][1].get("freq_est_error").is_none());
        assert_eq!(value[0]["doppler_warning"]["signal_truncated"]["kept_len"], 200);
        assert_eq!(result.baud(100).unwrap().points.len(), 2);
        assert!(result.baud(50).is_none());
    }
}
