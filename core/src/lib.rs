//! Channel simulation and automated BER measurement for FSK modems
//!
//! Injects calibrated AWGN referenced to an Eb/No target, optionally emulates
//! Doppler shift, drives an external modulator/demodulator pair over a sweep of
//! baud rates and Eb/No levels, and scores the demodulator telemetry.

pub mod error;
pub mod power;
pub mod noise;
pub mod hilbert;
pub mod sample_io;
pub mod doppler;
pub mod stats;
pub mod window;
pub mod scorer;
pub mod modem;
pub mod sweep;
pub mod selftest;

pub use doppler::{apply_doppler, DopplerOutput, DopplerProfile, DopplerWarning};
pub use error::{HarnessError, Result};
pub use modem::{parse_bit_report, BitReport, Codec2Tools, Modem};
pub use noise::{generate_low_snr, inject_noise, required_variance};
pub use power::estimate_power;
pub use sample_io::{read_samples, write_samples, SampleFormat};
pub use scorer::{score_frequency_estimates, ToneLayout};
pub use stats::{TelemetryRecord, TelemetrySeries};
pub use sweep::{SweepConfig, SweepController, SweepPoint, SweepResult};
pub use window::TelemetryWindow;

pub use rustfft::num_complex::Complex32;

// Baseline campaign configuration
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_BAUD_RATES: [u32; 3] = [100, 50, 25];
pub const DEFAULT_FSK_ORDER: u32 = 4;
pub const DEFAULT_TEST_LENGTH: u64 = 20_000;
pub const DEFAULT_FRAME_LENGTH: u32 = 2000;
pub const DEFAULT_FRAME_THRESHOLD: f64 = 0.4;
pub const DEFAULT_LOW_TONE: f64 = 2000.0; // Hz
pub const DEFAULT_TONE_SPACING: f64 = 270.0; // Hz
pub const DEFAULT_ESTIMATOR_LOWER: u32 = 100; // Hz

// Early-stop and scoring
pub const DEFAULT_BER_STOP: f64 = 1e-4;
pub const DEFAULT_FEST_THRESHOLD: f64 = 0.2; // fraction of the baud rate

/// Gate below which samples are treated as silence in power estimates
pub const DEFAULT_POWER_THRESHOLD_DB: f64 = -100.0;

/// Telemetry emission rate requested from the demodulator (records per second)
pub const DEFAULT_STATS_RATE: u32 = 50;
