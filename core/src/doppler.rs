//! Doppler-shift emulation
//!
//! A persisted (time, frequency-offset) curve is interpolated with a cubic spline
//! at every sample instant, integrated into a phase ramp and used to rotate the
//! signal. The profile is never extrapolated: signals longer than the curve are
//! cut to its span.

use crate::error::{HarnessError, Result};
use crate::Complex32;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

/// Frequency-offset curve, strictly increasing in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DopplerProfile {
    /// Seconds from the start of the signal
    time: Vec<f64>,
    /// Frequency offset in Hz at each time point
    offset: Vec<f64>,
}

impl DopplerProfile {
    pub fn new(time: Vec<f64>, offset: Vec<f64>) -> Result<Self> {
        let profile = Self { time, offset };
        profile.validate()?;
        Ok(profile)
    }

    /// Load a profile stored as JSON: `{ "time": [...], "offset": [...] }`
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let profile: DopplerProfile = serde_json::from_str(&text)?;
        profile.validate()?;
        log::info!(
            "Loaded Doppler profile {} ({} points, {:.1} s)",
            path.display(),
            profile.time.len(),
            profile.span()
        );
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.time.len() != self.offset.len() {
            return Err(HarnessError::InvalidDopplerProfile(format!(
                "{} time points but {} offsets",
                self.time.len(),
                self.offset.len()
            )));
        }
        if self.time.len() < 2 {
            return Err(HarnessError::InvalidDopplerProfile(
                "at least two points are required".to_string(),
            ));
        }
        if self.time.iter().chain(self.offset.iter()).any(|v| !v.is_finite()) {
            return Err(HarnessError::InvalidDopplerProfile("non-finite value".to_string()));
        }
        if self.time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(HarnessError::InvalidDopplerProfile(
                "time must be strictly increasing".to_string(),
            ));
        }
        if self.time[0] > 0.0 {
            return Err(HarnessError::InvalidDopplerProfile(format!(
                "profile starts at {} s, after the signal start",
                self.time[0]
            )));
        }
        Ok(())
    }

    /// Time of the last recorded point
    pub fn span(&self) -> f64 {
        self.time[self.time.len() - 1]
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn offset(&self) -> &[f64] {
        &self.offset
    }
}

/// Natural cubic spline through a set of knots
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at each knot
    m: Vec<f64>,
}

impl CubicSpline {
    /// Build the spline through strictly increasing knots (at least two)
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        if x.len() != y.len() || x.len() < 2 {
            return Err(HarnessError::InvalidDopplerProfile(format!(
                "spline needs at least two matching knots, got {} x and {} y",
                x.len(),
                y.len()
            )));
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(HarnessError::InvalidDopplerProfile(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let n = x.len();
        let mut m = vec![0.0; n];

        if n > 2 {
            // Thomas algorithm on the interior rows; end moments are zero
            let interior = n - 2;
            let mut diag = vec![0.0; interior];
            let mut upper = vec![0.0; interior];
            let mut rhs = vec![0.0; interior];

            for k in 0..interior {
                let i = k + 1;
                let h_prev = x[i] - x[i - 1];
                let h_next = x[i + 1] - x[i];
                diag[k] = 2.0 * (h_prev + h_next);
                upper[k] = h_next;
                rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h_next - (y[i] - y[i - 1]) / h_prev);

                if k > 0 {
                    let factor = h_prev / diag[k - 1];
                    diag[k] -= factor * upper[k - 1];
                    rhs[k] -= factor * rhs[k - 1];
                }
            }

            for k in (0..interior).rev() {
                let next = if k + 1 < interior { m[k + 2] } else { 0.0 };
                m[k + 1] = (rhs[k] - upper[k] * next) / diag[k];
            }
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// Evaluate the spline. Points outside the knot range use the end segments.
    pub fn evaluate(&self, t: f64) -> f64 {
        let last = self.x.len() - 2;
        let i = self.x.partition_point(|&knot| knot <= t).saturating_sub(1).min(last);

        let h = self.x[i + 1] - self.x[i];
        let a = self.x[i + 1] - t;
        let b = t - self.x[i];

        self.m[i] * a.powi(3) / (6.0 * h)
            + self.m[i + 1] * b.powi(3) / (6.0 * h)
            + (self.y[i] / h - self.m[i] * h / 6.0) * a
            + (self.y[i + 1] / h - self.m[i + 1] * h / 6.0) * b
    }
}

/// Raised when a signal had to be shortened to fit its Doppler profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DopplerWarning {
    SignalTruncated { original_len: usize, kept_len: usize },
}

/// Shifted signal plus any warning raised while producing it
#[derive(Debug, Clone)]
pub struct DopplerOutput {
    pub samples: Vec<Complex32>,
    pub warning: Option<DopplerWarning>,
}

/// Rotate a complex signal by the phase ramp of a Doppler profile
///
/// Instantaneous offsets are summed per sample and divided by the sample rate,
/// so each sample advances the phase by f(n)/fs cycles.
pub fn apply_doppler(
    samples: &[Complex32],
    profile: &DopplerProfile,
    sample_rate: u32,
) -> Result<DopplerOutput> {
    if sample_rate == 0 {
        return Err(HarnessError::InvalidConfig("sample rate must be positive".to_string()));
    }
    let fs = sample_rate as f64;

    let max_len = (profile.span() * fs) as usize;
    let mut warning = None;
    let input = if samples.len() > max_len {
        log::warn!(
            "Signal of {:.1} s exceeds Doppler profile span of {:.1} s, truncating",
            samples.len() as f64 / fs,
            profile.span()
        );
        warning = Some(DopplerWarning::SignalTruncated {
            original_len: samples.len(),
            kept_len: max_len,
        });
        &samples[..max_len]
    } else {
        if samples.len() < max_len {
            log::info!(
                "Signal covers {:.1} s of the {:.1} s Doppler profile",
                samples.len() as f64 / fs,
                profile.span()
            );
        }
        samples
    };

    let spline = CubicSpline::new(&profile.time, &profile.offset)?;

    // Phase in cycles, wrapped to [0, 1) to keep precision over long runs
    let mut phase = 0.0f64;
    let shifted = input
        .iter()
        .enumerate()
        .map(|(n, &s)| {
            phase += spline.evaluate(n as f64 / fs) / fs;
            phase -= phase.floor();
            s * Complex32::from_polar(1.0, (2.0 * PI * phase) as f32)
        })
        .collect();

    Ok(DopplerOutput {
        samples: shifted,
        warning,
    })
}
