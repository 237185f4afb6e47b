//! Demodulator telemetry parsing
//!
//! `fsk_demod --stats` writes one JSON object per telemetry tick to its side
//! channel, interleaved with plain log lines. Only lines that open a JSON object
//! are considered and anything that fails to parse (including a truncated final
//! line) is dropped.

use crate::error::Result;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One telemetry tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    /// Demodulator's own Eb/No estimate in dB
    pub ebno_db: f64,
    /// Tone frequency estimates in Hz; the 3rd and 4th are NaN unless both were reported
    pub tone_estimates: [f64; 4],
    /// Sample clock offset in ppm
    pub ppm: f64,
}

impl TelemetryRecord {
    /// True when the record carries a full 4-tone estimate set
    pub fn has_upper_tones(&self) -> bool {
        !self.tone_estimates[2].is_nan() && !self.tone_estimates[3].is_nan()
    }
}

#[derive(Deserialize)]
struct RawTelemetry {
    #[serde(rename = "EbNodB")]
    ebno_db: f64,
    f1_est: f64,
    f2_est: f64,
    f3_est: Option<f64>,
    f4_est: Option<f64>,
    ppm: f64,
}

impl From<RawTelemetry> for TelemetryRecord {
    fn from(raw: RawTelemetry) -> Self {
        // Partial upper tone sets are treated as 2-tone
        let (f3, f4) = match (raw.f3_est, raw.f4_est) {
            (Some(f3), Some(f4)) => (f3, f4),
            _ => (f64::NAN, f64::NAN),
        };
        Self {
            ebno_db: raw.ebno_db,
            tone_estimates: [raw.f1_est, raw.f2_est, f3, f4],
            ppm: raw.ppm,
        }
    }
}

/// Parse a single telemetry line
///
/// Returns `None` for log noise, malformed JSON and objects missing a required
/// field. Callers discard the `None`s.
pub fn parse_line(line: &str) -> Option<TelemetryRecord> {
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str::<RawTelemetry>(line).ok().map(TelemetryRecord::from)
}

/// Telemetry of one demodulator run on a nominal time axis
#[derive(Debug, Clone, Default)]
pub struct TelemetrySeries {
    records: Vec<TelemetryRecord>,
    time: Vec<f64>,
}

impl TelemetrySeries {
    /// Build a series from text lines
    ///
    /// Record `i` is stamped `i / samples_per_second`, independent of when it
    /// was actually emitted.
    pub fn from_lines<I, S>(lines: I, samples_per_second: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records: Vec<TelemetryRecord> = lines
            .into_iter()
            .filter_map(|line| parse_line(line.as_ref()))
            .collect();

        let time = (0..records.len())
            .map(|i| i as f64 / samples_per_second)
            .collect();

        Self { records, time }
    }

    /// Read a telemetry stream. Invalid UTF-8 is replaced rather than rejected.
    pub fn from_reader<R: BufRead>(reader: R, samples_per_second: f64) -> Result<Self> {
        let mut lines = Vec::new();
        for chunk in reader.split(b'\n') {
            lines.push(String::from_utf8_lossy(&chunk?).into_owned());
        }
        Ok(Self::from_lines(lines, samples_per_second))
    }

    /// Read a telemetry file written by the demodulator
    pub fn load(path: &Path, samples_per_second: f64) -> Result<Self> {
        let file = File::open(path)?;
        let series = Self::from_reader(BufReader::new(file), samples_per_second)?;
        log::debug!("Parsed {} telemetry records from {}", series.len(), path.display());
        Ok(series)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Nominal timestamps in seconds
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn ebno_series(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ebno_db).collect()
    }

    pub fn ppm_series(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.ppm).collect()
    }

    /// Estimates for tone `index` (0-based)
    ///
    /// Tones 3 and 4 only include records that reported both, so for 4-ary runs
    /// these series may be shorter than the others.
    pub fn tone_series(&self, index: usize) -> Vec<f64> {
        self.records
            .iter()
            .filter(|r| index < 2 || r.has_upper_tones())
            .map(|r| r.tone_estimates[index])
            .collect()
    }

    pub fn mean_ebno(&self) -> Option<f64> {
        mean(self.records.iter().map(|r| r.ebno_db))
    }

    pub fn mean_ppm(&self) -> Option<f64> {
        mean(self.records.iter().map(|r| r.ppm))
    }
}

pub(crate) fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
