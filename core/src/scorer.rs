use crate::error::{HarnessError, Result};
use crate::stats::TelemetrySeries;
use serde::{Deserialize, Serialize};

/// Transmitted tone layout: tone k sits at `base_tone + k * tone_spacing`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneLayout {
    pub base_tone: f64,
    pub tone_spacing: f64,
}

impl ToneLayout {
    pub fn new(base_tone: f64, tone_spacing: f64) -> Self {
        Self {
            base_tone,
            tone_spacing,
        }
    }

    pub fn tone_frequency(&self, index: usize) -> f64 {
        self.base_tone + index as f64 * self.tone_spacing
    }
}

/// Fraction of tone-frequency estimates that missed their true tone
///
/// An estimate counts as an error when it is more than
/// `threshold_fraction * baud_rate` Hz away from the tone it tracks. The count
/// over all tones and records is divided by `records * order`; records without
/// upper-tone estimates therefore only contribute to the denominator for tones
/// 3 and 4. Returns `None` when the series holds no records.
pub fn score_frequency_estimates(
    series: &TelemetrySeries,
    baud_rate: u32,
    layout: &ToneLayout,
    order: u32,
    threshold_fraction: f64,
) -> Result<Option<f64>> {
    if order != 2 && order != 4 {
        return Err(HarnessError::InvalidConfig(format!(
            "FSK order must be 2 or 4, got {}",
            order
        )));
    }
    if series.is_empty() {
        return Ok(None);
    }

    let threshold = threshold_fraction * baud_rate as f64;
    let errors: usize = (0..order as usize)
        .map(|tone| {
            let truth = layout.tone_frequency(tone);
            series
                .tone_series(tone)
                .iter()
                .filter(|&&estimate| (estimate - truth).abs() > threshold)
                .count()
        })
        .sum();

    let total = series.len() * order as usize;
    Ok(Some(errors as f64 / total as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: ToneLayout = ToneLayout {
        base_tone: 2000.0,
        tone_spacing: 270.0,
    };

    fn telemetry_line(tones: [f64; 4]) -> String {
        format!(
            r#"{{"EbNodB": 8.0, "ppm": 0, "f1_est": {}, "f2_est": {}, "f3_est": {}, "f4_est": {}}}"#,
            tones[0], tones[1], tones[2], tones[3]
        )
    }

    fn series_of(lines: &[String]) -> TelemetrySeries {
        TelemetrySeries::from_lines(lines, 50.0)
    }

    #[test]
    fn test_perfect_estimates_score_zero() {
        let truth = [2000.0, 2270.0, 2540.0, 2810.0];
        let lines = vec![telemetry_line(truth); 20];
        let score = score_frequency_estimates(&series_of(&lines), 100, &LAYOUT, 4, 0.2).unwrap();
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn test_estimates_on_wrong_tones_score_one() {
        // Every estimator locked onto the tone two positions away
        let swapped = [2540.0, 2810.0, 2000.0, 2270.0];
        let lines = vec![telemetry_line(swapped); 10];
        let score = score_frequency_estimates(&series_of(&lines), 100, &LAYOUT, 4, 0.2).unwrap();
        assert_eq!(score, Some(1.0));
    }

    #[test]
    fn test_threshold_scales_with_baud_rate() {
        // 15 Hz off: an error at 50 baud (10 Hz limit) but not at 100 baud (20 Hz)
        let lines = vec![telemetry_line([2015.0, 2285.0, 2555.0, 2825.0]); 4];
        let series = series_of(&lines);
        assert_eq!(score_frequency_estimates(&series, 100, &LAYOUT, 4, 0.2).unwrap(), Some(0.0));
        assert_eq!(score_frequency_estimates(&series, 50, &LAYOUT, 4, 0.2).unwrap(), Some(1.0));
    }

    #[test]
    fn test_two_tone_order_ignores_upper_tones() {
        let lines = vec![telemetry_line([2000.0, 2270.0, 9999.0, 9999.0]); 5];
        let score = score_frequency_estimates(&series_of(&lines), 100, &LAYOUT, 2, 0.2).unwrap();
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn test_partial_error_fraction() {
        let mut lines = vec![telemetry_line([2000.0, 2270.0, 2540.0, 2810.0]); 3];
        lines.push(telemetry_line([2500.0, 2270.0, 2540.0, 2810.0]));
        let score = score_frequency_estimates(&series_of(&lines), 100, &LAYOUT, 4, 0.2).unwrap();
        assert_eq!(score, Some(1.0 / 16.0));
    }

    #[test]
    fn test_missing_upper_tones_only_count_in_denominator() {
        let lines = vec![
            telemetry_line([2000.0, 2270.0, 2540.0, 2810.0]),
            r#"{"EbNodB": 1.0, "ppm": 0, "f1_est": 2000.0, "f2_est": 2270.0}"#.to_string(),
        ];
        let score = score_frequency_estimates(&series_of(&lines), 100, &LAYOUT, 4, 0.2).unwrap();
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn test_empty_series_has_no_score() {
        let series = TelemetrySeries::default();
        assert_eq!(score_frequency_estimates(&series, 100, &LAYOUT, 4, 0.2).unwrap(), None);
    }

    #[test]
    fn test_invalid_order() {
        let series = TelemetrySeries::default();
        assert!(score_frequency_estimates(&series, 100, &LAYOUT, 8, 0.2).is_err());
    }
}
