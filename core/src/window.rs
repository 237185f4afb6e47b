//! Fixed-capacity history of live telemetry

use crate::stats::{mean, TelemetryRecord};

const EMPTY_RECORD: TelemetryRecord = TelemetryRecord {
    ebno_db: f64::NAN,
    tone_estimates: [f64::NAN; 4],
    ppm: f64::NAN,
};

/// Ring buffer of the most recent telemetry records.
/// Storage is allocated once; pushing into a full window evicts the oldest record.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    buffer: Vec<TelemetryRecord>,
    /// Next slot to write
    head: usize,
    /// Number of valid records (0 to capacity)
    len: usize,
}

/// Rolling view over a telemetry window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub count: usize,
    pub mean_ebno_db: f64,
    pub mean_ppm: f64,
    pub latest_tones: [f64; 4],
}

impl TelemetryWindow {
    /// Create a window holding up to `capacity` records (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![EMPTY_RECORD; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// Append a record, returning the one evicted if the window was full
    pub fn push(&mut self, record: TelemetryRecord) -> Option<TelemetryRecord> {
        let evicted = if self.len == self.buffer.len() {
            Some(self.buffer[self.head])
        } else {
            self.len += 1;
            None
        };
        self.buffer[self.head] = record;
        self.head = (self.head + 1) % self.buffer.len();
        evicted
    }

    /// Iterate oldest to newest without allocating
    pub fn iter_ordered(&self) -> impl Iterator<Item = &TelemetryRecord> {
        let (first, second) = if self.len < self.buffer.len() {
            (&self.buffer[..self.len], &[][..])
        } else {
            (&self.buffer[self.head..], &self.buffer[..self.head])
        };
        first.iter().chain(second.iter())
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.buffer.len() - 1) % self.buffer.len();
        Some(&self.buffer[idx])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn summary(&self) -> Option<WindowSummary> {
        let latest = self.latest()?;
        Some(WindowSummary {
            count: self.len,
            mean_ebno_db: mean(self.iter_ordered().map(|r| r.ebno_db))?,
            mean_ppm: mean(self.iter_ordered().map(|r| r.ppm))?,
            latest_tones: latest.tone_estimates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ebno: f64) -> TelemetryRecord {
        TelemetryRecord {
            ebno_db: ebno,
            tone_estimates: [1000.0 + ebno, 1270.0, f64::NAN, f64::NAN],
            ppm: ebno * 2.0,
        }
    }

    #[test]
    fn test_push_until_full_then_evict() {
        let mut window = TelemetryWindow::new(3);
        assert!(window.is_empty());
        assert_eq!(window.push(record(1.0)), None);
        assert_eq!(window.push(record(2.0)), None);
        assert_eq!(window.push(record(3.0)), None);
        assert_eq!(window.len(), 3);

        let evicted = window.push(record(4.0)).unwrap();
        assert_eq!(evicted.ebno_db, 1.0);
        assert_eq!(window.len(), 3);

        let order: Vec<f64> = window.iter_ordered().map(|r| r.ebno_db).collect();
        assert_eq!(order, vec![2.0, 3.0, 4.0]);
        assert_eq!(window.latest().unwrap().ebno_db, 4.0);
    }

    #[test]
    fn test_summary() {
        let mut window = TelemetryWindow::new(2);
        assert!(window.summary().is_none());

        for ebno in [1.0, 3.0, 5.0] {
            window.push(record(ebno));
        }
        let summary = window.summary().unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.mean_ebno_db, 4.0);
        assert_eq!(summary.mean_ppm, 8.0);
        assert_eq!(summary.latest_tones[0], 1005.0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut window = TelemetryWindow::new(0);
        assert_eq!(window.capacity(), 1);
        window.push(record(1.0));
        assert_eq!(window.push(record(2.0)).unwrap().ebno_db, 1.0);
    }

    #[test]
    fn test_clear() {
        let mut window = TelemetryWindow::new(4);
        window.push(record(1.0));
        window.clear();
        assert!(window.is_empty());
        assert!(window.latest().is_none());
    }
}
