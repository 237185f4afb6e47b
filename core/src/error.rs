use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Baud rate must be positive")]
    ZeroBaudRate,

    #[error("Bits per symbol must be positive")]
    ZeroBitsPerSymbol,

    #[error("No samples above the {threshold_db} dB power threshold")]
    NoSamplesAboveThreshold { threshold_db: f64 },

    #[error("Empty sample buffer")]
    EmptySamples,

    #[error("Invalid Doppler profile: {0}")]
    InvalidDopplerProfile(String),

    #[error("{tool} failed: {reason}")]
    ToolFailure { tool: String, reason: String },

    #[error("{tool} timed out after {secs} s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Configuration problems abort a whole sweep; everything else only
    /// degrades the measurement point it happened on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::InvalidConfig(_)
                | HarnessError::ZeroBaudRate
                | HarnessError::ZeroBitsPerSymbol
                | HarnessError::NoSamplesAboveThreshold { .. }
                | HarnessError::InvalidDopplerProfile(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(HarnessError::ZeroBaudRate.is_fatal());
        assert!(HarnessError::NoSamplesAboveThreshold { threshold_db: -100.0 }.is_fatal());
        assert!(!HarnessError::ToolTimeout { tool: "fsk_demod".into(), secs: 5 }.is_fatal());
        assert!(!HarnessError::ToolFailure {
            tool: "fsk_mod".into(),
            reason: "exit status 1".into()
        }
        .is_fatal());
    }
}
