use thiserror::Error;

/// Failure taxonomy for one prediction request.
///
/// Only [`PredictError::DataUnavailable`] ever reaches a caller of
/// `PredictionEngine::predict`. The other variants describe conditions that
/// are absorbed on the way up (a lower quality score, a zeroed factor) and
/// exist so those paths can log a typed value instead of a bare string.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictError {
    /// No market spread could be resolved, so no adjustment is computable.
    #[error("no market line for {away} @ {home} (week {week})")]
    DataUnavailable {
        home: String,
        away: String,
        week: u32,
    },

    /// One or more context fields fell back to neutral defaults.
    #[error("context degraded, defaulted fields: {}", fields.join(", "))]
    SourceDegraded { fields: Vec<String> },

    /// A factor calculator failed and was converted to a neutral result.
    #[error("factor '{factor}' failed: {reason}")]
    FactorFailure { factor: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PredictError>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PredictError::DataUnavailable {
            home: "Georgia".into(),
            away: "Auburn".into(),
            week: 6,
        };
        assert_eq!(err.to_string(), "no market line for Auburn @ Georgia (week 6)");

        let err = PredictError::SourceDegraded {
            fields: vec!["home.stats".into(), "matchup".into()],
        };
        assert_eq!(
            err.to_string(),
            "context degraded, defaulted fields: home.stats, matchup"
        );
    }
}
