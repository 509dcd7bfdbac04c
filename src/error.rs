use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisioningError {
    #[error("Validation failed for entity '{entity}': {details}")]
    ValidationError { entity: String, details: String },

    #[error("Insufficient history for {metric}: need {required} periods, have {available}")]
    InsufficientHistory {
        metric: String,
        required: usize,
        available: usize,
    },

    #[error("Degenerate metric {metric}: {reason}")]
    DegenerateMetric { metric: String, reason: String },

    #[error("No matching {source_name} candidate for period {period} within tolerance")]
    SourceMismatch { period: String, source_name: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid model artifact: {0}")]
    ModelArtifact(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Entity '{0}' already has an active pipeline run")]
    EntityBusy(String),

    #[error("Pipeline stage {stage} failed: {details}")]
    StageFailed { stage: String, details: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecisioningError {
    /// Fatal errors abort the caller's operation. Everything else is absorbed by
    /// the component that raised it and replaced with a tagged fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ValidationError { .. }
                | Self::InvalidConfig(_)
                | Self::EntityBusy(_)
                | Self::ModelArtifact(_)
                | Self::SerializationError(_)
                | Self::IoError(_)
        )
    }

    pub(crate) fn validation(entity: &str, details: impl Into<String>) -> Self {
        Self::ValidationError {
            entity: entity.to_string(),
            details: details.into(),
        }
    }

    pub(crate) fn degenerate(metric: &str, reason: impl Into<String>) -> Self {
        Self::DegenerateMetric {
            metric: metric.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecisioningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DecisioningError::validation("e1", "no monthly data").is_fatal());
        assert!(DecisioningError::InvalidConfig("bad".into()).is_fatal());
        assert!(!DecisioningError::degenerate("cv", "mean is zero").is_fatal());
        assert!(!DecisioningError::ModelUnavailable("disabled".into()).is_fatal());
        assert!(!DecisioningError::InsufficientHistory {
            metric: "cagr".into(),
            required: 24,
            available: 6
        }
        .is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = DecisioningError::SourceMismatch {
            period: "2024-03".into(),
            source_name: "bank ledger".into(),
        };
        assert_eq!(
            err.to_string(),
            "No matching bank ledger candidate for period 2024-03 within tolerance"
        );
    }
}
