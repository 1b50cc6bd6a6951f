use thiserror::Error;

/// Diagnostics produced while evaluating features and experiments.
///
/// Evaluation never fails: every problem below is recovered locally (usually by treating the
/// offending clause as a non-match) and recorded on the engine's ledger, where the host can
/// drain it with `GrowthBook::take_warnings`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalWarning {
    #[error("experiment {0} has fewer than two variations")]
    InvalidExperiment(String),
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),
    #[error("unknown operator: {0}")]
    UnknownOperator(String),
    #[error("malformed condition: {0}")]
    MalformedCondition(String),
    #[error("forced variation {index} for experiment {key} is out of range")]
    InvalidForcedVariation { key: String, index: i64 },
    #[error("include predicate for experiment {key} failed: {reason}")]
    IncludeFailed { key: String, reason: String },
    #[error("tracking callback for experiment {key} failed: {reason}")]
    TrackingFailed { key: String, reason: String },
    #[error("feature usage callback for {key} failed: {reason}")]
    FeatureUsageFailed { key: String, reason: String },
    #[error("subscriber for experiment {key} failed: {reason}")]
    SubscriberFailed { key: String, reason: String },
    #[error("value of feature {0} does not match the requested type")]
    ValueTypeMismatch(String),
}

#[derive(Error, Debug)]
pub enum RuleSetError {
    #[error("failed to read rule set: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse rule set: {0}")]
    Parse(#[from] serde_json::Error),
}
