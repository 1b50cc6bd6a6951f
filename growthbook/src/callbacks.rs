use std::fmt;
use std::sync::Arc;

use crate::models::{Experiment, ExperimentResult, FeatureResult};

/// Receives one call per unique `(hash attribute, hash value, experiment, variation)` the
/// engine assigns. Typically forwards an "experiment viewed" event to an analytics pipeline.
/// Any `Fn(&Experiment, &ExperimentResult) -> anyhow::Result<()>` closure implements it.
pub trait TrackingCallback: Send + Sync {
    fn track(&self, experiment: &Experiment, result: &ExperimentResult) -> anyhow::Result<()>;
}

impl<F> TrackingCallback for F
where
    F: Fn(&Experiment, &ExperimentResult) -> anyhow::Result<()> + Send + Sync,
{
    fn track(&self, experiment: &Experiment, result: &ExperimentResult) -> anyhow::Result<()> {
        self(experiment, result)
    }
}

/// Receives the first evaluation of each feature, and every later evaluation whose value
/// differs from the last one reported.
pub trait FeatureUsageCallback: Send + Sync {
    fn on_feature_usage(&self, key: &str, result: &FeatureResult) -> anyhow::Result<()>;
}

impl<F> FeatureUsageCallback for F
where
    F: Fn(&str, &FeatureResult) -> anyhow::Result<()> + Send + Sync,
{
    fn on_feature_usage(&self, key: &str, result: &FeatureResult) -> anyhow::Result<()> {
        self(key, result)
    }
}

/// Notified whenever the assignment recorded for an experiment key changes.
pub trait SubscriptionCallback: Send + Sync {
    fn on_assignment(&self, experiment: &Experiment, result: &ExperimentResult)
        -> anyhow::Result<()>;
}

impl<F> SubscriptionCallback for F
where
    F: Fn(&Experiment, &ExperimentResult) -> anyhow::Result<()> + Send + Sync,
{
    fn on_assignment(
        &self,
        experiment: &Experiment,
        result: &ExperimentResult,
    ) -> anyhow::Result<()> {
        self(experiment, result)
    }
}

/// Host-side gate evaluated before an experiment runs. `Ok(false)` and `Err(_)` both keep
/// the user out of the experiment.
#[derive(Clone)]
pub struct IncludePredicate(Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>);

impl IncludePredicate {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn() -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        IncludePredicate(Arc::new(predicate))
    }

    pub fn evaluate(&self) -> anyhow::Result<bool> {
        (self.0)()
    }
}

impl fmt::Debug for IncludePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IncludePredicate")
    }
}
