use std::borrow::Cow;

use serde_json::Value;
use tracing::debug;

use crate::bucketing::{choose_variation, get_bucket_ranges, hash, in_namespace};
use crate::errors::EvalWarning;
use crate::growthbook::GrowthBook;
use crate::models::{Experiment, ExperimentResult, ExperimentStatus};
use crate::url_matching::{get_query_string_override, is_url_targeted, url_matches_regex};

impl GrowthBook {
    /// Assigns the current user to a variation of `experiment`.
    ///
    /// Never fails: any reason the user cannot be bucketed yields a result with
    /// `in_experiment == false` and the first variation's value. Subscribers are notified
    /// when the assignment for this experiment key changes.
    pub fn run(&mut self, experiment: &Experiment) -> ExperimentResult {
        let result = self.run_experiment(experiment, None);
        self.fire_subscriptions(experiment, &result);
        result
    }

    pub(crate) fn run_experiment(
        &mut self,
        experiment: &Experiment,
        feature_id: Option<&str>,
    ) -> ExperimentResult {
        let key = experiment.key.as_str();
        let num_variations = experiment.variations.len();

        if num_variations < 2 {
            self.ledger
                .warn(EvalWarning::InvalidExperiment(key.to_string()));
            return self.excluded(experiment, feature_id, "fewer than two variations");
        }

        if !self.context.enabled {
            return self.excluded(experiment, feature_id, "engine disabled");
        }

        let experiment = self.merge_overrides(experiment);

        if let Some(index) = get_query_string_override(key, &self.context.url, num_variations) {
            debug!(experiment = %key, variation_id = index, "Variation forced by url");
            return self.get_result(&experiment, Some(index), false, feature_id, None);
        }

        if let Some(&forced) = self.context.forced_variations.get(key) {
            match usize::try_from(forced).ok().filter(|i| *i < num_variations) {
                Some(index) => {
                    debug!(experiment = %key, variation_id = index, "Variation forced by context");
                    return self.get_result(&experiment, Some(index), false, feature_id, None);
                }
                None => self.ledger.warn(EvalWarning::InvalidForcedVariation {
                    key: key.to_string(),
                    index: forced,
                }),
            }
        }

        if experiment.status == Some(ExperimentStatus::Draft) || experiment.active == Some(false) {
            return self.excluded(&experiment, feature_id, "experiment inactive");
        }

        let hash_value = self.hash_value(experiment.hash_attribute.as_deref());
        if hash_value.is_empty() {
            return self.excluded(&experiment, feature_id, "missing hash attribute");
        }

        if let Some(filters) = &experiment.filters {
            if self.is_filtered_out(filters) {
                return self.excluded(&experiment, feature_id, "filtered out");
            }
        } else if let Some(namespace) = &experiment.namespace {
            if !in_namespace(&hash_value, namespace) {
                return self.excluded(&experiment, feature_id, "outside namespace");
            }
        }

        if let Some(include) = &experiment.include {
            match include.evaluate() {
                Ok(true) => {}
                Ok(false) => return self.excluded(&experiment, feature_id, "include returned false"),
                Err(e) => {
                    self.ledger.warn(EvalWarning::IncludeFailed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    });
                    return self.excluded(&experiment, feature_id, "include failed");
                }
            }
        }

        if let Some(condition) = &experiment.condition {
            if !self.condition_passes(condition) {
                return self.excluded(&experiment, feature_id, "condition failed");
            }
        }

        if let Some(groups) = &experiment.groups {
            if !self.has_group_overlap(groups) {
                return self.excluded(&experiment, feature_id, "not in any group");
            }
        }

        if let Some(pattern) = &experiment.url {
            if !url_matches_regex(pattern, &self.context.url) {
                return self.excluded(&experiment, feature_id, "url not matched");
            }
        }

        if let Some(targets) = &experiment.url_patterns {
            if !is_url_targeted(&self.context.url, targets) {
                return self.excluded(&experiment, feature_id, "url not targeted");
            }
        }

        let seed = experiment
            .seed
            .as_deref()
            .filter(|seed| !seed.is_empty())
            .unwrap_or(key);
        let hash_version = experiment.hash_version.filter(|v| *v != 0).unwrap_or(1);
        let Some(n) = hash(seed, &hash_value, hash_version) else {
            return self.excluded(&experiment, feature_id, "unsupported hash version");
        };

        let ranges = match &experiment.ranges {
            Some(ranges) => ranges.clone(),
            None => get_bucket_ranges(
                num_variations,
                experiment.coverage.unwrap_or(1.0),
                experiment.weights.as_deref(),
            ),
        };
        let Some(assigned) = choose_variation(n, &ranges) else {
            return self.excluded(&experiment, feature_id, "outside coverage");
        };

        if let Some(force) = experiment.force {
            debug!(experiment = %key, force, "Variation forced by experiment");
            let index = usize::try_from(force).ok();
            return self.get_result(&experiment, index, false, feature_id, None);
        }

        if self.context.qa_mode {
            return self.excluded(&experiment, feature_id, "qa mode");
        }

        if experiment.status == Some(ExperimentStatus::Stopped) {
            return self.excluded(&experiment, feature_id, "experiment stopped");
        }

        let result = self.get_result(&experiment, Some(assigned), true, feature_id, Some(n));
        self.track(&experiment, &result);
        result
    }

    fn merge_overrides<'a>(&self, experiment: &'a Experiment) -> Cow<'a, Experiment> {
        match self.context.overrides.get(&experiment.key) {
            Some(overrides) => {
                let mut merged = experiment.clone();
                overrides.apply(&mut merged);
                Cow::Owned(merged)
            }
            None => Cow::Borrowed(experiment),
        }
    }

    fn excluded(
        &self,
        experiment: &Experiment,
        feature_id: Option<&str>,
        reason: &'static str,
    ) -> ExperimentResult {
        debug!(experiment = %experiment.key, reason, "User not in experiment");
        self.get_result(experiment, None, false, feature_id, None)
    }

    /// Builds the result for `variation`. Anything outside the variation list falls back to
    /// the first variation with `in_experiment == false`.
    pub(crate) fn get_result(
        &self,
        experiment: &Experiment,
        variation: Option<usize>,
        hash_used: bool,
        feature_id: Option<&str>,
        bucket: Option<f64>,
    ) -> ExperimentResult {
        let (variation_id, in_experiment) = match variation {
            Some(index) if index < experiment.variations.len() => (index, true),
            _ => (0, false),
        };
        let (hash_attribute, hash_value) =
            self.hash_attribute(experiment.hash_attribute.as_deref());
        let meta = experiment
            .meta
            .as_ref()
            .and_then(|meta| meta.get(variation_id));

        ExperimentResult {
            key: meta
                .and_then(|m| m.key.clone())
                .unwrap_or_else(|| variation_id.to_string()),
            feature_id: feature_id.map(str::to_string),
            in_experiment,
            hash_used,
            variation_id,
            value: experiment
                .variations
                .get(variation_id)
                .cloned()
                .unwrap_or(Value::Null),
            hash_attribute,
            hash_value,
            name: meta.and_then(|m| m.name.clone()),
            bucket,
            passthrough: meta.and_then(|m| m.passthrough),
        }
    }
}
