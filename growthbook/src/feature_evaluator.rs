use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::bucketing::{hash, in_range};
use crate::errors::EvalWarning;
use crate::growthbook::GrowthBook;
use crate::models::{FeatureResult, FeatureSource, VariationRange};

impl GrowthBook {
    /// Resolves the value of feature `key` for the current user.
    ///
    /// Precedence: a forced value from the context, then the first matching rule in order,
    /// then the feature's default. Unknown keys resolve to `null` with source
    /// [`FeatureSource::UnknownFeature`].
    pub fn eval_feature(&mut self, key: &str) -> FeatureResult {
        if let Some(value) = self.context.forced_features.get(key) {
            debug!(feature = %key, "Feature value forced by context");
            let result = FeatureResult::new(value.clone(), FeatureSource::Override, "");
            return self.feature_result(key, result);
        }

        let features = Arc::clone(&self.context.features);
        let Some(feature) = features.get(key) else {
            debug!(feature = %key, "Unknown feature");
            let result = FeatureResult::new(Value::Null, FeatureSource::UnknownFeature, "");
            return self.feature_result(key, result);
        };

        for rule in &feature.rules {
            if let Some(condition) = &rule.condition {
                if !self.condition_passes(condition) {
                    debug!(feature = %key, rule = %rule.id, "Skipping rule, condition failed");
                    continue;
                }
            }

            if let Some(filters) = &rule.filters {
                if self.is_filtered_out(filters) {
                    debug!(feature = %key, rule = %rule.id, "Skipping rule, filtered out");
                    continue;
                }
            }

            if let Some(force) = &rule.force {
                let seed = rule
                    .seed
                    .as_deref()
                    .filter(|seed| !seed.is_empty())
                    .unwrap_or(key);
                if !self.is_included_in_rollout(
                    seed,
                    rule.hash_attribute.as_deref(),
                    rule.range.as_ref(),
                    rule.coverage,
                    rule.hash_version,
                ) {
                    debug!(feature = %key, rule = %rule.id, "Skipping rule, outside rollout");
                    continue;
                }

                if let Some(tracks) = &rule.tracks {
                    for track in tracks {
                        self.track(&track.experiment, &track.result);
                    }
                }

                let result = FeatureResult::new(force.clone(), FeatureSource::Force, &rule.id);
                return self.feature_result(key, result);
            }

            let Some(experiment) = rule.to_experiment(key) else {
                continue;
            };

            let experiment_result = self.run_experiment(&experiment, Some(key));
            self.fire_subscriptions(&experiment, &experiment_result);

            if experiment_result.in_experiment && !experiment_result.passthrough.unwrap_or(false) {
                let result = FeatureResult::new(
                    experiment_result.value.clone(),
                    FeatureSource::Experiment,
                    &rule.id,
                )
                .with_experiment(experiment, experiment_result);
                return self.feature_result(key, result);
            }
        }

        let result = FeatureResult::new(
            feature.default_value.clone(),
            FeatureSource::DefaultValue,
            "",
        );
        self.feature_result(key, result)
    }

    pub fn is_on(&mut self, key: &str) -> bool {
        self.eval_feature(key).on
    }

    pub fn is_off(&mut self, key: &str) -> bool {
        self.eval_feature(key).off
    }

    /// Returns the feature value decoded as `T`, or `fallback` when the value is `null` or
    /// does not decode.
    pub fn get_feature_value<T: DeserializeOwned>(&mut self, key: &str, fallback: T) -> T {
        let value = self.eval_feature(key).value;
        if value.is_null() {
            return fallback;
        }
        match serde_json::from_value(value) {
            Ok(value) => value,
            Err(_) => {
                self.ledger
                    .warn(EvalWarning::ValueTypeMismatch(key.to_string()));
                fallback
            }
        }
    }

    /// Force rules without a range or coverage apply to everyone. Otherwise the user needs a
    /// hash value and a hash inside `range`, or at most `coverage` when there is no range.
    pub(crate) fn is_included_in_rollout(
        &self,
        seed: &str,
        hash_attribute: Option<&str>,
        range: Option<&VariationRange>,
        coverage: Option<f64>,
        hash_version: Option<u32>,
    ) -> bool {
        if range.is_none() && coverage.is_none() {
            return true;
        }

        let hash_value = self.hash_value(hash_attribute);
        if hash_value.is_empty() {
            return false;
        }

        let Some(n) = hash(seed, &hash_value, hash_version.filter(|v| *v != 0).unwrap_or(1))
        else {
            return false;
        };

        match (range, coverage) {
            (Some(range), _) => in_range(n, range),
            (None, Some(coverage)) => n <= coverage,
            (None, None) => true,
        }
    }

    fn feature_result(&mut self, key: &str, result: FeatureResult) -> FeatureResult {
        debug!(
            feature = %key,
            source = %result.source,
            rule = %result.rule_id,
            "Feature evaluated"
        );
        self.track_feature_usage(key, &result);
        result
    }

    fn track_feature_usage(&mut self, key: &str, result: &FeatureResult) {
        if result.source == FeatureSource::Override {
            return;
        }
        if !self.ledger.mark_feature_tracked(key, result.value.to_string()) {
            return;
        }
        let Some(callback) = self.context.on_feature_usage.clone() else {
            return;
        };
        if let Err(e) = callback.on_feature_usage(key, result) {
            self.ledger.warn(EvalWarning::FeatureUsageFailed {
                key: key.to_string(),
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::models::RuleSet;
    use crate::test_utils::{attributes, engine_with_features, RecordingTracker};
    use assert_json_diff::assert_json_include;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use test_case::test_case;

    fn checkout_features() -> Value {
        json!({
            "checkout-v2": {
                "defaultValue": false,
                "rules": [{"id": "r1", "condition": {"country": "US"}, "force": true}]
            }
        })
    }

    #[test]
    fn test_force_rule_matches() {
        let mut gb = engine_with_features(checkout_features(), json!({"id": "1", "country": "US"}));
        let result = gb.eval_feature("checkout-v2");
        assert_json_include!(
            actual: serde_json::to_value(&result).unwrap(),
            expected: json!({"value": true, "on": true, "off": false, "source": "force", "ruleId": "r1"})
        );
    }

    #[test]
    fn test_falls_back_to_default() {
        let mut gb = engine_with_features(checkout_features(), json!({"id": "1", "country": "DE"}));
        let result = gb.eval_feature("checkout-v2");
        assert_eq!(result.value, json!(false));
        assert_eq!(result.source, FeatureSource::DefaultValue);
        assert_eq!(result.rule_id, "");
        assert!(result.off);
    }

    #[test]
    fn test_unknown_feature() {
        let mut gb = engine_with_features(checkout_features(), json!({}));
        let result = gb.eval_feature("missing");
        assert_eq!(result.value, Value::Null);
        assert_eq!(result.source, FeatureSource::UnknownFeature);
        assert!(result.off);
    }

    #[test]
    fn test_forced_feature_beats_rules() {
        let mut gb = engine_with_features(checkout_features(), json!({"country": "US"}));
        gb.set_forced_features(HashMap::from([("checkout-v2".to_string(), json!("forced"))]));
        let result = gb.eval_feature("checkout-v2");
        assert_eq!(result.value, json!("forced"));
        assert_eq!(result.source, FeatureSource::Override);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut gb = engine_with_features(
            json!({
                "color": {
                    "defaultValue": "blue",
                    "rules": [
                        {"id": "a", "condition": {"tier": "gold"}, "force": "gold"},
                        {"id": "b", "condition": {"country": "US"}, "force": "red"},
                        {"id": "c", "force": "green"}
                    ]
                }
            }),
            json!({"country": "US", "tier": "silver"}),
        );
        let result = gb.eval_feature("color");
        assert_eq!(result.value, json!("red"));
        assert_eq!(result.rule_id, "b");
    }

    #[test]
    fn test_force_null_is_a_value() {
        let mut gb = engine_with_features(
            json!({"flag": {"defaultValue": true, "rules": [{"id": "n", "force": null}]}}),
            json!({}),
        );
        let result = gb.eval_feature("flag");
        assert_eq!(result.value, Value::Null);
        assert_eq!(result.source, FeatureSource::Force);
    }

    // hash("rollout-flag", id, 1): "1" 0.838, "2" 0.679, "3" 0.2, "4" 0.121, "5" 0.17
    #[test_case("1" => false; "0.838 outside")]
    #[test_case("2" => false; "0.679 outside")]
    #[test_case("3" => true; "0.2 inside")]
    #[test_case("4" => true; "0.121 inside")]
    #[test_case("" => false; "no hash value")]
    fn test_coverage_rollout(id: &str) -> bool {
        let mut gb = engine_with_features(
            json!({
                "rollout-flag": {
                    "defaultValue": false,
                    "rules": [{"id": "roll", "force": true, "coverage": 0.5}]
                }
            }),
            json!({ "id": id }),
        );
        gb.is_on("rollout-flag")
    }

    #[test_case("1" => true; "0.838 inside")]
    #[test_case("3" => false; "0.2 outside")]
    fn test_range_rollout(id: &str) -> bool {
        let mut gb = engine_with_features(
            json!({
                "rollout-flag": {
                    "defaultValue": false,
                    "rules": [{"id": "roll", "force": true, "range": [0.5, 1.0], "coverage": 0.1}]
                }
            }),
            json!({ "id": id }),
        );
        gb.is_on("rollout-flag")
    }

    // hash("checkout-v2", id, 1): "1" 0.891, "2" 0.292
    #[test]
    fn test_experiment_rule() {
        let features = json!({
            "checkout-v2": {
                "defaultValue": "none",
                "rules": [{"id": "exp", "variations": ["control", "treatment"]}]
            }
        });

        let mut gb = engine_with_features(features.clone(), json!({"id": "1"}));
        let result = gb.eval_feature("checkout-v2");
        assert_eq!(result.value, json!("treatment"));
        assert_eq!(result.source, FeatureSource::Experiment);
        assert_eq!(result.rule_id, "exp");
        let experiment_result = result.experiment_result.expect("experiment result");
        assert_eq!(experiment_result.feature_id.as_deref(), Some("checkout-v2"));
        assert_eq!(result.experiment.map(|e| e.key), Some("checkout-v2".to_string()));

        let mut gb = engine_with_features(features, json!({"id": "2"}));
        assert_eq!(gb.eval_feature("checkout-v2").value, json!("control"));
    }

    #[test]
    fn test_experiment_rule_falls_through_when_not_bucketed() {
        let mut gb = engine_with_features(
            json!({
                "checkout-v2": {
                    "defaultValue": "none",
                    "rules": [
                        {"id": "exp", "variations": ["control", "treatment"], "coverage": 0.5},
                        {"id": "fallback", "force": "fallback"}
                    ]
                }
            }),
            json!({"id": "1"}),
        );
        let result = gb.eval_feature("checkout-v2");
        assert_eq!(result.value, json!("fallback"));
        assert_eq!(result.rule_id, "fallback");
    }

    #[test]
    fn test_passthrough_variation_falls_through() {
        let mut gb = engine_with_features(
            json!({
                "checkout-v2": {
                    "defaultValue": "none",
                    "rules": [{
                        "id": "exp",
                        "variations": ["control", "treatment"],
                        "meta": [{"key": "c"}, {"key": "t", "passthrough": true}]
                    }]
                }
            }),
            json!({"id": "1"}),
        );
        let result = gb.eval_feature("checkout-v2");
        assert_eq!(result.value, json!("none"));
        assert_eq!(result.source, FeatureSource::DefaultValue);
    }

    #[test]
    fn test_force_rule_replays_tracks() -> anyhow::Result<()> {
        let tracker = Arc::new(RecordingTracker::default());
        let rule_set: RuleSet = serde_json::from_value(json!({
            "features": {
                "flag": {
                    "defaultValue": 0,
                    "rules": [{
                        "id": "r",
                        "force": 1,
                        "tracks": [{
                            "experiment": {"key": "holdout", "variations": [0, 1]},
                            "result": {
                                "key": "1",
                                "inExperiment": true,
                                "hashUsed": true,
                                "variationId": 1,
                                "value": 1,
                                "hashAttribute": "id",
                                "hashValue": "1"
                            }
                        }]
                    }]
                }
            }
        }))?;
        let context = Context::new()
            .with_rule_set(rule_set)
            .with_attributes(attributes(json!({"id": "1"})))
            .with_tracking_callback(tracker.clone());
        let mut gb = GrowthBook::new(context);

        gb.eval_feature("flag");
        gb.eval_feature("flag");
        assert_eq!(tracker.calls(), vec![("holdout".to_string(), 1)]);
        Ok(())
    }

    #[test]
    fn test_feature_usage_reported_on_change() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let context = Context::new()
            .with_attributes(attributes(json!({"country": "US"})))
            .with_features(serde_json::from_value(checkout_features()).unwrap())
            .with_feature_usage_callback(Arc::new(
                move |key: &str, result: &FeatureResult| -> anyhow::Result<()> {
                    sink.lock()
                        .unwrap()
                        .push((key.to_string(), result.value.clone()));
                    Ok(())
                },
            ));
        let mut gb = GrowthBook::new(context);

        gb.eval_feature("checkout-v2");
        gb.eval_feature("checkout-v2");
        gb.set_attributes(attributes(json!({"country": "DE"})));
        gb.eval_feature("checkout-v2");
        gb.set_forced_features(HashMap::from([("checkout-v2".to_string(), json!(1))]));
        gb.eval_feature("checkout-v2");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("checkout-v2".to_string(), json!(true)),
                ("checkout-v2".to_string(), json!(false)),
            ]
        );
    }

    #[test]
    fn test_feature_usage_failure_becomes_warning() {
        let context = Context::new()
            .with_feature_usage_callback(Arc::new(
                |_: &str, _: &FeatureResult| -> anyhow::Result<()> { Err(anyhow::anyhow!("down")) },
            ));
        let mut gb = GrowthBook::new(context);
        gb.eval_feature("anything");
        assert_eq!(
            gb.take_warnings(),
            vec![EvalWarning::FeatureUsageFailed {
                key: "anything".to_string(),
                reason: "down".to_string(),
            }]
        );
    }

    #[test]
    fn test_get_feature_value() {
        let mut gb = engine_with_features(
            json!({
                "limit": {"defaultValue": 25},
                "title": {"defaultValue": "Welcome"},
                "settings": {"defaultValue": {"retries": 3}}
            }),
            json!({}),
        );
        assert_eq!(gb.get_feature_value("limit", 10_i64), 25);
        assert_eq!(gb.get_feature_value("title", String::new()), "Welcome");
        assert_eq!(gb.get_feature_value("missing", 7_i64), 7);
        assert!(gb.take_warnings().is_empty());

        assert_eq!(gb.get_feature_value("title", 0_i64), 0);
        assert_eq!(
            gb.take_warnings(),
            vec![EvalWarning::ValueTypeMismatch("title".to_string())]
        );

        #[derive(serde::Deserialize, Debug, PartialEq, Default)]
        struct Settings {
            retries: u32,
        }
        assert_eq!(
            gb.get_feature_value("settings", Settings::default()),
            Settings { retries: 3 }
        );
    }

    #[test]
    fn test_is_on_is_off() {
        let mut gb = engine_with_features(
            json!({"on": {"defaultValue": "yes"}, "off": {"defaultValue": 0}}),
            json!({}),
        );
        assert!(gb.is_on("on"));
        assert!(gb.is_off("off"));
        assert!(gb.is_off("missing"));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let features = json!({
            "checkout-v2": {
                "defaultValue": "none",
                "rules": [{"id": "exp", "variations": ["a", "b", "c"], "weights": [0.2, 0.3, 0.5]}]
            }
        });
        for id in ["1", "2", "3", "abc", "user-1"] {
            let first = engine_with_features(features.clone(), json!({ "id": id }))
                .eval_feature("checkout-v2")
                .value;
            let second = engine_with_features(features.clone(), json!({ "id": id }))
                .eval_feature("checkout-v2")
                .value;
            assert_eq!(first, second);
        }
    }
}
