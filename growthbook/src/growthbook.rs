use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::bucketing::{hash, in_range};
use crate::callbacks::SubscriptionCallback;
use crate::conditions::condition_matching::eval_condition_collecting;
use crate::conditions::Condition;
use crate::context::Context;
use crate::debug::DebugSnapshot;
use crate::errors::EvalWarning;
use crate::ledger::{Assignment, AssignmentLedger, SubscriptionId};
use crate::models::{
    Attributes, Experiment, ExperimentOverride, ExperimentResult, FeatureMap, Filter, RuleSet,
};
use crate::values::{is_truthy, to_string_representation};

pub(crate) const DEFAULT_HASH_ATTRIBUTE: &str = "id";

/// A feature-flag and experiment evaluation engine for one user.
///
/// Evaluation is deterministic for a given rule set and attribute bag. The engine is not
/// internally synchronized: every evaluating method takes `&mut self` because it may record
/// tracking state, so hosts that share an engine across threads wrap it in a lock.
pub struct GrowthBook {
    pub(crate) context: Context,
    pub(crate) attributes: Value,
    pub(crate) ledger: AssignmentLedger,
}

impl GrowthBook {
    pub fn new(context: Context) -> Self {
        let attributes = context.merged_attributes();
        let growthbook = GrowthBook {
            context,
            attributes,
            ledger: AssignmentLedger::new(),
        };
        growthbook.publish_debug_snapshot();
        growthbook
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn features(&self) -> Arc<FeatureMap> {
        Arc::clone(&self.context.features)
    }

    /// Replaces the whole rule set. Evaluations already in flight keep the map they started with.
    pub fn set_features(&mut self, features: FeatureMap) {
        info!(feature_count = features.len(), "Replacing feature definitions");
        self.context.features = Arc::new(features);
        self.publish_debug_snapshot();
    }

    pub fn set_rule_set(&mut self, rule_set: RuleSet) {
        self.set_features(rule_set.features);
    }

    /// The merged attribute bag conditions are evaluated against.
    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.context.attributes = attributes;
        self.refresh_attributes();
    }

    pub fn set_attribute_overrides(&mut self, overrides: Attributes) {
        self.context.attribute_overrides = overrides;
        self.refresh_attributes();
    }

    pub fn set_forced_variations(&mut self, forced_variations: HashMap<String, i64>) {
        self.context.forced_variations = forced_variations;
    }

    pub fn set_forced_features(&mut self, forced_features: HashMap<String, Value>) {
        self.context.forced_features = forced_features;
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.context.url = url.into();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.context.enabled = enabled;
    }

    pub fn set_qa_mode(&mut self, qa_mode: bool) {
        self.context.qa_mode = qa_mode;
    }

    pub fn set_groups(&mut self, groups: HashMap<String, bool>) {
        self.context.groups = groups;
    }

    pub fn set_overrides(&mut self, overrides: HashMap<String, ExperimentOverride>) {
        self.context.overrides = overrides;
    }

    pub fn subscribe(&mut self, callback: Arc<dyn SubscriptionCallback>) -> SubscriptionId {
        self.ledger.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.ledger.unsubscribe(id)
    }

    /// The latest assignment for every experiment key this engine has evaluated.
    pub fn all_results(&self) -> &HashMap<String, Assignment> {
        self.ledger.assignments()
    }

    /// Drains the warnings collected since the last call.
    pub fn take_warnings(&mut self) -> Vec<EvalWarning> {
        self.ledger.take_warnings()
    }

    /// Drops subscriptions and tracking memory and detaches from any debug registry. The
    /// engine stays usable afterwards, as if freshly built without forced features.
    pub fn destroy(&mut self) {
        self.ledger.reset();
        self.context.forced_features.clear();
        if self.context.dev_mode {
            if let Some(registry) = &self.context.debug_registry {
                registry.detach();
            }
        }
        debug!("Engine destroyed");
    }

    fn refresh_attributes(&mut self) {
        self.attributes = self.context.merged_attributes();
        self.publish_debug_snapshot();
    }

    fn publish_debug_snapshot(&self) {
        if !self.context.dev_mode {
            return;
        }
        let Some(registry) = &self.context.debug_registry else {
            return;
        };
        registry.attach(DebugSnapshot {
            features: (*self.context.features).clone(),
            attributes: self.attributes.clone(),
            forced_variations: self.context.forced_variations.clone(),
            forced_features: self.context.forced_features.clone(),
            url: self.context.url.clone(),
            enabled: self.context.enabled,
            qa_mode: self.context.qa_mode,
        });
    }

    /// Resolves the attribute used for bucketing. The value is the raw attribute when it is
    /// truthy and `""` otherwise.
    pub(crate) fn hash_attribute(&self, attribute: Option<&str>) -> (String, Value) {
        let name = attribute
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_HASH_ATTRIBUTE)
            .to_string();
        let value = match self.attributes.get(name.as_str()) {
            Some(value) if is_truthy(value) => value.clone(),
            _ => Value::String(String::new()),
        };
        (name, value)
    }

    pub(crate) fn hash_value(&self, attribute: Option<&str>) -> String {
        let (_, value) = self.hash_attribute(attribute);
        to_string_representation(&value)
    }

    pub(crate) fn condition_passes(&mut self, condition: &Condition) -> bool {
        let mut warnings = Vec::new();
        let passes = eval_condition_collecting(&self.attributes, condition, &mut warnings);
        self.ledger.extend_warnings(warnings);
        passes
    }

    /// A user is filtered out when any filter cannot hash them or hashes them outside
    /// every one of its ranges.
    pub(crate) fn is_filtered_out(&self, filters: &[Filter]) -> bool {
        filters.iter().any(|filter| {
            let hash_value = self.hash_value(filter.attribute.as_deref());
            if hash_value.is_empty() {
                return true;
            }
            let hash_version = filter.hash_version.filter(|v| *v != 0).unwrap_or(2);
            let Some(n) = hash(&filter.seed, &hash_value, hash_version) else {
                return true;
            };
            !filter.ranges.iter().any(|range| in_range(n, range))
        })
    }

    pub(crate) fn has_group_overlap(&self, groups: &[String]) -> bool {
        groups
            .iter()
            .any(|group| self.context.groups.get(group).copied().unwrap_or(false))
    }

    /// Reports an assignment to the tracking callback at most once per
    /// `(hash attribute, hash value, experiment key, variation)`.
    pub(crate) fn track(&mut self, experiment: &Experiment, result: &ExperimentResult) {
        let Some(callback) = self.context.tracking_callback.clone() else {
            return;
        };

        let tracking_key = format!(
            "{}{}{}{}",
            result.hash_attribute,
            to_string_representation(&result.hash_value),
            experiment.key,
            result.variation_id
        );
        if !self.ledger.mark_experiment_tracked(tracking_key) {
            return;
        }

        debug!(
            experiment = %experiment.key,
            variation_id = result.variation_id,
            "Tracking experiment exposure"
        );
        if let Err(e) = callback.track(experiment, result) {
            self.ledger.warn(EvalWarning::TrackingFailed {
                key: experiment.key.clone(),
                reason: e.to_string(),
            });
        }
    }

    pub(crate) fn fire_subscriptions(&mut self, experiment: &Experiment, result: &ExperimentResult) {
        if !self.ledger.record_assignment(experiment, result) {
            return;
        }
        for subscriber in self.ledger.subscribers() {
            if let Err(e) = subscriber.on_assignment(experiment, result) {
                self.ledger.warn(EvalWarning::SubscriberFailed {
                    key: experiment.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugRegistry;
    use crate::test_utils::{attributes, engine_with_features};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRegistry {
        snapshots: Mutex<Vec<DebugSnapshot>>,
        detached: Mutex<bool>,
    }

    impl DebugRegistry for RecordingRegistry {
        fn attach(&self, snapshot: DebugSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot);
        }

        fn detach(&self) {
            *self.detached.lock().unwrap() = true;
        }
    }

    #[test]
    fn test_hash_attribute_defaults_to_id() {
        let gb = GrowthBook::new(Context::new().with_attributes(attributes(json!({"id": 123}))));
        assert_eq!(gb.hash_attribute(None), ("id".to_string(), json!(123)));
        assert_eq!(gb.hash_value(None), "123");
    }

    #[test]
    fn test_falsy_hash_attribute_is_empty() {
        let gb = GrowthBook::new(
            Context::new().with_attributes(attributes(json!({"id": "", "company": null, "n": 0}))),
        );
        assert_eq!(gb.hash_value(None), "");
        assert_eq!(gb.hash_value(Some("company")), "");
        assert_eq!(gb.hash_value(Some("n")), "");
        assert_eq!(gb.hash_value(Some("missing")), "");
    }

    #[test]
    fn test_set_attributes_refreshes_merged_bag() {
        let mut gb = GrowthBook::new(Context::new());
        gb.set_attributes(attributes(json!({"id": "1", "country": "US"})));
        gb.set_attribute_overrides(attributes(json!({"country": "DE"})));
        assert_eq!(gb.attributes(), &json!({"id": "1", "country": "DE"}));
    }

    #[test]
    fn test_filters() {
        // hash("filter-seed", "2", 2) == 0.0303, hash("filter-seed", "1", 2) == 0.7556
        let filters = vec![Filter {
            attribute: None,
            seed: "filter-seed".to_string(),
            hash_version: None,
            ranges: vec![(0.0, 0.5)],
        }];

        let gb = GrowthBook::new(Context::new().with_attributes(attributes(json!({"id": "2"}))));
        assert!(!gb.is_filtered_out(&filters));

        let gb = GrowthBook::new(Context::new().with_attributes(attributes(json!({"id": "1"}))));
        assert!(gb.is_filtered_out(&filters));

        let gb = GrowthBook::new(Context::new());
        assert!(gb.is_filtered_out(&filters));
    }

    #[test]
    fn test_filter_hash_version_zero_means_default() {
        // hash("filter-seed", "2", 2) == 0.0303
        let filter = |hash_version| Filter {
            attribute: None,
            seed: "filter-seed".to_string(),
            hash_version,
            ranges: vec![(0.0, 0.5)],
        };
        let gb = GrowthBook::new(Context::new().with_attributes(attributes(json!({"id": "2"}))));

        assert!(!gb.is_filtered_out(&[filter(None)]));
        assert!(!gb.is_filtered_out(&[filter(Some(0))]));
        assert!(gb.is_filtered_out(&[filter(Some(7))]));
    }

    #[test]
    fn test_group_overlap() {
        let mut gb = GrowthBook::new(Context::new());
        gb.set_groups(HashMap::from([
            ("beta".to_string(), true),
            ("internal".to_string(), false),
        ]));
        assert!(gb.has_group_overlap(&["alpha".to_string(), "beta".to_string()]));
        assert!(!gb.has_group_overlap(&["internal".to_string()]));
        assert!(!gb.has_group_overlap(&[]));
    }

    #[test]
    fn test_debug_registry_lifecycle() {
        let registry = Arc::new(RecordingRegistry::default());
        let context = Context::new().with_debug_registry(registry.clone());
        let mut gb = GrowthBook::new(context);
        assert_eq!(registry.snapshots.lock().unwrap().len(), 1);

        gb.set_attributes(attributes(json!({"id": "1"})));
        gb.set_features(FeatureMap::new());
        {
            let snapshots = registry.snapshots.lock().unwrap();
            assert_eq!(snapshots.len(), 3);
            assert_eq!(snapshots[1].attributes, json!({"id": "1"}));
        }

        gb.destroy();
        assert!(*registry.detached.lock().unwrap());
    }

    #[test]
    fn test_registry_ignored_without_dev_mode() {
        let registry = Arc::new(RecordingRegistry::default());
        let context = Context {
            debug_registry: Some(registry.clone()),
            ..Default::default()
        };
        let mut gb = GrowthBook::new(context);
        gb.destroy();
        assert!(registry.snapshots.lock().unwrap().is_empty());
        assert!(!*registry.detached.lock().unwrap());
    }

    #[test]
    fn test_destroy_clears_forced_features() {
        let mut gb = engine_with_features(json!({"flag": {"defaultValue": 1}}), json!({}));
        gb.set_forced_features(HashMap::from([("flag".to_string(), json!(2))]));
        gb.destroy();
        assert!(gb.context().forced_features.is_empty());
    }
}
