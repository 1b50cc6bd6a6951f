use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::callbacks::{FeatureUsageCallback, TrackingCallback};
use crate::debug::DebugRegistry;
use crate::models::{Attributes, ExperimentOverride, FeatureMap, RuleSet};

/// Everything the engine needs to know about the current user and request.
///
/// Build one with struct-update syntax or the `with_*` helpers, then hand it to
/// [`GrowthBook::new`](crate::growthbook::GrowthBook::new).
#[derive(Clone)]
pub struct Context {
    pub enabled: bool,
    /// Shared so a refresh swaps the whole rule set at once.
    pub features: Arc<FeatureMap>,
    pub attributes: Attributes,
    /// Shallow-merged over `attributes`; keys here win.
    pub attribute_overrides: Attributes,
    pub url: String,
    pub qa_mode: bool,
    pub groups: HashMap<String, bool>,
    pub overrides: HashMap<String, ExperimentOverride>,
    pub forced_variations: HashMap<String, i64>,
    pub forced_features: HashMap<String, Value>,
    pub tracking_callback: Option<Arc<dyn TrackingCallback>>,
    pub on_feature_usage: Option<Arc<dyn FeatureUsageCallback>>,
    pub dev_mode: bool,
    pub debug_registry: Option<Arc<dyn DebugRegistry>>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            enabled: true,
            features: Arc::new(FeatureMap::new()),
            attributes: Attributes::new(),
            attribute_overrides: Attributes::new(),
            url: String::new(),
            qa_mode: false,
            groups: HashMap::new(),
            overrides: HashMap::new(),
            forced_variations: HashMap::new(),
            forced_features: HashMap::new(),
            tracking_callback: None,
            on_feature_usage: None,
            dev_mode: false,
            debug_registry: None,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("enabled", &self.enabled)
            .field("features", &self.features.len())
            .field("attributes", &self.attributes)
            .field("attribute_overrides", &self.attribute_overrides)
            .field("url", &self.url)
            .field("qa_mode", &self.qa_mode)
            .field("groups", &self.groups)
            .field("forced_variations", &self.forced_variations)
            .field("forced_features", &self.forced_features)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_features(mut self, features: FeatureMap) -> Self {
        self.features = Arc::new(features);
        self
    }

    pub fn with_rule_set(self, rule_set: RuleSet) -> Self {
        self.with_features(rule_set.features)
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_tracking_callback(mut self, callback: Arc<dyn TrackingCallback>) -> Self {
        self.tracking_callback = Some(callback);
        self
    }

    pub fn with_feature_usage_callback(mut self, callback: Arc<dyn FeatureUsageCallback>) -> Self {
        self.on_feature_usage = Some(callback);
        self
    }

    pub fn with_debug_registry(mut self, registry: Arc<dyn DebugRegistry>) -> Self {
        self.dev_mode = true;
        self.debug_registry = Some(registry);
        self
    }

    /// The attribute bag conditions are evaluated against.
    pub fn merged_attributes(&self) -> Value {
        let mut merged: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &self.attribute_overrides {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }
}
