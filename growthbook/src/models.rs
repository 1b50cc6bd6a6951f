use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::Display;

use crate::callbacks::IncludePredicate;
use crate::conditions::condition_models::Condition;
use crate::errors::RuleSetError;
use crate::values::is_truthy;

pub type Attributes = HashMap<String, Value>;
pub type FeatureMap = HashMap<String, FeatureDefinition>;

/// Half-open slice `[start, end)` of the hash space.
pub type VariationRange = (f64, f64);

/// `[id, start, end]`: the slice of namespace `id` an experiment may claim.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "(String, f64, f64)", into = "(String, f64, f64)")]
pub struct Namespace {
    pub id: String,
    pub start: f64,
    pub end: f64,
}

impl From<(String, f64, f64)> for Namespace {
    fn from((id, start, end): (String, f64, f64)) -> Self {
        Namespace { id, start, end }
    }
}

impl From<Namespace> for (String, f64, f64) {
    fn from(namespace: Namespace) -> Self {
        (namespace.id, namespace.start, namespace.end)
    }
}

/// Excludes users whose hash does not land in any of `ranges`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(default)]
    pub seed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u32>,
    #[serde(default)]
    pub ranges: Vec<VariationRange>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VariationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlTargetType {
    Regex,
    Simple,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UrlTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<bool>,
    #[serde(rename = "type")]
    pub target_type: UrlTargetType,
    pub pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub key: String,
    #[serde(default)]
    pub variations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    /// Legacy targeting: a regex tested against the current URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_patterns: Option<Vec<UrlTarget>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<VariationMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<VariationRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExperimentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip)]
    pub include: Option<IncludePredicate>,
}

impl Experiment {
    pub fn new(key: impl Into<String>, variations: Vec<Value>) -> Self {
        Experiment {
            key: key.into(),
            variations,
            ..Default::default()
        }
    }
}

/// Host-supplied per-key patch applied on top of an experiment before it runs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExperimentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ExperimentOverride {
    pub fn apply(&self, experiment: &mut Experiment) {
        if let Some(condition) = &self.condition {
            experiment.condition = Some(condition.clone());
        }
        if let Some(weights) = &self.weights {
            experiment.weights = Some(weights.clone());
        }
        if let Some(active) = self.active {
            experiment.active = Some(active);
        }
        if let Some(status) = self.status {
            experiment.status = Some(status);
        }
        if let Some(force) = self.force {
            experiment.force = Some(force);
        }
        if let Some(coverage) = self.coverage {
            experiment.coverage = Some(coverage);
        }
        if let Some(groups) = &self.groups {
            experiment.groups = Some(groups.clone());
        }
        if let Some(namespace) = &self.namespace {
            experiment.namespace = Some(namespace.clone());
        }
        if let Some(url) = &self.url {
            experiment.url = Some(url.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
    pub key: String,
    #[serde(default)]
    pub feature_id: Option<String>,
    pub in_experiment: bool,
    pub hash_used: bool,
    pub variation_id: usize,
    pub value: Value,
    pub hash_attribute: String,
    pub hash_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
}

/// A tracking call computed ahead of time by the rule-set author, replayed when its force
/// rule wins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackData {
    pub experiment: Experiment,
    pub result: ExperimentResult,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRule {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    /// `Some(Value::Null)` when the payload forces an explicit `null`.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub force: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<VariationRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<VariationRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<VariationMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<TrackData>>,
}

impl FeatureRule {
    /// Builds the experiment an experiment rule stands for, keyed by the feature when the
    /// rule carries no key of its own.
    pub fn to_experiment(&self, feature_key: &str) -> Option<Experiment> {
        let variations = self.variations.as_ref()?;
        Some(Experiment {
            key: self.key.clone().unwrap_or_else(|| feature_key.to_string()),
            variations: variations.clone(),
            weights: self.weights.clone(),
            coverage: self.coverage,
            hash_attribute: self.hash_attribute.clone(),
            namespace: self.namespace.clone(),
            filters: self.filters.clone(),
            meta: self.meta.clone(),
            ranges: self.ranges.clone(),
            seed: self.seed.clone(),
            hash_version: self.hash_version,
            name: self.name.clone(),
            phase: self.phase.clone(),
            ..Default::default()
        })
    }
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub rules: Vec<FeatureRule>,
}

/// The payload a host fetches and hands to the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleSet {
    #[serde(default)]
    pub features: FeatureMap,
}

impl RuleSet {
    pub fn from_json(payload: &str) -> Result<Self, RuleSetError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FeatureSource {
    Override,
    UnknownFeature,
    Force,
    Experiment,
    DefaultValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
    pub value: Value,
    pub on: bool,
    pub off: bool,
    pub source: FeatureSource,
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_result: Option<ExperimentResult>,
}

impl FeatureResult {
    pub fn new(value: Value, source: FeatureSource, rule_id: impl Into<String>) -> Self {
        let on = is_truthy(&value);
        FeatureResult {
            value,
            on,
            off: !on,
            source,
            rule_id: rule_id.into(),
            experiment: None,
            experiment_result: None,
        }
    }

    pub fn with_experiment(mut self, experiment: Experiment, result: ExperimentResult) -> Self {
        self.experiment = Some(experiment);
        self.experiment_result = Some(result);
        self
    }
}
