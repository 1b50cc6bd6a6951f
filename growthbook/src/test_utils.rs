use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::callbacks::TrackingCallback;
use crate::context::Context;
use crate::growthbook::GrowthBook;
use crate::models::{Attributes, Experiment, ExperimentResult, FeatureMap};

/// Builds an attribute bag from a `json!` object. Anything else yields an empty bag.
pub fn attributes(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Attributes::new(),
    }
}

pub fn features(value: Value) -> FeatureMap {
    serde_json::from_value(value).expect("fixture features should deserialize")
}

pub fn engine(attrs: Value) -> GrowthBook {
    GrowthBook::new(Context::new().with_attributes(attributes(attrs)))
}

pub fn engine_with_features(feature_map: Value, attrs: Value) -> GrowthBook {
    GrowthBook::new(
        Context::new()
            .with_features(features(feature_map))
            .with_attributes(attributes(attrs)),
    )
}

/// Tracking callback that remembers `(experiment key, variation id)` for every call.
#[derive(Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<(String, usize)>>,
}

impl RecordingTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TrackingCallback for RecordingTracker {
    fn track(&self, experiment: &Experiment, result: &ExperimentResult) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((experiment.key.clone(), result.variation_id));
        Ok(())
    }
}
