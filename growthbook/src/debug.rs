use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::FeatureMap;

/// What inspection tooling gets to see of an engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub features: FeatureMap,
    pub attributes: Value,
    pub forced_variations: HashMap<String, i64>,
    pub forced_features: HashMap<String, Value>,
    pub url: String,
    pub enabled: bool,
    pub qa_mode: bool,
}

/// Injection point for developer tooling. The engine only talks to a registry when the host
/// passes one in and turns on `dev_mode`.
pub trait DebugRegistry: Send + Sync {
    /// Called on construction and whenever features or attributes are replaced.
    fn attach(&self, snapshot: DebugSnapshot);

    /// Called once, when the engine is destroyed.
    fn detach(&self);
}
