use std::ops::Deref;
use std::str::FromStr;

use envconfig::Envconfig;
use once_cell::sync::Lazy;

use crate::models::Attributes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl From<FlexBool> for bool {
    fn from(flex: FlexBool) -> Self {
        flex.0
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Which features the evaluator prints: `all` (or `*`, or empty) for every feature in the
/// rule set, otherwise a comma-separated list of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKeys {
    All,
    Keys(Vec<String>),
}

impl FromStr for FeatureKeys {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") || s == "*" {
            return Ok(FeatureKeys::All);
        }
        let keys: Vec<String> = s
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        if keys.is_empty() {
            return Err(format!("Invalid feature key list: {}", s));
        }
        Ok(FeatureKeys::Keys(keys))
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Path to a JSON rule set payload (`{"features": {...}}`).
    #[envconfig(from = "RULE_SET_PATH")]
    pub rule_set_path: String,

    /// JSON object with the user's attributes.
    #[envconfig(from = "ATTRIBUTES", default = "{}")]
    pub attributes: String,

    #[envconfig(from = "FEATURE_KEYS", default = "all")]
    pub feature_keys: FeatureKeys,

    #[envconfig(from = "URL", default = "")]
    pub url: String,

    #[envconfig(from = "QA_MODE", default = "false")]
    pub qa_mode: FlexBool,

    #[envconfig(from = "ENABLED", default = "true")]
    pub enabled: FlexBool,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: FlexBool,
}

impl Config {
    pub fn default_test_config() -> Self {
        Self {
            rule_set_path: "features.json".to_string(),
            attributes: "{}".to_string(),
            feature_keys: FeatureKeys::All,
            url: "".to_string(),
            qa_mode: FlexBool(false),
            enabled: FlexBool(true),
            debug: FlexBool(false),
        }
    }

    pub fn parsed_attributes(&self) -> Result<Attributes, serde_json::Error> {
        serde_json::from_str(&self.attributes)
    }
}

pub static DEFAULT_TEST_CONFIG: Lazy<Config> = Lazy::new(Config::default_test_config);
