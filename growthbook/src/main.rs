use std::collections::BTreeMap;

use anyhow::Context as _;
use envconfig::Envconfig;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use growthbook::config::{Config, FeatureKeys};
use growthbook::{Context, FeatureResult, GrowthBook, RuleSet};

fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;

    // stdout carries the evaluation output, so logs go to stderr:
    //   - DEBUG=true: pretty colored output
    //   - otherwise: JSON, level configured by RUST_LOG
    let debug: bool = *config.debug;

    let log_layer = {
        let base_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true);

        if debug {
            base_layer
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();

    let rule_set = RuleSet::from_path(&config.rule_set_path)
        .with_context(|| format!("Failed to load rule set from {}", config.rule_set_path))?;
    let attributes = config
        .parsed_attributes()
        .context("ATTRIBUTES must be a JSON object")?;

    let keys: Vec<String> = match &config.feature_keys {
        FeatureKeys::All => {
            let mut keys: Vec<String> = rule_set.features.keys().cloned().collect();
            keys.sort();
            keys
        }
        FeatureKeys::Keys(keys) => keys.clone(),
    };

    tracing::info!(
        rule_set = %config.rule_set_path,
        feature_count = rule_set.features.len(),
        requested = keys.len(),
        "Evaluating features"
    );

    let context = Context {
        enabled: *config.enabled,
        qa_mode: *config.qa_mode,
        ..Context::new()
            .with_rule_set(rule_set)
            .with_attributes(attributes)
            .with_url(config.url.clone())
    };
    let mut engine = GrowthBook::new(context);

    let results: BTreeMap<String, FeatureResult> = keys
        .iter()
        .map(|key| (key.clone(), engine.eval_feature(key)))
        .collect();

    for warning in engine.take_warnings() {
        tracing::warn!(warning = %warning, "Evaluation produced a warning");
    }

    for (key, result) in &results {
        let line = serde_json::json!({ "feature": key, "result": result });
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}
