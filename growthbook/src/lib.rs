pub mod bucketing;
pub mod callbacks;
pub mod conditions;
pub mod config;
pub mod context;
pub mod debug;
pub mod errors;
pub mod experiment_runner;
pub mod feature_evaluator;
pub mod growthbook;
pub mod ledger;
pub mod models;
pub mod url_matching;
pub mod values;
pub mod version;

// Shared with the integration tests under tests/, so it is compiled into the library.
pub mod test_utils;

pub use callbacks::{
    FeatureUsageCallback, IncludePredicate, SubscriptionCallback, TrackingCallback,
};
pub use context::Context;
pub use debug::{DebugRegistry, DebugSnapshot};
pub use errors::{EvalWarning, RuleSetError};
pub use growthbook::GrowthBook;
pub use ledger::{Assignment, SubscriptionId};
pub use models::{
    Attributes, Experiment, ExperimentOverride, ExperimentResult, ExperimentStatus,
    FeatureDefinition, FeatureMap, FeatureResult, FeatureRule, FeatureSource, RuleSet,
};
