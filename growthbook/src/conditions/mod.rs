pub mod condition_matching;
pub mod condition_models;

pub use condition_matching::{eval_condition, eval_condition_value};
pub use condition_models::{Condition, ConditionValue};
