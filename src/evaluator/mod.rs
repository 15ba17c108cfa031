//! Shared condition evaluation, used for edge routing and trigger gating.

pub mod condition;

pub use condition::{
    all_conditions_pass, evaluate_condition, evaluate_operator, ConditionOperator,
};
