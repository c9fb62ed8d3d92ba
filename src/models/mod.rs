pub mod dsl_model;
pub mod metrics;
pub mod outcome;
