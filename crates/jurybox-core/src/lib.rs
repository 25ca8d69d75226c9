//! jurybox-core — Evaluator assignment and integrity-monitoring engine.
//!
//! This crate defines the competency data model, the eligibility matcher,
//! the assignment scheduler and the statistical monitors (calibration,
//! self-stack bias, collusion) that the rest of jurybox builds on.

pub mod bias;
pub mod calibration;
pub mod collusion;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod flags;
pub mod model;
pub mod parser;
pub mod report;
pub mod scheduler;
pub mod statistics;
pub mod store;
pub mod trust;
