//! Query compilation and execution for Trellis.
//!
//! This module provides:
//! - Plan compilation from parsed queries
//! - Per-step filter and aggregation pipelines
//! - The batched traversal engine
//! - Virtual aggregate entities and the count wrapper
//! - Step-by-step execution and result assembly

mod assemble;
mod count;
mod engine;
mod executor;
mod plan;
mod refine;

pub use count::{count_wrapper, AggregateEntity};
pub use engine::{Edge, StepContext, TraversalEngine};
pub use executor::QueryExecutor;
pub use plan::{
    filter_spec, literal_value, parse_timestamp, BranchPlan, HopPlan, Plan, PlanCompiler, PlanStep,
    PlanStepKind, RepeatMode, SeedPlan, SeedSelector,
};
pub use refine::{
    compare_values, values_equal, AggregateFunction, Lookup, Predicate, Refinements, Stage,
};
