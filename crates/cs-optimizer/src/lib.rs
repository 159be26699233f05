//! # cs-optimizer
//!
//! Parameter search over coil geometries.
//!
//! Input parameters write scalar design knobs into a geometry context, an
//! external factory builds the geometry, an external evaluator solves it and
//! output criteria reduce the results to scalars. Every completed step lands
//! in an append-only iteration log that can be exported as CSV or JSON.

mod config;
mod evaluator;
mod export;
mod input;
mod log;
mod output;
mod search;
mod settings;
mod strategy;

pub use config::{NamedEntries, SearchDocument, StrategySpec};
pub use evaluator::{EvaluationRequest, Evaluator, GeometryFactory, TimeoutEvaluator};
pub use export::ExportRow;
pub use input::{Axis, ControlGroup, ControlLayout, InputParameter, ParameterKind, ScalingTarget};
pub use log::{AppendLog, IterationLog, IterationRecord};
pub use output::{BoundSense, CriterionKind, OutputCriterion};
pub use search::ParameterSearch;
pub use settings::{
    Objective, ObjectiveDirection, SearchId, SearchSettings, SearchState, SearchSummary, StoppingRule,
};
pub use strategy::{Candidate, CandidateQueue, GridSearch, RandomSearch, SearchStrategy};
