//! The Pipeline Interpreter: executes a `PipelineModel` stage by stage on
//! the worker (spec.md §4.8).

pub mod condition;
pub mod interpreter;
pub mod steps;

pub use interpreter::{Interpreter, PipelineResult, StageState};
