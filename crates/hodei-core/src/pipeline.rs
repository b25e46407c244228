//! The executable pipeline model consumed by the worker-side interpreter.
//!
//! This is the compiled form produced externally by a pipeline DSL (out of
//! scope here, see spec.md §1) -- the interpreter only ever sees a fully
//! built, immutable `PipelineModel`.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An executable pipeline: an ordered sequence of stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineModel {
    pub stages: Vec<Stage>,
}

impl PipelineModel {
    /// Validates the invariant from spec.md §3: artifact `requires`
    /// references must name artifacts `produces`d by a stage strictly
    /// earlier in the topological stage order; cycles (via `needs`) are
    /// rejected here rather than at execution time.
    pub fn validate(&self) -> Result<()> {
        let order = self.topological_order()?;
        let mut produced: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for name in &order {
            let stage = self.stage(name).expect("name came from this model");
            for req in &stage.requires {
                if !produced.contains(req.as_str()) {
                    return Err(Error::InvalidDefinition(format!(
                        "stage '{}' requires artifact '{}' which is not produced by any earlier stage",
                        stage.name, req
                    )));
                }
            }
            produced.extend(stage.produces.iter().map(String::as_str));
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Topologically sorts stages by `needs`, rejecting cycles and unknown
    /// dependency names. Ties among ready stages are broken by declaration
    /// order so replay is deterministic.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        for stage in &self.stages {
            for need in &stage.needs {
                if !names.contains(&need.as_str()) {
                    return Err(Error::InvalidDefinition(format!(
                        "stage '{}' needs unknown stage '{}'",
                        stage.name, need
                    )));
                }
            }
        }

        let mut resolved: Vec<String> = Vec::with_capacity(self.stages.len());
        let mut visiting: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut visited: std::collections::HashSet<&str> = std::collections::HashSet::new();

        fn visit<'a>(
            model: &'a PipelineModel,
            name: &'a str,
            visiting: &mut std::collections::HashSet<&'a str>,
            visited: &mut std::collections::HashSet<&'a str>,
            resolved: &mut Vec<String>,
        ) -> Result<()> {
            if visited.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name) {
                return Err(Error::InvalidDefinition(format!(
                    "cycle detected in stage dependency graph at '{name}'"
                )));
            }
            let stage = model.stage(name).expect("name validated above");
            for need in &stage.needs {
                visit(model, need, visiting, visited, resolved)?;
            }
            visiting.remove(name);
            visited.insert(name);
            resolved.push(name.to_string());
            Ok(())
        }

        for stage in &self.stages {
            visit(self, &stage.name, &mut visiting, &mut visited, &mut resolved)?;
        }
        Ok(resolved)
    }
}

/// An ordered, named section of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Other stage names that must complete (successfully) before this one.
    pub needs: Vec<String>,
    pub when: Option<Condition>,
    /// Soft placement hint; does not participate in scheduling beyond the
    /// worker's own label-based eligibility.
    pub agent: Option<String>,
    pub steps: Vec<Step>,
    /// Nested stage groups scheduled concurrently. When present, `steps`
    /// must be empty: a stage is either a leaf of steps or a parallel fan
    /// out of child stages, never both.
    pub parallel: Vec<Stage>,
    pub post: PostBlocks,
    pub produces: Vec<String>,
    pub requires: Vec<String>,
}

impl Stage {
    pub fn leaf(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            when: None,
            agent: None,
            steps,
            parallel: Vec::new(),
            post: PostBlocks::default(),
            produces: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn is_parallel_group(&self) -> bool {
        !self.parallel.is_empty()
    }
}

/// Post-execution blocks, keyed by the stage outcome they run under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostBlocks {
    pub always: Vec<Step>,
    pub success: Vec<Step>,
    pub failure: Vec<Step>,
    pub unstable: Vec<Step>,
    /// Runs when the outcome differs from the previous attempt within the
    /// same job (per-job-attempt scope -- see DESIGN.md Open Question
    /// decision); ignored on the first attempt.
    pub changed: Vec<Step>,
}

/// The outcome of a single stage execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failed,
    Unstable,
    Skipped,
}

/// An atomic executable action inside a stage, or a structural combinator
/// wrapping a nested subtree of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    Shell { command: String },
    Script { content: String },
    Archive { pattern: String },
    PublishTestResults { pattern: String },
    Extension {
        name: String,
        action: String,
        params: HashMap<String, String>,
    },
    ParallelGroup { children: Vec<Step> },
    Dir { path: String, children: Vec<Step> },
    WithEnv {
        overrides: HashMap<String, String>,
        children: Vec<Step>,
    },
    Timeout {
        duration: Duration,
        children: Vec<Step>,
    },
    /// Re-runs the child subtree up to `count` additional times on failure.
    Retry { count: u32, children: Vec<Step> },
}

/// A boolean expression tree gating whether a stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Branch(String),
    Tag(String),
    Env { key: String, value: String },
    /// Arbitrary `${...}`-interpolated expression text, evaluated truthy if
    /// the interpolated string is non-empty and not `"false"`/`"0"`.
    Expression(String),
    AllOf(Vec<Condition>),
    AnyOf(Vec<Condition>),
    Not(Box<Condition>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(stages: Vec<Stage>) -> PipelineModel {
        PipelineModel { stages }
    }

    #[test]
    fn topological_order_respects_needs() {
        let mut build = Stage::leaf("build", vec![]);
        build.produces.push("bin".into());
        let mut test = Stage::leaf("test", vec![]);
        test.needs.push("build".into());
        test.requires.push("bin".into());
        let m = model(vec![test.clone(), build.clone()]);
        let order = m.topological_order().unwrap();
        assert_eq!(order, vec!["build".to_string(), "test".to_string()]);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut a = Stage::leaf("a", vec![]);
        a.needs.push("b".into());
        let mut b = Stage::leaf("b", vec![]);
        b.needs.push("a".into());
        let m = model(vec![a, b]);
        assert!(m.topological_order().is_err());
    }

    #[test]
    fn requires_without_earlier_producer_is_rejected() {
        let mut test = Stage::leaf("test", vec![]);
        test.requires.push("bin".into());
        let m = model(vec![test]);
        assert!(m.validate().is_err());
    }

    #[test]
    fn unknown_needs_target_is_rejected() {
        let mut a = Stage::leaf("a", vec![]);
        a.needs.push("missing".into());
        let m = model(vec![a]);
        assert!(m.topological_order().is_err());
    }
}
