//! The Pipeline Interpreter (spec.md §4.8): runs a `PipelineModel` stage by
//! stage in topological order, dispatching steps to the registry in
//! `steps.rs`, honoring `when` conditions, parallel groups, environment
//! layering, post blocks, and cooperative cancellation.
//!
//! Shaped after the teacher's `PipelineOrchestrator::execute`/
//! `execute_inner`/`execute_stage`: a task spawned per job that streams
//! `ExecutionEvent`s back over an mpsc channel while a `JoinHandle` carries
//! the final result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hodei_config::variables::VariableContext;
use hodei_core::event::EventKind;
use hodei_core::pipeline::{Outcome, PipelineModel, Stage, Step};
use hodei_core::{Error, ResourceId, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::condition::evaluate as evaluate_condition;
use crate::steps::{default_registry, LeafStep, StepExecutor, StepOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageState::Pending | StageState::Running)
    }
}

pub struct PipelineResult {
    pub success: bool,
    pub stage_states: HashMap<String, StageState>,
}

pub struct Interpreter {
    registry: HashMap<&'static str, Box<dyn StepExecutor>>,
    /// Last outcome each (job, stage) pair produced, so a later attempt of
    /// the same job can detect a `changed` outcome (spec.md §4.8). Scoped to
    /// one job id, which stays stable across any retry of that job.
    stage_history: tokio::sync::Mutex<HashMap<(ResourceId, String), Outcome>>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            registry: default_registry(),
            stage_history: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Builds an interpreter around a caller-supplied step registry, e.g.
    /// one with operator extension handlers registered.
    pub fn with_registry(registry: HashMap<&'static str, Box<dyn StepExecutor>>) -> Self {
        Self {
            registry,
            stage_history: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Records `outcome` as the latest for `(job_id, stage_name)` and
    /// returns whatever outcome was previously recorded there, if any.
    async fn prior_outcome(&self, job_id: ResourceId, stage_name: &str, outcome: Outcome) -> Option<Outcome> {
        self.stage_history
            .lock()
            .await
            .insert((job_id, stage_name.to_string()), outcome)
    }

    /// Spawns interpretation of `pipeline` as a background task, returning
    /// an event receiver plus a handle to the eventual result. `base_ctx`
    /// carries the worker/job environment layer; per-stage `withEnv` blocks
    /// merge on top of it.
    pub fn execute(
        self: Arc<Self>,
        job_id: ResourceId,
        pipeline: PipelineModel,
        base_ctx: VariableContext,
        working_dir: PathBuf,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<EventKind>, JoinHandle<Result<PipelineResult>>) {
        let (tx, rx) = mpsc::channel(256);
        let handle = tokio::spawn(async move {
            self.run(job_id, pipeline, base_ctx, working_dir, cancel, tx).await
        });
        (rx, handle)
    }

    async fn run(
        &self,
        job_id: ResourceId,
        pipeline: PipelineModel,
        base_ctx: VariableContext,
        working_dir: PathBuf,
        cancel: CancellationToken,
        tx: mpsc::Sender<EventKind>,
    ) -> Result<PipelineResult> {
        pipeline.validate()?;
        let order = pipeline.topological_order()?;
        let mut states: HashMap<String, StageState> = order.iter().map(|n| (n.clone(), StageState::Pending)).collect();
        let mut success = true;

        for name in &order {
            if cancel.is_cancelled() {
                states.insert(name.clone(), StageState::Skipped);
                continue;
            }

            let stage = pipeline.stage(name).expect("name came from topological order");
            let deps_ok = stage
                .needs
                .iter()
                .all(|dep| states.get(dep) == Some(&StageState::Succeeded));
            if !deps_ok {
                states.insert(name.clone(), StageState::Skipped);
                continue;
            }

            if let Some(when) = &stage.when {
                if !evaluate_condition(when, &base_ctx) {
                    states.insert(name.clone(), StageState::Skipped);
                    let _ = tx.send(EventKind::StageCompleted { stage: name.clone(), outcome: "skipped".to_string() }).await;
                    continue;
                }
            }

            let _ = tx.send(EventKind::StageStarted { stage: name.clone() }).await;
            states.insert(name.clone(), StageState::Running);

            let stage_token = cancel.child_token();
            let outcome = self
                .run_stage(job_id, stage, &base_ctx, &working_dir, stage_token, &tx)
                .await;

            match outcome {
                Ok(Outcome::Success) | Ok(Outcome::Unstable) => {
                    states.insert(name.clone(), StageState::Succeeded);
                    let _ = tx
                        .send(EventKind::StageCompleted { stage: name.clone(), outcome: "success".to_string() })
                        .await;
                }
                Ok(Outcome::Skipped) => {
                    states.insert(name.clone(), StageState::Skipped);
                }
                Ok(Outcome::Failed) | Err(_) => {
                    let message = outcome.as_ref().err().map(|e| e.to_string()).unwrap_or_default();
                    states.insert(name.clone(), StageState::Failed);
                    success = false;
                    let _ = tx
                        .send(EventKind::StageFailed { stage: name.clone(), message })
                        .await;
                    break;
                }
            }
        }

        Ok(PipelineResult { success, stage_states: states })
    }

    /// Runs one stage: either its own steps in sequence, or -- if it's a
    /// parallel group -- each child stage concurrently, succeeding only if
    /// every child succeeds.
    async fn run_stage(
        &self,
        job_id: ResourceId,
        stage: &Stage,
        ctx: &VariableContext,
        cwd: &Path,
        cancel: CancellationToken,
        tx: &mpsc::Sender<EventKind>,
    ) -> Result<Outcome> {
        if stage.is_parallel_group() {
            let _ = tx.send(EventKind::ParallelGroupStarted { stage: stage.name.clone() }).await;
            let mut handles = Vec::with_capacity(stage.parallel.len());
            for child in &stage.parallel {
                let child = child.clone();
                let ctx = ctx.clone();
                let cwd = cwd.to_path_buf();
                let child_cancel = cancel.child_token();
                let tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    let registry = default_registry();
                    run_steps(&registry, job_id, &child.name, &child.steps, &ctx, &cwd, child_cancel, &tx).await
                }));
            }
            let mut all_ok = true;
            for handle in handles {
                match handle.await {
                    Ok(Ok(_)) => {}
                    _ => all_ok = false,
                }
            }
            let _ = tx.send(EventKind::ParallelGroupCompleted { stage: stage.name.clone() }).await;
            return Ok(if all_ok { Outcome::Success } else { Outcome::Failed });
        }

        let result = run_steps(&self.registry, job_id, &stage.name, &stage.steps, ctx, cwd, cancel, tx).await;

        let outcome = match &result {
            Ok(StepOutcome::Success) => Outcome::Success,
            Ok(StepOutcome::Unstable) => Outcome::Unstable,
            Err(_) => Outcome::Failed,
        };

        let post = &stage.post;
        match outcome {
            Outcome::Success => run_post(&self.registry, job_id, &stage.name, &post.success, ctx, cwd, tx).await,
            Outcome::Unstable => run_post(&self.registry, job_id, &stage.name, &post.unstable, ctx, cwd, tx).await,
            Outcome::Failed => run_post(&self.registry, job_id, &stage.name, &post.failure, ctx, cwd, tx).await,
            Outcome::Skipped => {}
        }

        if let Some(prior) = self.prior_outcome(job_id, &stage.name, outcome).await {
            if prior != outcome {
                run_post(&self.registry, job_id, &stage.name, &post.changed, ctx, cwd, tx).await;
            }
        }

        run_post(&self.registry, job_id, &stage.name, &post.always, ctx, cwd, tx).await;

        match result {
            Ok(_) => Ok(outcome),
            Err(e) => Err(e),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_post(
    registry: &HashMap<&'static str, Box<dyn StepExecutor>>,
    job_id: ResourceId,
    stage_name: &str,
    steps: &[Step],
    ctx: &VariableContext,
    cwd: &Path,
    tx: &mpsc::Sender<EventKind>,
) {
    if steps.is_empty() {
        return;
    }
    let _ = run_steps(registry, job_id, stage_name, steps, ctx, cwd, CancellationToken::new(), tx).await;
}

fn run_steps<'a>(
    registry: &'a HashMap<&'static str, Box<dyn StepExecutor>>,
    job_id: ResourceId,
    stage_name: &'a str,
    steps: &'a [Step],
    ctx: &'a VariableContext,
    cwd: &'a Path,
    cancel: CancellationToken,
    tx: &'a mpsc::Sender<EventKind>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<StepOutcome>> + Send + 'a>> {
    Box::pin(async move {
        let mut outcome = StepOutcome::Success;
        for step in steps {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(format!("stage '{stage_name}' cancelled")));
            }
            outcome = outcome.combine(run_one_step(registry, job_id, stage_name, step, ctx, cwd, cancel.clone(), tx).await?);
        }
        Ok(outcome)
    })
}

fn run_one_step<'a>(
    registry: &'a HashMap<&'static str, Box<dyn StepExecutor>>,
    job_id: ResourceId,
    stage_name: &'a str,
    step: &'a Step,
    ctx: &'a VariableContext,
    cwd: &'a Path,
    cancel: CancellationToken,
    tx: &'a mpsc::Sender<EventKind>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<StepOutcome>> + Send + 'a>> {
    Box::pin(async move {
        match step {
            Step::Shell { command } => {
                exec_leaf(registry, "shell", LeafStep::Shell { command }, stage_name, ctx, cwd, tx, &cancel).await
            }
            Step::Script { content } => {
                exec_leaf(registry, "script", LeafStep::Script { content }, stage_name, ctx, cwd, tx, &cancel).await
            }
            Step::Archive { pattern } => {
                exec_leaf(registry, "archive", LeafStep::Archive { pattern }, stage_name, ctx, cwd, tx, &cancel).await
            }
            Step::PublishTestResults { pattern } => {
                exec_leaf(
                    registry,
                    "publish_test_results",
                    LeafStep::PublishTestResults { pattern },
                    stage_name,
                    ctx,
                    cwd,
                    tx,
                    &cancel,
                )
                .await
            }
            Step::Extension { name, action, params } => {
                exec_leaf(
                    registry,
                    "extension",
                    LeafStep::Extension { name, action, params },
                    stage_name,
                    ctx,
                    cwd,
                    tx,
                    &cancel,
                )
                .await
            }
            Step::ParallelGroup { children } => {
                let mut handles = Vec::with_capacity(children.len());
                for child in children {
                    let child = child.clone();
                    let ctx = ctx.clone();
                    let cwd = cwd.to_path_buf();
                    let tx = tx.clone();
                    let stage_name = stage_name.to_string();
                    let cancel = cancel.clone();
                    handles.push(tokio::spawn(async move {
                        let registry = default_registry();
                        run_one_step(&registry, job_id, &stage_name, &child, &ctx, &cwd, cancel, &tx).await
                    }));
                }
                let mut outcome = StepOutcome::Success;
                for handle in handles {
                    let child_outcome = handle
                        .await
                        .map_err(|e| Error::Internal(format!("parallel step task panicked: {e}")))??;
                    outcome = outcome.combine(child_outcome);
                }
                Ok(outcome)
            }
            Step::Dir { path, children } => {
                let nested_cwd = cwd.join(ctx.interpolate(path));
                run_steps(registry, job_id, stage_name, children, ctx, &nested_cwd, cancel, tx).await
            }
            Step::WithEnv { overrides, children } => {
                let interpolated = ctx.interpolate_map(overrides);
                let nested_ctx = ctx.merge(&interpolated);
                run_steps(registry, job_id, stage_name, children, &nested_ctx, cwd, cancel, tx).await
            }
            Step::Timeout { duration, children } => {
                tokio::time::timeout(
                    *duration,
                    run_steps(registry, job_id, stage_name, children, ctx, cwd, cancel, tx),
                )
                .await
                .map_err(|_| Error::Timeout(format!("stage '{stage_name}' step group")))?
            }
            Step::Retry { count, children } => {
                let mut attempt = 0;
                loop {
                    let _ = tx
                        .send(EventKind::StepOutput {
                            stream: "stdout".to_string(),
                            chunk: format!("retry attempt {} of {} for stage '{stage_name}'", attempt + 1, *count + 1),
                        })
                        .await;
                    let result = run_steps(registry, job_id, stage_name, children, ctx, cwd, cancel.clone(), tx).await;
                    match result {
                        Ok(outcome) => return Ok(outcome),
                        Err(_) if attempt < *count => {
                            attempt += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    })
}

async fn exec_leaf(
    registry: &HashMap<&'static str, Box<dyn StepExecutor>>,
    kind: &'static str,
    leaf: LeafStep<'_>,
    stage_name: &str,
    ctx: &VariableContext,
    cwd: &Path,
    tx: &mpsc::Sender<EventKind>,
    cancel: &CancellationToken,
) -> Result<StepOutcome> {
    let executor = registry
        .get(kind)
        .ok_or_else(|| Error::Internal(format!("no step executor registered for kind '{kind}'")))?;
    executor.execute(&leaf, ctx, cwd, tx, cancel).await.map_err(|e| match e {
        Error::StepFailure { step, exit_code, .. } => Error::StepFailure {
            stage: stage_name.to_string(),
            step,
            exit_code,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_core::pipeline::{PipelineModel, Stage};

    #[tokio::test]
    async fn runs_stages_in_dependency_order() {
        let mut build = Stage::leaf("build", vec![Step::Shell { command: "echo build".to_string() }]);
        build.produces.push("bin".to_string());
        let mut test = Stage::leaf("test", vec![Step::Shell { command: "echo test".to_string() }]);
        test.needs.push("build".to_string());

        let model = PipelineModel { stages: vec![test, build] };
        let interpreter = Arc::new(Interpreter::new());
        let (mut rx, handle) = interpreter.execute(
            ResourceId::new(),
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn failing_stage_skips_dependents() {
        let fail = Stage::leaf("build", vec![Step::Shell { command: "exit 1".to_string() }]);
        let mut test = Stage::leaf("test", vec![Step::Shell { command: "echo never".to_string() }]);
        test.needs.push("build".to_string());

        let model = PipelineModel { stages: vec![fail, test] };
        let interpreter = Arc::new(Interpreter::new());
        let (mut rx, handle) = interpreter.execute(
            ResourceId::new(),
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let result = handle.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.stage_states.get("build"), Some(&StageState::Failed));
        while rx.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn when_condition_false_skips_stage() {
        let mut gated = Stage::leaf("deploy", vec![Step::Shell { command: "echo deploying".to_string() }]);
        gated.when = Some(hodei_core::pipeline::Condition::Branch("main".to_string()));

        let model = PipelineModel { stages: vec![gated] };
        let ctx = hodei_config::variables::VariableContextBuilder::new()
            .with_custom("branch", "feature")
            .build();
        let interpreter = Arc::new(Interpreter::new());
        let (mut rx, handle) = interpreter.execute(
            ResourceId::new(),
            model,
            ctx,
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.stage_states.get("deploy"), Some(&StageState::Skipped));
        while rx.recv().await.is_some() {}
    }

    async fn collect_chunks(rx: &mut mpsc::Receiver<EventKind>) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(event) = rx.recv().await {
            if let EventKind::StepOutput { chunk, .. } = event {
                chunks.push(chunk);
            }
        }
        chunks
    }

    #[tokio::test]
    async fn unstable_extension_runs_post_unstable_not_post_success() {
        let mut registry = crate::steps::default_registry();
        let mut probe = crate::steps::ExtensionExecutor::new();
        probe.register("probe", "check", |_| Ok(StepOutcome::Unstable));
        registry.insert("extension", Box::new(probe));

        let mut stage = Stage::leaf(
            "probe",
            vec![Step::Extension { name: "probe".to_string(), action: "check".to_string(), params: HashMap::new() }],
        );
        stage.post.success = vec![Step::Shell { command: "echo post-success".to_string() }];
        stage.post.unstable = vec![Step::Shell { command: "echo post-unstable".to_string() }];

        let model = PipelineModel { stages: vec![stage] };
        let interpreter = Arc::new(Interpreter::with_registry(registry));
        let (mut rx, handle) = interpreter.execute(
            ResourceId::new(),
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let chunks = collect_chunks(&mut rx).await;
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert!(chunks.iter().any(|c| c == "post-unstable"));
        assert!(!chunks.iter().any(|c| c == "post-success"));
    }

    #[tokio::test]
    async fn post_changed_runs_only_when_outcome_differs_from_prior_attempt() {
        let interpreter = Arc::new(Interpreter::new());
        let job_id = ResourceId::new();

        let mut failing = Stage::leaf("build", vec![Step::Shell { command: "exit 1".to_string() }]);
        failing.post.changed = vec![Step::Shell { command: "echo changed-from-first".to_string() }];
        let model = PipelineModel { stages: vec![failing] };
        let (mut rx, handle) = interpreter.clone().execute(
            job_id,
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let first_chunks = collect_chunks(&mut rx).await;
        let _ = handle.await.unwrap();
        assert!(!first_chunks.iter().any(|c| c == "changed-from-first"), "first attempt has no prior outcome to compare against");

        let mut succeeding = Stage::leaf("build", vec![Step::Shell { command: "echo ok".to_string() }]);
        succeeding.post.changed = vec![Step::Shell { command: "echo changed-from-second".to_string() }];
        let model = PipelineModel { stages: vec![succeeding] };
        let (mut rx, handle) = interpreter.execute(
            job_id,
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let second_chunks = collect_chunks(&mut rx).await;
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert!(second_chunks.iter().any(|c| c == "changed-from-second"));
    }

    #[tokio::test]
    async fn retry_emits_an_attempt_boundary_event_per_attempt() {
        let attempts_path = std::env::temp_dir().join(format!("hodei-retry-test-{}", ResourceId::new()));
        let stage = Stage::leaf(
            "flaky",
            vec![Step::Retry {
                count: 2,
                children: vec![Step::Shell {
                    command: format!(
                        "test -f {0} && exit 0 || (touch {0} && exit 1)",
                        attempts_path.display()
                    ),
                }],
            }],
        );
        let model = PipelineModel { stages: vec![stage] };
        let interpreter = Arc::new(Interpreter::new());
        let (mut rx, handle) = interpreter.execute(
            ResourceId::new(),
            model,
            VariableContext::new(),
            std::env::temp_dir(),
            CancellationToken::new(),
        );
        let chunks = collect_chunks(&mut rx).await;
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        let boundary_count = chunks.iter().filter(|c| c.contains("retry attempt")).count();
        assert_eq!(boundary_count, 2);
        let _ = std::fs::remove_file(&attempts_path);
    }
}
