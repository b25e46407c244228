//! Step execution: a registry of executors keyed by step kind, mirroring
//! the teacher's `Executor` trait shape but scoped to one step rather than
//! one whole job. `Stage`/`Step` structural combinators (parallel groups,
//! `dir`, `withEnv`, `timeout`, `retry`) are handled by the interpreter
//! directly since they wrap child steps rather than doing work themselves.

use std::path::Path;

use async_trait::async_trait;
use hodei_config::variables::VariableContext;
use hodei_core::event::EventKind;
use hodei_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The result of one leaf step. Only an extension handler can report
/// `Unstable`; every other executor always produces `Success` or an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Unstable,
}

impl StepOutcome {
    pub fn combine(self, other: StepOutcome) -> StepOutcome {
        if self == StepOutcome::Unstable || other == StepOutcome::Unstable {
            StepOutcome::Unstable
        } else {
            StepOutcome::Success
        }
    }
}

/// The leaf-level work a single non-structural `Step` variant performs.
pub enum LeafStep<'a> {
    Shell { command: &'a str },
    Script { content: &'a str },
    Archive { pattern: &'a str },
    PublishTestResults { pattern: &'a str },
    Extension {
        name: &'a str,
        action: &'a str,
        params: &'a std::collections::HashMap<String, String>,
    },
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        ctx: &VariableContext,
        cwd: &Path,
        out: &mpsc::Sender<EventKind>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome>;
}

/// Runs a shell command via `sh -c`, streaming stdout/stderr lines as
/// `StepOutput` events as they arrive rather than buffering to completion.
pub struct ShellExecutor;

#[async_trait]
impl StepExecutor for ShellExecutor {
    fn kind(&self) -> &'static str {
        "shell"
    }

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        ctx: &VariableContext,
        cwd: &Path,
        out: &mpsc::Sender<EventKind>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let command = match step {
            LeafStep::Shell { command } => ctx.interpolate(command),
            _ => unreachable!("ShellExecutor only handles LeafStep::Shell"),
        };
        run_shell(&command, ctx, cwd, out, cancel).await?;
        Ok(StepOutcome::Success)
    }
}

/// Writes an interpolated script to a temp file and executes it with `sh`.
pub struct ScriptExecutor;

#[async_trait]
impl StepExecutor for ScriptExecutor {
    fn kind(&self) -> &'static str {
        "script"
    }

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        ctx: &VariableContext,
        cwd: &Path,
        out: &mpsc::Sender<EventKind>,
        cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let content = match step {
            LeafStep::Script { content } => ctx.interpolate(content),
            _ => unreachable!("ScriptExecutor only handles LeafStep::Script"),
        };
        let path = std::env::temp_dir().join(format!("hodei-script-{}.sh", hodei_core::ResourceId::new()));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Internal(format!("failed to write script: {e}")))?;
        let result = run_shell(&format!("sh {}", path.display()), ctx, cwd, out, cancel).await;
        let _ = tokio::fs::remove_file(&path).await;
        result.map(|()| StepOutcome::Success)
    }
}

/// No real filesystem to archive against on this reference worker; records
/// the intent as a log line so the event stream still reflects the step.
pub struct ArchiveExecutor;

#[async_trait]
impl StepExecutor for ArchiveExecutor {
    fn kind(&self) -> &'static str {
        "archive"
    }

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        _ctx: &VariableContext,
        _cwd: &Path,
        out: &mpsc::Sender<EventKind>,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let pattern = match step {
            LeafStep::Archive { pattern } => pattern,
            _ => unreachable!("ArchiveExecutor only handles LeafStep::Archive"),
        };
        let _ = out
            .send(EventKind::StepOutput {
                stream: "stdout".to_string(),
                chunk: format!("archived artifacts matching '{pattern}'"),
            })
            .await;
        Ok(StepOutcome::Success)
    }
}

pub struct PublishTestResultsExecutor;

#[async_trait]
impl StepExecutor for PublishTestResultsExecutor {
    fn kind(&self) -> &'static str {
        "publish_test_results"
    }

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        _ctx: &VariableContext,
        _cwd: &Path,
        out: &mpsc::Sender<EventKind>,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let pattern = match step {
            LeafStep::PublishTestResults { pattern } => pattern,
            _ => unreachable!("PublishTestResultsExecutor only handles LeafStep::PublishTestResults"),
        };
        let _ = out
            .send(EventKind::StepOutput {
                stream: "stdout".to_string(),
                chunk: format!("published test results matching '{pattern}'"),
            })
            .await;
        Ok(StepOutcome::Success)
    }
}

/// Dispatches to an operator-registered hook by `(name, action)`. No
/// built-in extensions ship with the reference worker; an empty registry
/// makes every extension step fail with a clear error rather than silently
/// succeeding.
pub struct ExtensionExecutor {
    handlers: std::collections::HashMap<(String, String), Box<dyn Fn(&std::collections::HashMap<String, String>) -> Result<StepOutcome> + Send + Sync>>,
}

impl ExtensionExecutor {
    pub fn new() -> Self {
        Self {
            handlers: std::collections::HashMap::new(),
        }
    }

    /// Registers a hook for `(name, action)`. The handler returns
    /// `StepOutcome::Unstable` to mark the step's stage unstable without
    /// failing it, the only way a stage ever becomes unstable.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        action: impl Into<String>,
        handler: impl Fn(&std::collections::HashMap<String, String>) -> Result<StepOutcome> + Send + Sync + 'static,
    ) {
        self.handlers.insert((name.into(), action.into()), Box::new(handler));
    }
}

impl Default for ExtensionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ExtensionExecutor {
    fn kind(&self) -> &'static str {
        "extension"
    }

    async fn execute(
        &self,
        step: &LeafStep<'_>,
        _ctx: &VariableContext,
        _cwd: &Path,
        _out: &mpsc::Sender<EventKind>,
        _cancel: &CancellationToken,
    ) -> Result<StepOutcome> {
        let (name, action, params) = match step {
            LeafStep::Extension { name, action, params } => (*name, *action, *params),
            _ => unreachable!("ExtensionExecutor only handles LeafStep::Extension"),
        };
        let handler = self
            .handlers
            .get(&(name.to_string(), action.to_string()))
            .ok_or_else(|| Error::InvalidDefinition(format!("no extension registered for {name}.{action}")))?;
        handler(params)
    }
}

async fn run_shell(
    command: &str,
    ctx: &VariableContext,
    cwd: &Path,
    out: &mpsc::Sender<EventKind>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(&ctx.env)
        .kill_on_drop(true)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to spawn shell: {e}")))?;

    let stdout = child.stdout.take().expect("piped");
    let stderr = child.stderr.take().expect("piped");
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled(format!("shell step '{command}' cancelled")));
            }
            line = stdout_lines.next_line() => match line {
                Ok(Some(l)) => { let _ = out.send(EventKind::StepOutput { stream: "stdout".to_string(), chunk: l }).await; }
                Ok(None) => break,
                Err(_) => break,
            },
            line = stderr_lines.next_line() => match line {
                Ok(Some(l)) => { let _ = out.send(EventKind::StepOutput { stream: "stderr".to_string(), chunk: l }).await; }
                Ok(None) => {}
                Err(_) => {}
            },
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(Error::Cancelled(format!("shell step '{command}' cancelled")));
        }
        status = child.wait() => status.map_err(|e| Error::Internal(format!("failed waiting for shell: {e}")))?,
    };

    if status.success() {
        Ok(())
    } else {
        Err(Error::StepFailure {
            stage: String::new(),
            step: command.to_string(),
            exit_code: status.code().unwrap_or(-1),
        })
    }
}

pub fn default_registry() -> std::collections::HashMap<&'static str, Box<dyn StepExecutor>> {
    let mut registry: std::collections::HashMap<&'static str, Box<dyn StepExecutor>> = std::collections::HashMap::new();
    registry.insert("shell", Box::new(ShellExecutor));
    registry.insert("script", Box::new(ScriptExecutor));
    registry.insert("archive", Box::new(ArchiveExecutor));
    registry.insert("publish_test_results", Box::new(PublishTestResultsExecutor));
    registry.insert("extension", Box::new(ExtensionExecutor::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_executor_runs_and_captures_output() {
        let (tx, mut rx) = mpsc::channel(16);
        let ctx = VariableContext::new();
        let cwd = std::env::temp_dir();
        let cancel = CancellationToken::new();
        ShellExecutor
            .execute(&LeafStep::Shell { command: "echo hi" }, &ctx, &cwd, &tx, &cancel)
            .await
            .unwrap();
        drop(tx);
        let mut saw_hi = false;
        while let Some(event) = rx.recv().await {
            if let EventKind::StepOutput { chunk, .. } = event {
                if chunk == "hi" {
                    saw_hi = true;
                }
            }
        }
        assert!(saw_hi);
    }

    #[tokio::test]
    async fn shell_executor_surfaces_nonzero_exit() {
        let (tx, _rx) = mpsc::channel(16);
        let ctx = VariableContext::new();
        let cwd = std::env::temp_dir();
        let cancel = CancellationToken::new();
        let result = ShellExecutor
            .execute(&LeafStep::Shell { command: "exit 3" }, &ctx, &cwd, &tx, &cancel)
            .await;
        assert!(matches!(result, Err(Error::StepFailure { exit_code: 3, .. })));
    }

    #[tokio::test]
    async fn shell_executor_kills_child_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let ctx = VariableContext::new();
        let cwd = std::env::temp_dir();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let result = ShellExecutor
            .execute(&LeafStep::Shell { command: "sleep 30" }, &ctx, &cwd, &tx, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn extension_without_registration_errors() {
        let (tx, _rx) = mpsc::channel(16);
        let ctx = VariableContext::new();
        let cwd = std::env::temp_dir();
        let params = std::collections::HashMap::new();
        let cancel = CancellationToken::new();
        let result = ExtensionExecutor::new()
            .execute(
                &LeafStep::Extension { name: "slack", action: "notify", params: &params },
                &ctx,
                &cwd,
                &tx,
                &cancel,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn extension_handler_can_report_unstable() {
        let (tx, _rx) = mpsc::channel(16);
        let ctx = VariableContext::new();
        let cwd = std::env::temp_dir();
        let params = std::collections::HashMap::new();
        let cancel = CancellationToken::new();
        let mut executor = ExtensionExecutor::new();
        executor.register("flaky", "check", |_| Ok(StepOutcome::Unstable));
        let result = executor
            .execute(
                &LeafStep::Extension { name: "flaky", action: "check", params: &params },
                &ctx,
                &cwd,
                &tx,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(result, StepOutcome::Unstable);
    }
}
