//! Minimal generic process-backed `Invoker`/`LintRunner` for the CLI binary.
//!
//! This is not a specific third-party LLM CLI integration (no vendor flags,
//! no streamed session protocol) — it is a thin "run a configured command,
//! feed prompts on stdin, capture stdout" bridge so `quasar apply` has
//! something runnable out of the box. The vendor-specific backend remains
//! out of scope; callers embedding this crate as a library are expected to
//! supply their own `Invoker` for production use.

use crate::agent::{InvokeResult, Invoker, LintOutcome, LintRunner, Role};
use crate::errors::QuasarError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs `command` with the combined prompt on stdin for every role.
pub struct ShellInvoker {
    command: String,
}

impl ShellInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Invoker for ShellInvoker {
    async fn invoke(
        &self,
        role: Role,
        system_prompt: &str,
        user_prompt: &str,
        working_dir: &Path,
        model: Option<&str>,
        _budget_usd: f64,
    ) -> Result<InvokeResult, QuasarError> {
        let program = model.unwrap_or(&self.command);
        let start = Instant::now();

        let mut child = Command::new(program)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| QuasarError::UnhealableError {
                phase_id: format!("{role:?}"),
                message: format!("spawning '{program}': {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let combined = format!("{system_prompt}\n\n---\n\n{user_prompt}\n");
            let _ = stdin.write_all(combined.as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| QuasarError::UnhealableError {
                phase_id: format!("{role:?}"),
                message: format!("waiting on '{program}': {e}"),
            })?;

        Ok(InvokeResult {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
            cost_usd: 0.0,
            duration_ms: start.elapsed().as_millis() as u64,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }
}

/// Runs a configured lint/test command in `working_dir`; success is the
/// process exit status.
pub struct ShellLintRunner {
    command: String,
    args: Vec<String>,
}

impl ShellLintRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl LintRunner for ShellLintRunner {
    async fn run(&self, working_dir: &Path) -> LintOutcome {
        let result = Command::new(&self.command)
            .args(&self.args)
            .current_dir(working_dir)
            .output()
            .await;

        match result {
            Ok(output) => LintOutcome {
                success: output.status.success(),
                output: String::from_utf8_lossy(&output.stdout).into_owned()
                    + &String::from_utf8_lossy(&output.stderr),
                filter_name: Some(self.command.clone()),
            },
            Err(e) => LintOutcome {
                success: false,
                output: format!("failed to run '{}': {e}", self.command),
                filter_name: Some(self.command.clone()),
            },
        }
    }
}
