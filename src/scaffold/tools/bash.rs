//! Bash tool for executing shell commands.
//!
//! Commands run through `sh -c` in the context's working directory. The
//! driver itself runs inside the sandbox, so no container plumbing is needed
//! here.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ExecutionContext, Tool, ToolError, ToolKind, ToolResult};

/// Parameters for the bash tool.
#[derive(Debug, Clone, Deserialize)]
struct BashParams {
    /// The shell command to execute.
    command: String,
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Render as the text returned to the model.
    ///
    /// Empty streams are omitted; the exit code is always present.
    pub fn render(&self, ctx: &ExecutionContext) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.stdout.is_empty() {
            parts.push(format!("stdout:\n{}", ctx.truncate(&self.stdout)));
        }
        if !self.stderr.is_empty() {
            parts.push(format!("stderr:\n{}", ctx.truncate(&self.stderr)));
        }
        parts.push(format!("exit_code: {}", self.exit_code));
        parts.join("\n")
    }
}

/// Tool for executing shell commands.
#[derive(Debug, Default)]
pub struct BashTool;

impl BashTool {
    /// Create a new BashTool instance.
    pub fn new() -> Self {
        Self
    }

    /// Run `command` under `sh -c`, killing it if it outlives the context timeout.
    pub async fn run(
        &self,
        command: &str,
        ctx: &ExecutionContext,
    ) -> Result<CommandOutput, ToolError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if ctx.working_dir.is_dir() {
            cmd.current_dir(&ctx.working_dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to spawn shell: {}", e)))?;

        let output = timeout(ctx.bash_timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Timeout {
                seconds: ctx.bash_timeout.as_secs(),
            })?
            .map_err(|e| ToolError::ExecutionFailed(format!("Error reading output: {}", e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl Tool for BashTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Bash
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, and exit code. \
         Use this to run Python scripts, inspect files, install packages, etc."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to run."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: BashParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        let output = self.run(&params.command, ctx).await?;
        tracing::debug!(
            command = %params.command,
            exit_code = output.exit_code,
            "bash tool finished"
        );

        let rendered = output.render(ctx);
        if output.exit_code == 0 {
            Ok(ToolResult::success(rendered))
        } else {
            Ok(ToolResult::failure(rendered))
        }
    }
}
