//! Narrow interface to the sandbox orchestrator.
//!
//! Provisioning only needs to run commands and copy files into an existing
//! sandbox; creating and destroying sandboxes belongs to the orchestrator
//! (see [`super::docker`] for the Docker-backed one).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SandboxError;

/// Result of a command run inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status; -1 when the orchestrator could not report one.
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, trimmed, for logging.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

/// Commands and file transfer against an already created sandbox.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Run `command` through a shell inside the sandbox.
    ///
    /// Returns [`SandboxError::Timeout`] if it does not finish within `timeout`.
    async fn execute_command(
        &self,
        sandbox_id: &str,
        command: &str,
        working_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError>;

    /// Copy the host file `local_path` to `remote_path` inside the sandbox.
    async fn upload_file(
        &self,
        sandbox_id: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            exit_code: 0,
            ..Default::default()
        };
        assert!(ok.success());
        let failed = CommandOutput {
            exit_code: 2,
            ..Default::default()
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            stdout: "Successfully installed pandas\n".to_string(),
            stderr: "  WARNING: pip is old \n".to_string(),
            exit_code: 0,
        };
        assert_eq!(
            output.combined(),
            "Successfully installed pandas\nWARNING: pip is old"
        );

        let only_err = CommandOutput {
            stderr: "boom".to_string(),
            ..Default::default()
        };
        assert_eq!(only_err.combined(), "boom");
    }
}
