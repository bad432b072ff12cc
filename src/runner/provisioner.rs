//! Brings a freshly created sandbox to a state where the driver can run.
//!
//! Steps run strictly in order: install packages, prepare data, install the
//! driver, build the driver environment. Only a failed driver upload aborts;
//! every other problem is logged and recorded in the [`ProvisionReport`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::{ProvisionConfig, DEFAULT_DRIVER_BASE_URL, PLACEHOLDER_API_KEY};
use super::sandbox::{CommandOutput, SandboxClient};
use super::task::TaskDescriptor;
use crate::error::{ProvisionError, SandboxError};

/// Provisioning steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    InstallPackages,
    PrepareData,
    InstallDriver,
}

/// How a step ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// Nothing to do for this task.
    Skipped { reason: String },
    /// The step failed but provisioning carried on.
    Degraded { reason: String },
}

/// Result of a successful provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub sandbox_id: String,
    pub task_name: String,
    pub steps: Vec<(ProvisionStep, StepOutcome)>,
    /// Environment for the driver process.
    pub env_vars: BTreeMap<String, String>,
    /// Command that starts the driver inside the sandbox.
    pub launch_command: String,
}

impl ProvisionReport {
    pub fn outcome(&self, step: ProvisionStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn is_degraded(&self) -> bool {
        self.steps
            .iter()
            .any(|(_, outcome)| matches!(outcome, StepOutcome::Degraded { .. }))
    }
}

/// Overlay the driver defaults onto `caller`, never replacing a caller value.
///
/// `host` looks up variables in the orchestrator's own environment.
pub fn build_env_vars<F>(
    caller: &BTreeMap<String, String>,
    task_name: &str,
    sandbox_id: &str,
    host: F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = caller.clone();

    let api_key = host("OPENAI_API_KEY").unwrap_or_else(|| PLACEHOLDER_API_KEY.to_string());
    env.entry("OPENAI_API_KEY".to_string()).or_insert(api_key);
    env.entry("OPENAI_BASE_URL".to_string())
        .or_insert_with(|| DEFAULT_DRIVER_BASE_URL.to_string());
    if let Some(model) = host("OPENAI_MODEL") {
        env.entry("OPENAI_MODEL".to_string()).or_insert(model);
    }
    env.entry("TASK_NAME".to_string())
        .or_insert_with(|| task_name.to_string());
    env.entry("SANDBOX_ID".to_string())
        .or_insert_with(|| sandbox_id.to_string());

    env
}

/// Read a host variable, treating empty values as unset.
pub fn host_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Provisions sandboxes for tasks through a [`SandboxClient`].
pub struct TaskProvisioner {
    client: Arc<dyn SandboxClient>,
    config: ProvisionConfig,
}

impl TaskProvisioner {
    pub fn new(client: Arc<dyn SandboxClient>, config: ProvisionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Provision `sandbox_id` for `task` and describe how to launch the driver.
    pub async fn provision(
        &self,
        sandbox_id: &str,
        task: &TaskDescriptor,
        caller_env: &BTreeMap<String, String>,
    ) -> Result<ProvisionReport, ProvisionError> {
        if !self.config.driver_path.is_file() {
            return Err(ProvisionError::DriverMissing(self.config.driver_path.clone()));
        }

        info!(task = %task.name, sandbox = %sandbox_id, "Provisioning sandbox");

        let mut steps = Vec::with_capacity(3);
        steps.push((
            ProvisionStep::InstallPackages,
            self.install_packages(sandbox_id).await,
        ));
        steps.push((
            ProvisionStep::PrepareData,
            self.prepare_data(sandbox_id, task).await,
        ));
        steps.push((
            ProvisionStep::InstallDriver,
            self.install_driver(sandbox_id).await?,
        ));

        let env_vars = build_env_vars(caller_env, &task.name, sandbox_id, host_env);

        info!(task = %task.name, sandbox = %sandbox_id, "Sandbox setup complete");
        Ok(ProvisionReport {
            sandbox_id: sandbox_id.to_string(),
            task_name: task.name.clone(),
            steps,
            env_vars,
            launch_command: self.config.launch_command(),
        })
    }

    async fn run(
        &self,
        sandbox_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        debug!(sandbox = %sandbox_id, command = %command, "Running provisioning command");
        self.client
            .execute_command(sandbox_id, command, None, timeout)
            .await
    }

    async fn install_packages(&self, sandbox_id: &str) -> StepOutcome {
        let Some(command) = self.config.install_command() else {
            return StepOutcome::Skipped {
                reason: "no packages configured".to_string(),
            };
        };

        info!(sandbox = %sandbox_id, packages = %self.config.packages.join(" "), "Installing packages");
        match self.run(sandbox_id, &command, self.config.install_timeout).await {
            Ok(output) if output.success() => {
                info!(sandbox = %sandbox_id, output = %output.combined(), "pip install finished");
                StepOutcome::Completed
            }
            Ok(output) => {
                warn!(
                    sandbox = %sandbox_id,
                    exit_code = output.exit_code,
                    output = %output.combined(),
                    "pip install failed"
                );
                StepOutcome::Degraded {
                    reason: format!("pip install exited with {}", output.exit_code),
                }
            }
            Err(e) => {
                warn!(sandbox = %sandbox_id, error = %e, "pip install failed");
                StepOutcome::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn prepare_data(&self, sandbox_id: &str, task: &TaskDescriptor) -> StepOutcome {
        let Some(script) = task.prepare_script() else {
            warn!(task = %task.name, "No prepare_data.py found, skipping data preparation");
            return StepOutcome::Skipped {
                reason: "task has no prepare_data.py".to_string(),
            };
        };

        let remote = self.config.prepare_remote_path();
        if let Err(e) = self.client.upload_file(sandbox_id, &remote, &script).await {
            warn!(task = %task.name, error = %e, "Failed to upload prepare_data.py");
            return StepOutcome::Degraded {
                reason: e.to_string(),
            };
        }

        info!(task = %task.name, "Running prepare_data.py to generate data files");
        let outcome = match self
            .run(sandbox_id, &self.config.prepare_command(), self.config.prepare_timeout)
            .await
        {
            Ok(output) if output.success() => {
                info!(task = %task.name, output = %output.combined(), "prepare_data.py finished");
                StepOutcome::Completed
            }
            Ok(output) => {
                warn!(
                    task = %task.name,
                    exit_code = output.exit_code,
                    output = %output.combined(),
                    "prepare_data.py failed"
                );
                StepOutcome::Degraded {
                    reason: format!("prepare_data.py exited with {}", output.exit_code),
                }
            }
            Err(e) => {
                warn!(task = %task.name, error = %e, "prepare_data.py failed");
                StepOutcome::Degraded {
                    reason: e.to_string(),
                }
            }
        };

        match self
            .run(sandbox_id, &self.config.listing_command(), self.config.listing_timeout)
            .await
        {
            Ok(output) => info!(task = %task.name, files = %output.combined(), "Data files"),
            Err(e) => warn!(task = %task.name, error = %e, "Failed to list data files"),
        }

        outcome
    }

    async fn install_driver(&self, sandbox_id: &str) -> Result<StepOutcome, ProvisionError> {
        let remote = self.config.driver_remote_path();
        self.client
            .upload_file(sandbox_id, &remote, &self.config.driver_path)
            .await
            .map_err(|source| ProvisionError::DriverUpload {
                remote: remote.clone(),
                source,
            })?;

        let chmod = format!("chmod +x {}", remote);
        let outcome = match self.run(sandbox_id, &chmod, self.config.listing_timeout).await {
            Ok(output) if output.success() => StepOutcome::Completed,
            Ok(output) => StepOutcome::Degraded {
                reason: format!("chmod exited with {}: {}", output.exit_code, output.combined()),
            },
            Err(e) => StepOutcome::Degraded {
                reason: e.to_string(),
            },
        };
        if let StepOutcome::Degraded { reason } = &outcome {
            warn!(sandbox = %sandbox_id, reason = %reason, "Could not mark driver executable");
        }

        info!(sandbox = %sandbox_id, remote = %remote, "Driver installed");
        Ok(outcome)
    }
}
