//! Runs one attempt end to end on Docker.
//!
//! Create sandbox, provision, launch the driver, tear down. Grading the
//! artifacts left in the sandbox is up to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use super::config::RunConfig;
use super::docker::{ContainerSpec, DockerSandboxClient};
use super::image::{resolve_image, ImageResolution};
use super::provisioner::{ProvisionReport, TaskProvisioner};
use super::sandbox::SandboxClient;
use super::task::TaskDescriptor;
use crate::error::{ProvisionError, SandboxError, TaskError};

/// Directory holding the task statement inside the sandbox.
pub const REMOTE_TASK_DIR: &str = "/task";

/// Where the task statement is placed inside the sandbox.
pub const REMOTE_INSTRUCTION_PATH: &str = "/task/instruction.md";

/// Errors that abort an attempt.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

/// How the driver process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DriverStatus {
    Exited { exit_code: i64 },
    TimedOut { seconds: u64 },
}

/// Record of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptResult {
    pub task_name: String,
    pub sandbox_id: String,
    pub image: ImageResolution,
    pub provision: ProvisionReport,
    pub driver: DriverStatus,
    /// Combined driver stdout and stderr.
    pub driver_output: String,
    pub duration_secs: f64,
}

/// Runs tasks in throwaway Docker sandboxes.
pub struct TaskRunner {
    docker: Arc<DockerSandboxClient>,
    provisioner: TaskProvisioner,
    config: RunConfig,
}

impl TaskRunner {
    pub fn new(docker: Arc<DockerSandboxClient>, config: RunConfig) -> Self {
        let client: Arc<dyn SandboxClient> = docker.clone();
        let provisioner = TaskProvisioner::new(client, config.provision.clone());
        Self {
            docker,
            provisioner,
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run one attempt of `task`. The sandbox is removed afterwards unless
    /// `keep_sandbox` is set.
    pub async fn run_task(&self, task: &TaskDescriptor) -> Result<AttemptResult, RunnerError> {
        let start = Instant::now();
        let image = resolve_image(&task.dir, &self.config.default_image);

        let spec = ContainerSpec::new(image.image())
            .with_working_dir(self.config.provision.workdir.clone())
            .with_cpu_cores(self.config.cpu_cores)
            .with_memory_mb(self.config.memory_mb);
        let sandbox_id = self.docker.create_sandbox(&spec).await?;

        let result = self.attempt(&sandbox_id, task, image, start).await;

        if self.config.keep_sandbox {
            info!(sandbox = %sandbox_id, "Keeping sandbox");
        } else if let Err(e) = self.docker.remove_sandbox(&sandbox_id).await {
            warn!(sandbox = %sandbox_id, error = %e, "Failed to remove sandbox");
        }

        match &result {
            Ok(attempt) => info!(
                task = %task.name,
                driver = ?attempt.driver,
                duration_secs = attempt.duration_secs,
                "Attempt finished"
            ),
            Err(e) => error!(task = %task.name, error = %e, "Attempt failed"),
        }
        result
    }

    async fn attempt(
        &self,
        sandbox_id: &str,
        task: &TaskDescriptor,
        image: ImageResolution,
        start: Instant,
    ) -> Result<AttemptResult, RunnerError> {
        let instruction = task.instruction_path();
        if instruction.is_file() {
            let mkdir = format!("mkdir -p {}", REMOTE_TASK_DIR);
            let uploaded = match self
                .docker
                .execute_command(sandbox_id, &mkdir, None, Duration::from_secs(30))
                .await
            {
                Ok(_) => {
                    self.docker
                        .upload_file(sandbox_id, REMOTE_INSTRUCTION_PATH, &instruction)
                        .await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = uploaded {
                warn!(task = %task.name, error = %e, "Failed to upload instruction.md");
            }
        } else {
            warn!(task = %task.name, "Task has no instruction.md");
        }

        let caller_env: BTreeMap<String, String> = self.config.env_vars.iter().cloned().collect();
        let report = self
            .provisioner
            .provision(sandbox_id, task, &caller_env)
            .await?;

        info!(task = %task.name, sandbox = %sandbox_id, "Launching driver");

        let (driver, driver_output) = match self
            .docker
            .execute_command_with_env(
                sandbox_id,
                &report.launch_command,
                Some(&self.config.provision.workdir),
                &report.env_vars,
                self.config.driver_timeout,
            )
            .await
        {
            Ok(output) => (
                DriverStatus::Exited {
                    exit_code: output.exit_code,
                },
                output.combined(),
            ),
            Err(SandboxError::Timeout { seconds }) => {
                (DriverStatus::TimedOut { seconds }, String::new())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(AttemptResult {
            task_name: task.name.clone(),
            sandbox_id: sandbox_id.to_string(),
            image,
            provision: report,
            driver,
            driver_output,
            duration_secs: start.elapsed().as_secs_f64(),
        })
    }
}
