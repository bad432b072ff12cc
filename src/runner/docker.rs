//! Docker-backed sandboxes using the bollard crate.
//!
//! A sandbox is a long-lived container kept alive with `sleep infinity`.
//! Commands run through `docker exec`, and files are copied in as
//! single-entry tar archives.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::sandbox::{CommandOutput, SandboxClient};
use crate::error::SandboxError;

const CPU_PERIOD: i64 = 100_000;

/// Exit status of a process killed with SIGKILL.
const KILLED_EXIT_CODE: i64 = 137;

/// Extra time allowed for the output stream to close after a kill.
const STREAM_GRACE: Duration = Duration::from_secs(10);

/// Parameters for a new sandbox container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name; also the sandbox id.
    pub name: String,
    pub image: String,
    /// Working directory, created by Docker if missing.
    pub working_dir: String,
    /// `KEY=value` pairs set on the container.
    pub env: Vec<String>,
    pub cpu_cores: f64,
    pub memory_mb: u64,
}

impl ContainerSpec {
    /// Spec for `image` with a unique name and the default limits (2 CPUs, 4 GB).
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            name: format!("data-tasks-{}", Uuid::new_v4()),
            image: image.into(),
            working_dir: "/app".to_string(),
            env: Vec::new(),
            cpu_cores: 2.0,
            memory_mb: 4096,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env.push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    pub fn with_cpu_cores(mut self, cores: f64) -> Self {
        self.cpu_cores = cores;
        self
    }

    pub fn with_memory_mb(mut self, mb: u64) -> Self {
        self.memory_mb = mb;
        self
    }

    fn host_config(&self) -> HostConfig {
        HostConfig {
            memory: Some((self.memory_mb * 1024 * 1024) as i64),
            cpu_period: Some(CPU_PERIOD),
            cpu_quota: Some((self.cpu_cores * CPU_PERIOD as f64) as i64),
            network_mode: Some("bridge".to_string()),
            ..Default::default()
        }
    }
}

/// `sh -c command` wrapped in coreutils `timeout`, so the sandbox kills it at
/// the deadline even when nobody is reading its output any more.
pub fn exec_argv(command: &str, timeout: Duration) -> Vec<String> {
    let seconds = (timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)).max(1);
    vec![
        "timeout".to_string(),
        "-s".to_string(),
        "KILL".to_string(),
        seconds.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}

/// `KEY=value` entries for an exec environment.
pub fn env_assignments(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}

/// Build a tar archive holding one file called `name`.
pub fn single_file_archive(name: &str, content: &[u8], mode: u32) -> std::io::Result<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_data);
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder.append_data(&mut header, name, content)?;
        builder.finish()?;
    }
    Ok(tar_data)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

/// Split a remote path into (parent directory, file name).
fn split_remote_path(remote_path: &str) -> Option<(String, String)> {
    let path = Path::new(remote_path);
    let name = path.file_name()?.to_string_lossy().into_owned();
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    Some((parent, name))
}

fn map_docker_error(sandbox_id: &str, e: bollard::errors::Error) -> SandboxError {
    if e.to_string().contains("No such container") {
        SandboxError::NotFound {
            id: sandbox_id.to_string(),
        }
    } else {
        SandboxError::ExecFailed(e.to_string())
    }
}

/// Sandbox client talking to the local Docker daemon.
pub struct DockerSandboxClient {
    docker: Docker,
}

impl DockerSandboxClient {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DaemonUnavailable(format!("Failed to connect: {e}")))?;
        Ok(Self { docker })
    }

    /// Wrap an existing bollard connection.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Pull `image` unless it is already present.
    pub async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::CreateFailed(format!("Failed to pull {image}: {e}")))?;
        }
        Ok(())
    }

    /// Create and start a sandbox, returning its id.
    pub async fn create_sandbox(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        self.ensure_image(&spec.image).await?;

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            working_dir: Some(spec.working_dir.clone()),
            host_config: Some(spec.host_config()),
            tty: Some(false),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| SandboxError::CreateFailed(format!("Failed to create container: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = self.remove_sandbox(&spec.name).await;
            return Err(SandboxError::CreateFailed(format!(
                "Failed to start container: {e}"
            )));
        }

        info!(sandbox = %spec.name, image = %spec.image, "Sandbox started");
        Ok(spec.name.clone())
    }

    /// Force-remove a sandbox and its volumes.
    pub async fn remove_sandbox(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(sandbox_id, Some(options))
            .await
            .map_err(|e| map_docker_error(sandbox_id, e))?;
        debug!(sandbox = %sandbox_id, "Sandbox removed");
        Ok(())
    }

    /// Run `command` with `env` set on the exec itself, so values never
    /// appear on a command line.
    pub async fn execute_command_with_env(
        &self,
        sandbox_id: &str,
        command: &str,
        working_dir: Option<&str>,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        let exec_options = CreateExecOptions {
            cmd: Some(exec_argv(command, timeout)),
            env: if env.is_empty() {
                None
            } else {
                Some(env_assignments(env))
            },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            working_dir: working_dir.map(str::to_string),
            ..Default::default()
        };
        let started = Instant::now();

        let exec = self
            .docker
            .create_exec(sandbox_id, exec_options)
            .await
            .map_err(|e| map_docker_error(sandbox_id, e))?;

        let mut output = CommandOutput::default();

        let collect = async {
            if let StartExecResults::Attached { output: mut stream, .. } = self
                .docker
                .start_exec(&exec.id, None)
                .await
                .map_err(|e| map_docker_error(sandbox_id, e))?
            {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            output.stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            output.stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(SandboxError::ExecFailed(format!(
                                "Error reading output: {e}"
                            )));
                        }
                    }
                }
            }
            Ok::<(), SandboxError>(())
        };

        let timed_out = || {
            warn!(sandbox = %sandbox_id, seconds = timeout.as_secs(), "Command timed out");
            SandboxError::Timeout {
                seconds: timeout.as_secs(),
            }
        };

        // The in-sandbox `timeout` kills the process; this only guards the stream.
        match tokio::time::timeout(timeout + STREAM_GRACE, collect).await {
            Ok(result) => result?,
            Err(_) => return Err(timed_out()),
        }

        let exec_info = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("Failed to inspect exec: {e}")))?;
        output.exit_code = exec_info.exit_code.unwrap_or(-1);

        if output.exit_code == KILLED_EXIT_CODE && started.elapsed() >= timeout {
            return Err(timed_out());
        }
        Ok(output)
    }
}

#[async_trait]
impl SandboxClient for DockerSandboxClient {
    async fn execute_command(
        &self,
        sandbox_id: &str,
        command: &str,
        working_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        self.execute_command_with_env(sandbox_id, command, working_dir, &BTreeMap::new(), timeout)
            .await
    }

    async fn upload_file(
        &self,
        sandbox_id: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), SandboxError> {
        let upload_error = |reason: String| SandboxError::UploadFailed {
            local: local_path.to_path_buf(),
            remote: remote_path.to_string(),
            reason,
        };

        let (parent_dir, file_name) = split_remote_path(remote_path)
            .ok_or_else(|| upload_error("remote path has no file name".to_string()))?;

        let metadata = tokio::fs::metadata(local_path).await?;
        let content = tokio::fs::read(local_path).await?;
        let tar_data = single_file_archive(&file_name, &content, file_mode(&metadata))?;

        self.docker
            .upload_to_container(
                sandbox_id,
                Some(UploadToContainerOptions {
                    path: parent_dir,
                    ..Default::default()
                }),
                tar_data.into(),
            )
            .await
            .map_err(|e| upload_error(e.to_string()))?;

        debug!(
            sandbox = %sandbox_id,
            remote = %remote_path,
            bytes = content.len(),
            "Uploaded file"
        );
        Ok(())
    }
}
