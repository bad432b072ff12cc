//! Configuration for provisioning and full attempts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::image::DEFAULT_DOCKER_IMAGE;
use super::task::DEFAULT_DATASET_PATH;

/// Default working directory inside the sandbox.
pub const DEFAULT_WORKDIR: &str = "/app";

/// Libraries every data task expects.
pub const DEFAULT_PACKAGES: [&str; 3] = ["pandas", "numpy", "matplotlib"];

/// Fallback API key written into the driver environment.
pub const PLACEHOLDER_API_KEY: &str = "sk-placeholder";

/// Fallback endpoint written into the driver environment.
pub const DEFAULT_DRIVER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Scratch file holding the full pip output.
const PIP_LOG_PATH: &str = "/tmp/pip-install.log";

/// Settings for bringing a sandbox to a runnable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Working directory inside the sandbox.
    pub workdir: String,
    /// Packages installed with pip before anything else.
    pub packages: Vec<String>,
    pub install_timeout: Duration,
    pub prepare_timeout: Duration,
    pub listing_timeout: Duration,
    /// Host path of the driver program to upload.
    pub driver_path: PathBuf,
}

impl ProvisionConfig {
    /// Defaults, uploading `driver_path` as the driver.
    pub fn new(driver_path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: DEFAULT_WORKDIR.to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            install_timeout: Duration::from_secs(600),
            prepare_timeout: Duration::from_secs(300),
            listing_timeout: Duration::from_secs(30),
            driver_path: driver_path.into(),
        }
    }

    /// Defaults, using the running executable as the driver.
    pub fn for_current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = timeout;
        self
    }

    /// Where the driver is installed inside the sandbox.
    pub fn driver_remote_path(&self) -> String {
        format!("{}/agent", self.workdir)
    }

    pub fn prepare_remote_path(&self) -> String {
        format!("{}/prepare_data.py", self.workdir)
    }

    /// Where the driver writes API failures inside the sandbox.
    pub fn error_log_remote_path(&self) -> String {
        format!("{}/agent_error.log", self.workdir)
    }

    /// Shell command that starts the driver against this workdir.
    pub fn launch_command(&self) -> String {
        format!(
            "{} run --workdir {} --error-log {} 2>&1",
            self.driver_remote_path(),
            self.workdir,
            self.error_log_remote_path()
        )
    }

    /// `pip install` command for the configured packages, if any.
    ///
    /// Only the last lines of pip's output are shown; the exit status is pip's.
    pub fn install_command(&self) -> Option<String> {
        if self.packages.is_empty() {
            return None;
        }
        Some(format!(
            "pip install {} > {log} 2>&1; rc=$?; tail -10 {log}; exit $rc",
            self.packages.join(" "),
            log = PIP_LOG_PATH
        ))
    }

    pub fn prepare_command(&self) -> String {
        format!("cd {} && python prepare_data.py 2>&1", self.workdir)
    }

    pub fn listing_command(&self) -> String {
        format!(
            "ls -lh {}/*.csv 2>/dev/null || echo 'WARNING: no CSV files found'",
            self.workdir
        )
    }
}

/// Settings for a full attempt on Docker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Dataset root holding one directory per task.
    pub dataset_path: PathBuf,
    /// Image used when a task declares none.
    pub default_image: String,
    pub cpu_cores: f64,
    pub memory_mb: u64,
    /// Ceiling on the driver's run time.
    pub driver_timeout: Duration,
    /// Leave the container running after the attempt.
    pub keep_sandbox: bool,
    /// Caller-supplied driver environment; never overwritten by defaults.
    pub env_vars: Vec<(String, String)>,
    pub provision: ProvisionConfig,
}

impl RunConfig {
    pub fn new(provision: ProvisionConfig) -> Self {
        Self {
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            default_image: DEFAULT_DOCKER_IMAGE.to_string(),
            cpu_cores: 2.0,
            memory_mb: 4096,
            driver_timeout: Duration::from_secs(3600),
            keep_sandbox: false,
            env_vars: Vec::new(),
            provision,
        }
    }

    pub fn with_dataset(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_path = path.into();
        self
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
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

    pub fn with_driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver_timeout = timeout;
        self
    }

    pub fn with_keep_sandbox(mut self, keep: bool) -> Self {
        self.keep_sandbox = keep;
        self
    }

    /// Add a caller environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }
}
