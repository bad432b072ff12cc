//! Sandbox provisioning and attempt execution.
//!
//! # Architecture
//!
//! ```text
//! task dir → resolve_image → create sandbox → TaskProvisioner → driver (agent run) → verifier
//! ```
//!
//! The provisioner only needs the narrow [`SandboxClient`] trait, so it can
//! run against any orchestrator. [`DockerSandboxClient`] is the bundled
//! implementation and [`TaskRunner`] drives a full attempt with it.
//!
//! # Example
//!
//! ```ignore
//! use data_tasks::runner::{discover_tasks, DockerSandboxClient, ProvisionConfig, RunConfig, TaskRunner};
//!
//! let config = RunConfig::new(ProvisionConfig::for_current_exe()?).with_dataset("./tasks");
//! let runner = TaskRunner::new(Arc::new(DockerSandboxClient::new()?), config);
//! for task in discover_tasks(&runner.config().dataset_path, None)? {
//!     let attempt = runner.run_task(&task).await?;
//!     println!("{}: {:?}", attempt.task_name, attempt.driver);
//! }
//! ```

pub mod config;
pub mod docker;
pub mod executor;
pub mod image;
pub mod provisioner;
pub mod sandbox;
pub mod task;

pub use config::{ProvisionConfig, RunConfig, DEFAULT_WORKDIR};
pub use docker::{ContainerSpec, DockerSandboxClient};
pub use executor::{AttemptResult, DriverStatus, RunnerError, TaskRunner};
pub use image::{resolve_image, FallbackReason, ImageResolution, DEFAULT_DOCKER_IMAGE};
pub use provisioner::{
    build_env_vars, ProvisionReport, ProvisionStep, StepOutcome, TaskProvisioner,
};
pub use sandbox::{CommandOutput, SandboxClient};
pub use task::{discover_tasks, TaskConfig, TaskDescriptor, DEFAULT_DATASET_PATH};
