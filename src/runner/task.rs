//! Task discovery and per-task files.
//!
//! A dataset is a directory with one sub-directory per task:
//!
//! ```text
//! tasks/
//!   sales-forecast/
//!     instruction.md
//!     task.toml                 (optional)
//!     environment/
//!       prepare_data.py         (optional)
//!     tests/                    (used by the external verifier)
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::TaskError;

/// Default dataset location.
pub const DEFAULT_DATASET_PATH: &str = "./tasks";

pub const TASK_CONFIG_FILE: &str = "task.toml";
pub const INSTRUCTION_FILE: &str = "instruction.md";
pub const PREPARE_SCRIPT: &str = "environment/prepare_data.py";

/// Parsed `task.toml`. Unknown tables and keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub environment: EnvironmentSection,
}

/// `[environment]` table of `task.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSection {
    /// Runtime image overriding the caller's default.
    #[serde(default)]
    pub docker_image: Option<String>,
}

impl TaskConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Declared image override, ignoring blank values.
    pub fn docker_image(&self) -> Option<&str> {
        self.environment
            .docker_image
            .as_deref()
            .filter(|image| !image.trim().is_empty())
    }
}

/// One task directory. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Directory name under the dataset root.
    pub name: String,
    pub dir: PathBuf,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// Load the task called `name` from `dataset`.
    pub fn load(dataset: &Path, name: &str) -> Result<Self, TaskError> {
        let dir = dataset.join(name);
        if !dir.is_dir() {
            return Err(TaskError::TaskNotFound {
                name: name.to_string(),
                dataset: dataset.to_path_buf(),
            });
        }
        Ok(Self::new(name, dir))
    }

    pub fn instruction_path(&self) -> PathBuf {
        self.dir.join(INSTRUCTION_FILE)
    }

    /// The data-preparation program, if the task ships one.
    pub fn prepare_script(&self) -> Option<PathBuf> {
        let path = self.dir.join(PREPARE_SCRIPT);
        path.is_file().then_some(path)
    }
}

/// List the tasks under `dataset`, sorted by name.
///
/// With a filter, only the named tasks are returned (still sorted); a name
/// with no directory is an error.
pub fn discover_tasks(
    dataset: &Path,
    filter: Option<&[String]>,
) -> Result<Vec<TaskDescriptor>, TaskError> {
    if !dataset.is_dir() {
        return Err(TaskError::DatasetNotFound(dataset.to_path_buf()));
    }

    let mut tasks = Vec::new();
    for entry in WalkDir::new(dataset)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            TaskError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        tasks.push(TaskDescriptor::new(name, entry.into_path()));
    }

    let Some(names) = filter else {
        return Ok(tasks);
    };

    if let Some(missing) = names.iter().find(|n| !tasks.iter().any(|t| &t.name == *n)) {
        return Err(TaskError::TaskNotFound {
            name: missing.clone(),
            dataset: dataset.to_path_buf(),
        });
    }
    tasks.retain(|t| names.contains(&t.name));
    Ok(tasks)
}
