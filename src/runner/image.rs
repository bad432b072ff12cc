//! Per-task runtime image resolution.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use super::task::{TaskConfig, TASK_CONFIG_FILE};

/// Image used when a task does not declare one.
pub const DEFAULT_DOCKER_IMAGE: &str = "python:3.11-slim";

/// Why the default image was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No `task.toml`.
    NoConfig,
    /// `task.toml` exists but could not be read.
    Unreadable,
    /// `task.toml` is not valid TOML for a task config.
    Invalid,
    /// `task.toml` has no `[environment] docker_image`.
    NoOverride,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::NoConfig => "no_config",
            FallbackReason::Unreadable => "unreadable",
            FallbackReason::Invalid => "invalid",
            FallbackReason::NoOverride => "no_override",
        }
    }
}

/// Outcome of resolving a task's image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageResolution {
    Declared { image: String },
    Default { image: String, reason: FallbackReason },
}

impl ImageResolution {
    pub fn image(&self) -> &str {
        match self {
            ImageResolution::Declared { image } | ImageResolution::Default { image, .. } => image,
        }
    }

    pub fn into_image(self) -> String {
        match self {
            ImageResolution::Declared { image } | ImageResolution::Default { image, .. } => image,
        }
    }

    pub fn is_declared(&self) -> bool {
        matches!(self, ImageResolution::Declared { .. })
    }
}

/// Pick the image for the task in `task_dir`, falling back to `default_image`.
///
/// Never fails; problems with `task.toml` are logged and yield the default.
pub fn resolve_image(task_dir: &Path, default_image: &str) -> ImageResolution {
    let fallback = |reason| ImageResolution::Default {
        image: default_image.to_string(),
        reason,
    };

    let config_path = task_dir.join(TASK_CONFIG_FILE);
    if !config_path.is_file() {
        debug!(task_dir = %task_dir.display(), "No task.toml, using default image");
        return fallback(FallbackReason::NoConfig);
    }

    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %config_path.display(), error = %e, "Failed to read task.toml");
            return fallback(FallbackReason::Unreadable);
        }
    };

    let config = match TaskConfig::from_toml(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %config_path.display(), error = %e, "Failed to parse task.toml");
            return fallback(FallbackReason::Invalid);
        }
    };

    match config.docker_image() {
        Some(image) => {
            info!(task_dir = %task_dir.display(), image = %image, "Using task-specific image");
            ImageResolution::Declared {
                image: image.to_string(),
            }
        }
        None => {
            debug!(task_dir = %task_dir.display(), "task.toml declares no image");
            fallback(FallbackReason::NoOverride)
        }
    }
}
