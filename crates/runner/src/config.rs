use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use synth_core::naming::run_subdirectory;

/// Run configuration loaded from environment variables.
///
/// Built once at startup and passed by reference to everything that
/// needs it. The run start time is captured here so that the output
/// subdirectory is fixed for the whole run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Full path of the API-format workflow template.
    pub workflow_path: PathBuf,
    /// Directory searched for the LoRA checkpoint.
    pub lora_dir: PathBuf,
    /// ComfyUI `host:port`.
    pub api_endpoint: String,
    /// ComfyUI output root; the run writes into a subdirectory of it.
    pub output_root: PathBuf,
    /// Number of jobs to submit.
    pub total_images: usize,
    /// LoRA checkpoint step to generate with.
    pub target_step: u32,
    /// Label used in filenames and client ids.
    pub run_label: String,
    /// Trigger word shown in front of each prompt in the logs.
    pub prompt_prefix: String,
    pub directory_timeout: Duration,
    pub image_timeout: Duration,
    pub poll_interval: Duration,
    pub started_at: DateTime<FixedOffset>,
}

/// Errors raised while reading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

const DEFAULT_TOTAL_IMAGES: usize = 3000;
const DEFAULT_TARGET_STEP: u32 = 300;
const DEFAULT_RUN_LABEL: &str = "insulator";
const DEFAULT_PROMPT_PREFIX: &str = "k4s4";
const DEFAULT_DIRECTORY_TIMEOUT_SECS: u64 = 3000;
const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 30000;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

impl RunConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                  | Default     |
    /// |--------------------------|-------------|
    /// | `API_WORKFLOW_DIR`       | required    |
    /// | `API_WORKFLOW_FILE`      | required    |
    /// | `LORA_DIR`               | required    |
    /// | `API_ENDPOINT`           | required    |
    /// | `COMFYUI_OUTPUT_DIR`     | required    |
    /// | `TOTAL_IMAGES`           | `3000`      |
    /// | `TARGET_STEP`            | `300`       |
    /// | `RUN_LABEL`              | `insulator` |
    /// | `PROMPT_PREFIX`          | `k4s4`      |
    /// | `DIRECTORY_TIMEOUT_SECS` | `3000`      |
    /// | `IMAGE_TIMEOUT_SECS`     | `30000`     |
    /// | `POLL_INTERVAL_SECS`     | `5`         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), Local::now().fixed_offset())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F, started_at: DateTime<FixedOffset>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let workflow_dir = PathBuf::from(required("API_WORKFLOW_DIR")?);
        let workflow_file = required("API_WORKFLOW_FILE")?;
        let lora_dir = PathBuf::from(required("LORA_DIR")?);
        let api_endpoint = required("API_ENDPOINT")?;
        let output_root = PathBuf::from(required("COMFYUI_OUTPUT_DIR")?);

        let total_images = parse_or(&lookup, "TOTAL_IMAGES", DEFAULT_TOTAL_IMAGES)?;
        let target_step = parse_or(&lookup, "TARGET_STEP", DEFAULT_TARGET_STEP)?;
        let directory_timeout_secs =
            parse_or(&lookup, "DIRECTORY_TIMEOUT_SECS", DEFAULT_DIRECTORY_TIMEOUT_SECS)?;
        let image_timeout_secs = parse_or(&lookup, "IMAGE_TIMEOUT_SECS", DEFAULT_IMAGE_TIMEOUT_SECS)?;
        let poll_interval_secs = parse_or(&lookup, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            workflow_path: workflow_dir.join(workflow_file),
            lora_dir,
            api_endpoint,
            output_root,
            total_images,
            target_step,
            run_label: lookup("RUN_LABEL").unwrap_or_else(|| DEFAULT_RUN_LABEL.into()),
            prompt_prefix: lookup("PROMPT_PREFIX").unwrap_or_else(|| DEFAULT_PROMPT_PREFIX.into()),
            directory_timeout: Duration::from_secs(directory_timeout_secs),
            image_timeout: Duration::from_secs(image_timeout_secs),
            poll_interval: Duration::from_secs(poll_interval_secs),
            started_at,
        })
    }

    /// Subdirectory (relative to the output root) this run writes into.
    pub fn run_subdirectory(&self) -> String {
        run_subdirectory(&self.started_at)
    }

    /// Absolute location where this run's images will appear.
    pub fn output_dir(&self) -> PathBuf {
        self.output_root.join(self.run_subdirectory())
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
