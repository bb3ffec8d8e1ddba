//! `synth-runner` -- batch LoRA image generation against ComfyUI.
//!
//! Submits `TOTAL_IMAGES` randomised variations of a workflow template
//! to a ComfyUI instance, then waits for the images to appear in the
//! ComfyUI output directory. See [`synth_runner::config::RunConfig`]
//! for the environment variables it reads.
//!
//! Exits non-zero when the run is aborted (bad configuration, template
//! or checkpoint) or when the images do not all appear in time.
//! Individual submission failures do not affect the exit status.

use std::process::ExitCode;

use synth_runner::config::RunConfig;
use synth_runner::orchestrator::{Orchestrator, RunOutcome};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "synth_runner=info,synth_comfyui=info,synth_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match RunConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        workflow = %config.workflow_path.display(),
        lora_dir = %config.lora_dir.display(),
        api_endpoint = %config.api_endpoint,
        total_images = config.total_images,
        "Loaded run configuration",
    );

    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise");
            return ExitCode::FAILURE;
        }
    };

    let report = orchestrator.run().await;

    match &report.outcome {
        RunOutcome::Completed { found } => {
            tracing::info!(found, "All images present");
            ExitCode::SUCCESS
        }
        RunOutcome::WaitFailed(e) => {
            tracing::error!(error = %e, "Images incomplete");
            ExitCode::FAILURE
        }
        RunOutcome::Aborted(_) => ExitCode::FAILURE,
    }
}
