//! Batch run sequencing.
//!
//! A run goes through three stages:
//!
//! 1. **Prepare** -- load the template, check that every parameterised
//!    node exists, locate the LoRA checkpoint and write the run-wide
//!    fields (checkpoint path, half precision) into a base graph.
//! 2. **Submit** -- for each image, draw a [`Variation`], apply it to a
//!    fresh copy of the base graph and submit it. Failed submissions are
//!    logged and skipped.
//! 3. **Watch** -- wait for ComfyUI to write the images.
//!
//! Any failure in stage 1 aborts the run before anything is submitted.
//! The watcher waits for the planned image count even when some
//! submissions failed, in which case it will time out.

use rand::Rng;
use synth_comfyui::api::{prompt_url, ComfyUIApi, ComfyUIApiError, SUBMIT_TIMEOUT};
use synth_comfyui::submitter::JobSubmitter;
use synth_core::artifact::find_checkpoint;
use synth_core::error::CoreError;
use synth_core::graph::JobGraph;
use synth_core::mutator::{GraphMutator, OutputNaming};
use synth_core::variation::{Variation, VariationGenerator};

use crate::config::RunConfig;
use crate::watcher::{CompletionWatcher, DirectoryProbe, OutputProbe, WatchConfig, WatchError};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to build ComfyUI client: {0}")]
    Client(#[from] ComfyUIApiError),
}

/// Result of the submission loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionSummary {
    /// Jobs submitted, successfully or not.
    pub attempted: usize,
    /// Jobs ComfyUI accepted.
    pub accepted: usize,
    /// One-based ordinals of the jobs that failed to submit.
    pub failed: Vec<usize>,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// All expected images were observed.
    Completed { found: usize },
    /// A wait phase timed out.
    WaitFailed(WatchError),
    /// The template or checkpoint was unusable; the watcher never ran.
    Aborted(RunError),
}

/// Final report of a run.
#[derive(Debug)]
pub struct RunReport {
    /// Number of images the watcher waited for.
    pub expected_count: usize,
    pub submissions: SubmissionSummary,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

/// Drives one batch run.
pub struct Orchestrator {
    config: RunConfig,
    submitter: JobSubmitter,
    mutator: GraphMutator,
    variations: VariationGenerator<'static>,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        let api = ComfyUIApi::new(prompt_url(&config.api_endpoint), SUBMIT_TIMEOUT)?;
        let submitter = JobSubmitter::new(api, config.run_label.clone());
        Ok(Self::with_parts(
            config,
            submitter,
            GraphMutator::default(),
            VariationGenerator::default(),
        ))
    }

    pub fn with_parts(
        config: RunConfig,
        submitter: JobSubmitter,
        mutator: GraphMutator,
        variations: VariationGenerator<'static>,
    ) -> Self {
        Self {
            config,
            submitter,
            mutator,
            variations,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run against the real output directory with a thread-local RNG.
    pub async fn run(&self) -> RunReport {
        let probe = DirectoryProbe::new(self.config.output_dir());
        self.run_with(probe, &mut rand::rng()).await
    }

    /// Run with an explicit output probe and entropy source.
    pub async fn run_with<P, R>(&self, probe: P, rng: &mut R) -> RunReport
    where
        P: OutputProbe,
        R: Rng,
    {
        tracing::info!(
            target_step = self.config.target_step,
            total_images = self.config.total_images,
            output_dir = %self.config.output_dir().display(),
            "Starting image generation",
        );

        let report = match self.generate(rng).await {
            Err(e) => {
                tracing::error!(error = %e, "Run aborted");
                RunReport {
                    expected_count: 0,
                    submissions: SubmissionSummary::default(),
                    outcome: RunOutcome::Aborted(e),
                }
            }
            Ok(submissions) => {
                let expected_count = self.config.total_images;
                let outcome = self.watch(probe, expected_count, &submissions).await;
                RunReport {
                    expected_count,
                    submissions,
                    outcome,
                }
            }
        };

        tracing::info!(
            expected_count = report.expected_count,
            accepted = report.submissions.accepted,
            failed = report.submissions.failed.len(),
            success = report.is_success(),
            "Generation task finished",
        );
        report
    }

    /// Prepare the base graph and submit every planned image.
    pub async fn generate<R: Rng>(&self, rng: &mut R) -> Result<SubmissionSummary, RunError> {
        let base = self.prepare()?;
        self.submit_all(&base, rng).await
    }

    /// Load the template and write the run-wide fields into it.
    pub fn prepare(&self) -> Result<JobGraph, RunError> {
        let mut base = JobGraph::load(&self.config.workflow_path)?;
        self.mutator.validate(&base)?;

        let lora_path = find_checkpoint(&self.config.lora_dir, self.config.target_step)?;
        self.mutator.set_model(&mut base, &lora_path)?;
        self.mutator.set_half_precision(&mut base)?;

        Ok(base)
    }

    /// Submit one job per planned image, each built from a fresh copy of
    /// `base`. Submission failures are recorded and the loop continues;
    /// a graph the mutator cannot write to aborts the loop.
    pub async fn submit_all<R: Rng>(
        &self,
        base: &JobGraph,
        rng: &mut R,
    ) -> Result<SubmissionSummary, RunError> {
        let total = self.config.total_images;
        let subdirectory = self.config.run_subdirectory();
        let naming = OutputNaming {
            subdirectory: &subdirectory,
            label: &self.config.run_label,
            target_step: self.config.target_step,
        };

        let mut summary = SubmissionSummary::default();

        for index in 0..total {
            let variation = self.variations.generate(index, rng);
            let mut graph = base.clone();

            let filename_prefix = self.mutator.apply_variation(&mut graph, &variation, &naming)?;

            log_iteration(&variation, total, &self.config.prompt_prefix, &filename_prefix);

            let outcome = self.submitter.submit(&graph).await;
            summary.attempted += 1;
            if outcome.is_success() {
                summary.accepted += 1;
            } else {
                tracing::warn!(
                    image = variation.ordinal(),
                    total,
                    outcome = %outcome,
                    "Submission failed, continuing with next image",
                );
                summary.failed.push(variation.ordinal());
            }
        }

        Ok(summary)
    }

    async fn watch<P: OutputProbe>(
        &self,
        probe: P,
        expected: usize,
        submissions: &SubmissionSummary,
    ) -> RunOutcome {
        if expected == 0 {
            return RunOutcome::Completed { found: 0 };
        }
        if submissions.accepted < expected {
            tracing::warn!(
                expected,
                accepted = submissions.accepted,
                "Fewer jobs accepted than planned; waiting for the planned count anyway",
            );
        }

        let watcher = CompletionWatcher::new(
            probe,
            WatchConfig {
                poll_interval: self.config.poll_interval,
                directory_timeout: self.config.directory_timeout,
                file_timeout: self.config.image_timeout,
            },
        );

        match watcher.wait(expected).await {
            Ok(found) => RunOutcome::Completed { found },
            Err(e) => RunOutcome::WaitFailed(e),
        }
    }
}

fn log_iteration(variation: &Variation, total: usize, prompt_prefix: &str, filename_prefix: &str) {
    tracing::info!(
        image = variation.ordinal(),
        total,
        seed = variation.seed,
        prompt = %variation.full_prompt(prompt_prefix),
        filename_prefix,
        "Submitting image",
    );
}
