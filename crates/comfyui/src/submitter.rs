//! One-shot job submission with outcome classification.
//!
//! [`JobSubmitter`] posts a single workflow per call under a fresh
//! client id and folds every possible failure into a
//! [`SubmissionOutcome`] instead of an error. Batch runs log the outcome
//! and move on to the next job; nothing is retried here.

use std::fmt;

use synth_core::graph::JobGraph;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Result of submitting one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// ComfyUI answered `200 OK` and queued the job.
    Accepted,
    /// ComfyUI answered with a non-200 status.
    Rejected { status: u16 },
    /// The request never completed (connection refused, DNS, timeout).
    Transport(String),
    /// The exchange broke at the HTTP layer (bad body, bad redirect, ...).
    Protocol(String),
    /// Anything else.
    Unknown(String),
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Short machine-friendly label for logs.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected { .. } => "backend_rejected",
            Self::Transport(_) => "transport_error",
            Self::Protocol(_) => "protocol_error",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::Rejected { status } => write!(f, "rejected with HTTP {status}"),
            Self::Transport(reason) => write!(f, "connection error: {reason}"),
            Self::Protocol(reason) => write!(f, "protocol error: {reason}"),
            Self::Unknown(reason) => write!(f, "unknown error: {reason}"),
        }
    }
}

impl From<&ComfyUIApiError> for SubmissionOutcome {
    fn from(err: &ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::ApiError { status, .. } => Self::Rejected { status: *status },
            ComfyUIApiError::Request(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                Self::Transport(e.to_string())
            }
            ComfyUIApiError::Request(e)
                if e.is_builder() || e.is_body() || e.is_decode() || e.is_redirect() =>
            {
                Self::Protocol(e.to_string())
            }
            ComfyUIApiError::Request(e) => Self::Unknown(e.to_string()),
        }
    }
}

/// Submits job graphs to ComfyUI one at a time.
pub struct JobSubmitter {
    api: ComfyUIApi,
    client_label: String,
}

impl JobSubmitter {
    /// * `client_label` - prefix for generated client ids, e.g. `insulator`.
    pub fn new(api: ComfyUIApi, client_label: impl Into<String>) -> Self {
        Self {
            api,
            client_label: client_label.into(),
        }
    }

    /// A client id unique to one submission: `<label>-generator-<uuid>`.
    pub fn new_client_id(&self) -> String {
        format!("{}-generator-{}", self.client_label, uuid::Uuid::new_v4())
    }

    /// Submit `graph` once and classify what happened.
    pub async fn submit(&self, graph: &JobGraph) -> SubmissionOutcome {
        let client_id = self.new_client_id();

        match self.api.submit_workflow(graph, &client_id).await {
            Ok(()) => {
                tracing::info!(client_id = %client_id, "Workflow submitted to ComfyUI");
                SubmissionOutcome::Accepted
            }
            Err(e) => {
                let outcome = SubmissionOutcome::from(&e);
                tracing::warn!(
                    client_id = %client_id,
                    url = %self.api.prompt_url(),
                    classification = outcome.classification(),
                    error = %e,
                    "Workflow submission failed",
                );
                outcome
            }
        }
    }
}
