//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`) using [`reqwest`]. The
//! client talks to ComfyUI directly: any `HTTP_PROXY`/`HTTPS_PROXY`
//! settings in the environment are ignored.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

/// Per-request timeout for a workflow submission.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    prompt_url: String,
}

/// Request body accepted by the `/prompt` endpoint.
#[derive(Debug, Serialize)]
struct PromptRequest<'a, W: ?Sized> {
    prompt: &'a W,
    client_id: &'a str,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI answered with something other than `200 OK`.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Build the submission URL from a `host:port` endpoint.
///
/// ```
/// assert_eq!(
///     synth_comfyui::api::prompt_url("127.0.0.1:8188"),
///     "http://127.0.0.1:8188/prompt",
/// );
/// ```
pub fn prompt_url(endpoint: &str) -> String {
    format!("http://{}/prompt", endpoint.trim_end_matches('/'))
}

impl ComfyUIApi {
    /// Create a new API client posting to `prompt_url`.
    ///
    /// * `prompt_url` - Full submission URL, e.g. `http://host:8188/prompt`.
    /// * `timeout`    - Upper bound on a single submission round trip.
    pub fn new(prompt_url: String, timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, prompt_url })
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, prompt_url: String) -> Self {
        Self { client, prompt_url }
    }

    pub fn prompt_url(&self) -> &str {
        &self.prompt_url
    }

    /// Queue a workflow for execution.
    ///
    /// Sends `{"prompt": <workflow>, "client_id": <client_id>}` as JSON.
    /// Only `200 OK` counts as accepted; the response body is not parsed.
    pub async fn submit_workflow<W>(
        &self,
        workflow: &W,
        client_id: &str,
    ) -> Result<(), ComfyUIApiError>
    where
        W: Serialize + ?Sized,
    {
        let body = PromptRequest {
            prompt: workflow,
            client_id,
        };

        let response = self
            .client
            .post(&self.prompt_url)
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Ensure the response is `200 OK`, otherwise return a
    /// [`ComfyUIApiError::ApiError`] carrying the status and body text.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
