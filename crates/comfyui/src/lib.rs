//! ComfyUI REST client.
//!
//! [`api`] wraps the `/prompt` endpoint; [`submitter`] layers per-job
//! client ids and outcome classification on top of it for batch runs.

pub mod api;
pub mod submitter;
