//! Domain logic for batch LoRA image generation against ComfyUI.
//!
//! Everything here is free of network I/O: the job graph model, the
//! per-iteration variation source, the graph mutator, output naming,
//! and the checkpoint lookup used to pick the model artifact.

pub mod artifact;
pub mod error;
pub mod graph;
pub mod mutator;
pub mod naming;
pub mod variation;
