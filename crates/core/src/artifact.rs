//! LoRA checkpoint lookup.
//!
//! Training writes one file per saved step, named like
//! `<run>_checkpoint-300_lora.safetensors`. A generation run targets a
//! single step and passes the checkpoint to ComfyUI as an absolute path,
//! so ComfyUI never has to resolve it against its own model folders.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Suffix every LoRA checkpoint file carries.
pub const LORA_SUFFIX: &str = "_lora.safetensors";

/// Whether `file_name` is the LoRA checkpoint saved at `step`.
///
/// The step must not be followed by another digit, so step `300` does
/// not match `checkpoint-3000`.
pub fn matches_checkpoint(file_name: &str, step: u32) -> bool {
    if !file_name.ends_with(LORA_SUFFIX) {
        return false;
    }
    let marker = format!("checkpoint-{step}");
    file_name.match_indices(&marker).any(|(pos, _)| {
        !file_name[pos + marker.len()..]
            .starts_with(|c: char| c.is_ascii_digit())
    })
}

/// Find the checkpoint for `step` in `dir` and return its absolute path.
///
/// Entries are examined in name order, so the result is stable when
/// several files match.
pub fn find_checkpoint(dir: &Path, step: u32) -> Result<PathBuf, CoreError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CoreError::ArtifactDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| matches_checkpoint(name, step))
        .collect();
    names.sort();

    let Some(name) = names.into_iter().next() else {
        return Err(CoreError::ArtifactNotFound {
            dir: dir.to_path_buf(),
            step,
        });
    };

    let path = std::path::absolute(dir.join(&name)).map_err(|source| CoreError::ArtifactDir {
        path: dir.to_path_buf(),
        source,
    })?;

    tracing::info!(step, path = %path.display(), "Selected LoRA checkpoint");
    Ok(path)
}
