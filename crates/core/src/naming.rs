//! Output naming conventions for a generation run.
//!
//! Every run writes into its own subdirectory of the ComfyUI output
//! root, named after the run start time so that runs sort
//! chronologically. Each image gets a filename prefix that encodes the
//! run label, the LoRA checkpoint step, its position and its seed.

use std::fmt;

use chrono::{DateTime, TimeZone};

/// `strftime` pattern for the run subdirectory name.
pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Extension (without the dot) of the files ComfyUI writes.
pub const OUTPUT_EXTENSION: &str = "png";

/// Subdirectory name for a run that started at `started_at`.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use synth_core::naming::run_subdirectory;
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
/// assert_eq!(run_subdirectory(&t), "2024-03-09_07-05-01");
/// ```
pub fn run_subdirectory<Tz>(started_at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    started_at.format(RUN_DIR_FORMAT).to_string()
}

/// Filename prefix for one generated image.
///
/// Convention: `{label}_step{target_step}_img{ordinal:04}_seed{seed}`.
/// The ordinal is one-based and padded to four digits; larger runs
/// simply widen the field.
///
/// ```
/// use synth_core::naming::filename_prefix;
///
/// assert_eq!(
///     filename_prefix("insulator", 300, 7, 1234),
///     "insulator_step300_img0007_seed1234",
/// );
/// ```
pub fn filename_prefix(label: &str, target_step: u32, ordinal: usize, seed: u64) -> String {
    format!("{label}_step{target_step}_img{ordinal:04}_seed{seed}")
}

/// Whether `file_name` carries the output extension.
pub fn is_output_file(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ext == OUTPUT_EXTENSION)
}
