//! Completion detection by polling the ComfyUI output directory.
//!
//! ComfyUI gives no push notification when a batch is done, so the
//! watcher infers completion from side effects: first the run's output
//! directory must appear, then it must hold at least the expected number
//! of images. Each phase polls on a fixed interval under its own
//! timeout, and the second phase is only entered once the first
//! succeeds. Completion therefore depends on the timeouts being
//! generous relative to ComfyUI throughput.

use std::path::{Path, PathBuf};
use std::time::Duration;

use synth_core::naming::is_output_file;
use tokio::time::Instant;

/// Read-only view of where the outputs land.
pub trait OutputProbe {
    /// Whether the output directory exists yet.
    fn directory_exists(&self) -> bool;
    /// Number of output files currently in the directory.
    fn count_outputs(&self) -> usize;
}

/// [`OutputProbe`] over a real directory.
///
/// Only immediate entries are counted, by name; file contents are never
/// read.
#[derive(Debug, Clone)]
pub struct DirectoryProbe {
    dir: PathBuf,
}

impl DirectoryProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl OutputProbe for DirectoryProbe {
    fn directory_exists(&self) -> bool {
        self.dir.is_dir()
    }

    fn count_outputs(&self) -> usize {
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_name().to_str().is_some_and(is_output_file))
                .count(),
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "Output directory not readable");
                0
            }
        }
    }
}

/// Poll timing for both phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// Budget for the output directory to appear.
    pub directory_timeout: Duration,
    /// Budget for the expected number of images to appear.
    pub file_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            directory_timeout: Duration::from_secs(3000),
            file_timeout: Duration::from_secs(30000),
        }
    }
}

/// Terminal failures of the wait phases.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("output directory did not appear within {}s", .timeout.as_secs())]
    DirectoryTimeout { timeout: Duration },

    #[error("only {found} of {expected} images appeared within {}s", .timeout.as_secs())]
    FilesTimeout {
        found: usize,
        expected: usize,
        timeout: Duration,
    },
}

/// Two-phase wait: await-directory, then await-files.
pub struct CompletionWatcher<P> {
    probe: P,
    config: WatchConfig,
}

impl<P: OutputProbe> CompletionWatcher<P> {
    pub fn new(probe: P, config: WatchConfig) -> Self {
        Self { probe, config }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Wait until `expected` outputs exist. Returns the count observed.
    pub async fn wait(&self, expected: usize) -> Result<usize, WatchError> {
        self.await_directory().await?;
        self.await_files(expected).await
    }

    async fn await_directory(&self) -> Result<(), WatchError> {
        let timeout = self.config.directory_timeout;
        let start = Instant::now();

        while start.elapsed() < timeout {
            if self.probe.directory_exists() {
                tracing::info!(
                    waited_secs = start.elapsed().as_secs(),
                    "Output directory created"
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        tracing::error!(timeout_secs = timeout.as_secs(), "Timed out waiting for output directory");
        Err(WatchError::DirectoryTimeout { timeout })
    }

    async fn await_files(&self, expected: usize) -> Result<usize, WatchError> {
        let timeout = self.config.file_timeout;
        let start = Instant::now();
        let mut found = 0;

        while start.elapsed() < timeout {
            found = self.probe.count_outputs();
            if found >= expected {
                tracing::info!(found, expected, "All images generated");
                return Ok(found);
            }
            tracing::debug!(found, expected, "Waiting for images");
            tokio::time::sleep(self.config.poll_interval).await;
        }

        tracing::error!(
            found,
            expected,
            timeout_secs = timeout.as_secs(),
            "Timed out waiting for images"
        );
        Err(WatchError::FilesTimeout {
            found,
            expected,
            timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs::File;

    use super::*;

    /// Directory appears on poll `dir_on_poll` (1-based); file poll `n`
    /// reports `counts[n - 1]`, repeating the last value afterwards.
    struct ScriptedProbe {
        dir_on_poll: Option<usize>,
        counts: Vec<usize>,
        dir_polls: Cell<usize>,
        file_polls: Cell<usize>,
    }

    impl ScriptedProbe {
        fn new(dir_on_poll: Option<usize>, counts: Vec<usize>) -> Self {
            Self {
                dir_on_poll,
                counts,
                dir_polls: Cell::new(0),
                file_polls: Cell::new(0),
            }
        }
    }

    impl OutputProbe for ScriptedProbe {
        fn directory_exists(&self) -> bool {
            self.dir_polls.set(self.dir_polls.get() + 1);
            self.dir_on_poll.is_some_and(|n| self.dir_polls.get() >= n)
        }

        fn count_outputs(&self) -> usize {
            self.file_polls.set(self.file_polls.get() + 1);
            let idx = (self.file_polls.get() - 1).min(self.counts.len() - 1);
            self.counts[idx]
        }
    }

    fn config() -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_secs(5),
            directory_timeout: Duration::from_secs(60),
            file_timeout: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn directory_never_appears() {
        let watcher = CompletionWatcher::new(ScriptedProbe::new(None, vec![0]), config());
        let start = Instant::now();

        let err = watcher.wait(2).await.unwrap_err();

        assert_eq!(
            err,
            WatchError::DirectoryTimeout {
                timeout: Duration::from_secs(60)
            }
        );
        assert!(start.elapsed() >= Duration::from_secs(60));
        // Polled at t = 0, 5, ..., 55.
        assert_eq!(watcher.probe().dir_polls.get(), 12);
        assert_eq!(watcher.probe().file_polls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn files_accumulate_too_slowly() {
        let watcher = CompletionWatcher::new(ScriptedProbe::new(Some(1), vec![0, 1]), config());
        let start = Instant::now();

        let err = watcher.wait(3).await.unwrap_err();

        assert_eq!(
            err,
            WatchError::FilesTimeout {
                found: 1,
                expected: 3,
                timeout: Duration::from_secs(120)
            }
        );
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(err.to_string(), "only 1 of 3 images appeared within 120s");
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_poll_reaching_count() {
        let watcher =
            CompletionWatcher::new(ScriptedProbe::new(Some(2), vec![0, 1, 2, 5]), config());
        let start = Instant::now();

        let found = watcher.wait(2).await.unwrap();

        assert_eq!(found, 2);
        assert_eq!(watcher.probe().dir_polls.get(), 2);
        assert_eq!(watcher.probe().file_polls.get(), 3);
        // One sleep before the directory shows, two before the count does.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn more_files_than_expected_is_success() {
        let watcher = CompletionWatcher::new(ScriptedProbe::new(Some(1), vec![7]), config());
        assert_eq!(watcher.wait(4).await.unwrap(), 7);
        assert_eq!(watcher.probe().file_polls.get(), 1);
    }

    #[test]
    fn directory_probe_counts_only_matching_entries() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("a_00001_.png")).unwrap();
        File::create(dir.path().join("a_00002_.png")).unwrap();
        File::create(dir.path().join("a_00001_.json")).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        File::create(dir.path().join("nested").join("b_00001_.png")).unwrap();

        let probe = DirectoryProbe::new(dir.path());
        assert!(probe.directory_exists());
        assert_eq!(probe.count_outputs(), 2);
    }

    #[test]
    fn directory_probe_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let probe = DirectoryProbe::new(dir.path().join("2025-01-01_00-00-00"));
        assert!(!probe.directory_exists());
        assert_eq!(probe.count_outputs(), 0);
    }
}
