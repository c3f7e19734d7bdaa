//! Run context shared with every task action

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

/// Per-run incremental-skip flags.
///
/// Incremental task actions record here whether they found their project up
/// to date, so that later tasks of the same project can skip their work too.
/// Once the build file is known to be out of date every query answers `false`
/// for the remainder of the run.
#[derive(Debug, Default)]
pub struct IncrementalState {
    incremental_successes: Mutex<HashSet<String>>,
    build_file_out_of_date: AtomicBool,
}

impl IncrementalState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the most recent incremental task of `project` was up to date
    pub fn previous_task_was_incremental_success(&self, project: &str) -> bool {
        !self.is_build_file_out_of_date() && self.successes().contains(project)
    }

    /// Record that an incremental task of `project` found nothing to do
    pub fn set_incremental_success(&self, project: &str) {
        debug!(project, "incremental success recorded");
        self.successes().insert(project.to_string());
    }

    /// Record that an incremental task of `project` had to run its body
    pub fn clear_incremental_success(&self, project: &str) {
        if self.successes().remove(project) {
            debug!(project, "incremental success cleared");
        }
    }

    /// Disable incremental skipping for the rest of the run
    pub fn set_build_file_out_of_date(&self) {
        if !self.build_file_out_of_date.swap(true, Ordering::SeqCst) {
            info!("build file changed, incremental skipping disabled");
        }
    }

    /// Whether the build configuration changed since the previous run
    pub fn is_build_file_out_of_date(&self) -> bool {
        self.build_file_out_of_date.load(Ordering::SeqCst)
    }

    /// Projects currently flagged as up to date, sorted
    pub fn incremental_successes(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.successes().iter().cloned().collect();
        projects.sort();
        projects
    }

    /// Forget per-project flags left over from an earlier run.
    ///
    /// The build-file flag is kept: it is set by a detector that runs
    /// before execution starts.
    pub fn begin_run(&self) {
        self.successes().clear();
    }

    /// Clear every flag
    pub fn reset(&self) {
        self.successes().clear();
        self.build_file_out_of_date.store(false, Ordering::SeqCst);
    }

    fn successes(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panicking action cannot leave the set half-written.
        self.incremental_successes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// State owned by one run and passed to every task action
#[derive(Debug)]
pub struct RunContext {
    root_dir: PathBuf,
    dry_run: bool,
    incremental: IncrementalState,
}

impl RunContext {
    /// Create a context rooted at the build directory
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            dry_run: false,
            incremental: IncrementalState::new(),
        }
    }

    /// Set whether actions should avoid side effects
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Build root directory
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Whether this is a dry run
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Incremental-skip flags for this run
    pub fn incremental(&self) -> &IncrementalState {
        &self.incremental
    }
}
