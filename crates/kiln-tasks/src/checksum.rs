//! Content checksums for incremental tasks and build-file staleness

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use kiln_core::RunContext;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::task::TaskId;

/// SHA-256 over a set of files
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl Checksum {
    /// Checksum every file matched by `globs` under `root`.
    ///
    /// Paths are hashed relative to `root` and sorted, so the result only
    /// depends on file names and contents.
    pub fn compute(root: &Path, globs: &[String]) -> Self {
        let mut file_hashes: BTreeMap<String, String> = BTreeMap::new();

        for pattern in globs {
            let full_pattern = root.join(pattern).to_string_lossy().to_string();
            let Ok(paths) = glob::glob(&full_pattern) else {
                debug!(pattern = %pattern, "invalid glob pattern ignored");
                continue;
            };
            for entry in paths.flatten() {
                if !entry.is_file() {
                    continue;
                }
                let relative = entry
                    .strip_prefix(root)
                    .unwrap_or(&entry)
                    .to_string_lossy()
                    .to_string();
                match fs::read(&entry) {
                    Ok(contents) => {
                        file_hashes.insert(relative, format!("{:x}", Sha256::digest(&contents)));
                    }
                    Err(e) => {
                        // keyed by name so an unreadable input differs from a missing one
                        warn!(path = %relative, error = %e, "failed to read file for checksum");
                        file_hashes.insert(relative, format!("unreadable:{}", e.kind()));
                    }
                }
            }
        }

        let mut hasher = Sha256::new();
        for (path, hash) in &file_hashes {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(hash.as_bytes());
        }
        Checksum(format!("{:x}", hasher.finalize()))
    }

    /// Checksum a single file
    pub fn of_file(path: &Path) -> Result<Self, ChecksumError> {
        let contents = fs::read(path)?;
        Ok(Checksum(format!("{:x}", Sha256::digest(&contents))))
    }
}

/// Checksums an incremental task recorded after its last successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChecksums {
    /// Checksum of the input files
    pub inputs: Checksum,
    /// Checksum of the output files
    pub outputs: Checksum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChecksumEntry<T> {
    value: T,
    recorded_at: String,
}

impl<T> ChecksumEntry<T> {
    fn now(value: T) -> Self {
        Self {
            value,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChecksumFile {
    #[serde(default)]
    build_file: Option<ChecksumEntry<Checksum>>,
    #[serde(default)]
    tasks: BTreeMap<TaskId, ChecksumEntry<TaskChecksums>>,
}

/// Persisted checksums, shared by every incremental action of a run
#[derive(Debug)]
pub struct ChecksumStore {
    path: PathBuf,
    state: Mutex<ChecksumFile>,
}

impl ChecksumStore {
    /// Open the store at `path`; a missing file yields an empty store
    pub fn open(path: PathBuf) -> Result<Self, ChecksumError> {
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            ChecksumFile::default()
        };
        debug!(path = %path.display(), "checksum store opened");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Default location under the build root
    pub fn default_path(root: &Path) -> PathBuf {
        root.join(kiln_core::config::STATE_DIR).join("checksums.json")
    }

    /// Whether `task` last recorded exactly these checksums
    pub fn is_up_to_date(&self, task: &TaskId, current: &TaskChecksums) -> bool {
        self.state()
            .tasks
            .get(task)
            .is_some_and(|entry| &entry.value == current)
    }

    /// Record checksums after a successful run of `task`
    pub fn record(&self, task: &TaskId, checksums: TaskChecksums) {
        debug!(task = %task, "recording checksums");
        self.state()
            .tasks
            .insert(task.clone(), ChecksumEntry::now(checksums));
    }

    /// Forget a task's checksums so its next run is never skipped
    pub fn invalidate(&self, task: &TaskId) {
        self.state().tasks.remove(task);
    }

    /// Compare the build file against its last recorded checksum.
    ///
    /// When it changed, or was never recorded, incremental skipping is
    /// disabled for the rest of the run and every recorded task checksum is
    /// dropped, so tasks that do not run under the new build file are not
    /// considered up to date later. Returns whether it changed.
    pub fn check_build_file(
        &self,
        build_file: &Path,
        ctx: &RunContext,
    ) -> Result<bool, ChecksumError> {
        let current = Checksum::of_file(build_file)?;
        let mut state = self.state();
        let changed = state
            .build_file
            .as_ref()
            .map_or(true, |entry| entry.value != current);

        if changed {
            info!(path = %build_file.display(), "build file out of date");
            ctx.incremental().set_build_file_out_of_date();
            state.tasks.clear();
            state.build_file = Some(ChecksumEntry::now(current));
        }
        Ok(changed)
    }

    /// Write the store back to disk
    pub fn save(&self) -> Result<(), ChecksumError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.state())?;
        fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), "checksum store saved");
        Ok(())
    }

    /// Location of the store
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, ChecksumFile> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Checksum errors
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// IO error
    #[error("Checksum IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Checksum serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn globs(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_checksum_deterministic() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.rs"), "fn a() {}").unwrap();
        fs::write(temp.path().join("src/b.rs"), "fn b() {}").unwrap();

        let first = Checksum::compute(temp.path(), &globs(&["src/*.rs"]));
        let second = Checksum::compute(temp.path(), &globs(&["src/*.rs"]));
        assert_eq!(first, second);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("input.txt"), "one").unwrap();
        let before = Checksum::compute(temp.path(), &globs(&["*.txt"]));

        fs::write(temp.path().join("input.txt"), "two").unwrap();
        let after = Checksum::compute(temp.path(), &globs(&["*.txt"]));
        assert_ne!(before, after);
    }

    #[test]
    fn test_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = ChecksumStore::default_path(temp.path());
        let task = TaskId::new("compile");
        let checksums = TaskChecksums {
            inputs: Checksum("in".to_string()),
            outputs: Checksum("out".to_string()),
        };

        let store = ChecksumStore::open(path.clone()).unwrap();
        assert!(!store.is_up_to_date(&task, &checksums));
        store.record(&task, checksums.clone());
        store.save().unwrap();

        let reopened = ChecksumStore::open(path).unwrap();
        assert!(reopened.is_up_to_date(&task, &checksums));

        reopened.invalidate(&task);
        assert!(!reopened.is_up_to_date(&task, &checksums));
    }

    #[test]
    fn test_check_build_file() {
        let temp = TempDir::new().unwrap();
        let build_file = temp.path().join("kiln.toml");
        fs::write(&build_file, "name = \"demo\"").unwrap();
        let store = ChecksumStore::open(ChecksumStore::default_path(temp.path())).unwrap();

        // never recorded
        let ctx = RunContext::new(temp.path());
        assert!(store.check_build_file(&build_file, &ctx).unwrap());
        assert!(ctx.incremental().is_build_file_out_of_date());

        // unchanged
        let ctx = RunContext::new(temp.path());
        assert!(!store.check_build_file(&build_file, &ctx).unwrap());
        assert!(!ctx.incremental().is_build_file_out_of_date());

        // edited
        fs::write(&build_file, "name = \"renamed\"").unwrap();
        let ctx = RunContext::new(temp.path());
        assert!(store.check_build_file(&build_file, &ctx).unwrap());
        assert!(ctx.incremental().is_build_file_out_of_date());
    }

    #[test]
    fn test_build_file_change_drops_task_checksums() {
        let temp = TempDir::new().unwrap();
        let build_file = temp.path().join("kiln.toml");
        fs::write(&build_file, "name = \"demo\"").unwrap();
        let path = ChecksumStore::default_path(temp.path());
        let task = TaskId::new("compile");
        let checksums = TaskChecksums {
            inputs: Checksum("in".to_string()),
            outputs: Checksum("out".to_string()),
        };

        let store = ChecksumStore::open(path.clone()).unwrap();
        store.check_build_file(&build_file, &RunContext::new(temp.path())).unwrap();
        store.record(&task, checksums.clone());
        store.save().unwrap();

        // the build file changes and the task never runs under it
        fs::write(&build_file, "name = \"edited\"").unwrap();
        let store = ChecksumStore::open(path.clone()).unwrap();
        assert!(store.check_build_file(&build_file, &RunContext::new(temp.path())).unwrap());
        store.save().unwrap();

        // the next run sees an unchanged build file but no stale task entry
        let store = ChecksumStore::open(path).unwrap();
        let ctx = RunContext::new(temp.path());
        assert!(!store.check_build_file(&build_file, &ctx).unwrap());
        assert!(!store.is_up_to_date(&task, &checksums));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_input_differs_from_missing() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let missing = Checksum::compute(temp.path(), &globs(&["*.txt"]));

        let input = temp.path().join("secret.txt");
        fs::write(&input, "data").unwrap();
        fs::set_permissions(&input, fs::Permissions::from_mode(0o000)).unwrap();
        let unreadable = Checksum::compute(temp.path(), &globs(&["*.txt"]));
        fs::set_permissions(&input, fs::Permissions::from_mode(0o644)).unwrap();

        assert_ne!(missing, unreadable);
    }
}
