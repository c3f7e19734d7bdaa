//! Shell command task action

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use kiln_core::RunContext;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::checksum::{Checksum, ChecksumStore, TaskChecksums};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::task::{TaskAction, TaskId, TaskResult};

/// File globs whose checksums decide whether an incremental task is up to date
#[derive(Debug, Clone, Default)]
pub struct IncrementalInputs {
    /// Input file globs, relative to the build root
    pub inputs: Vec<String>,
    /// Output file globs, relative to the build root
    pub outputs: Vec<String>,
}

impl IncrementalInputs {
    fn checksums(&self, root: &Path) -> TaskChecksums {
        TaskChecksums {
            inputs: Checksum::compute(root, &self.inputs),
            outputs: Checksum::compute(root, &self.outputs),
        }
    }
}

/// Runs `sh -c <command>` in the build root.
///
/// Output is streamed line by line to the reporter as [`TaskEvent::Output`].
/// The action blocks on the ambient tokio runtime, so it must run on a
/// blocking worker (as the executor does) or outside any runtime.
#[derive(Clone)]
pub struct ShellAction {
    id: TaskId,
    project: String,
    command: String,
    incremental: Option<(IncrementalInputs, Arc<ChecksumStore>)>,
    reporter: Arc<dyn TaskReporter>,
}

impl ShellAction {
    /// Create an action for `id` running `command`
    pub fn new(id: TaskId, project: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id,
            project: project.into(),
            command: command.into(),
            incremental: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Make the action incremental: it is skipped when its inputs and outputs
    /// match the checksums recorded after its last successful run
    pub fn incremental(mut self, inputs: IncrementalInputs, store: Arc<ChecksumStore>) -> Self {
        self.incremental = Some((inputs, store));
        self
    }

    /// Send output lines to `reporter` instead of the log
    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn execute(&self, root: &Path) -> TaskResult {
        debug!(task = %self.id, command = %self.command, "spawning shell command");
        let run = self.run_command(root);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(run),
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(run),
                Err(e) => TaskResult::failure(format!("Failed to start runtime: {}", e)),
            },
        }
    }

    async fn run_command(&self, root: &Path) -> TaskResult {
        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return TaskResult::failure(format!("Failed to spawn: {}", e)),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (_, stderr_lines) = tokio::join!(
            self.stream(stdout, false),
            self.stream(stderr, true)
        );

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => return TaskResult::failure(format!("Failed to wait: {}", e)),
        };

        if status.success() {
            TaskResult::success()
        } else {
            let code = status.code().unwrap_or(-1);
            TaskResult::failure(format!(
                "Command exited with code {}: {}",
                code,
                stderr_lines.join("\n")
            ))
        }
    }

    /// Forward every line of `pipe` to the reporter, returning the lines read
    async fn stream<R>(&self, pipe: Option<R>, is_stderr: bool) -> Vec<String>
    where
        R: AsyncRead + Unpin,
    {
        let mut collected = Vec::new();
        let Some(pipe) = pipe else {
            return collected;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            self.reporter.report(&TaskEvent::Output {
                id: self.id.clone(),
                line: line.clone(),
                is_stderr,
            });
            collected.push(line);
        }
        collected
    }
}

impl fmt::Debug for ShellAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellAction")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("command", &self.command)
            .field("incremental", &self.incremental.as_ref().map(|(i, _)| i))
            .finish_non_exhaustive()
    }
}

impl TaskAction for ShellAction {
    fn run(&self, ctx: &RunContext) -> TaskResult {
        if ctx.is_dry_run() {
            info!(task = %self.id, command = %self.command, "dry run, not executing");
            return TaskResult::success();
        }

        let Some((inputs, store)) = &self.incremental else {
            return self.execute(ctx.root_dir());
        };

        let state = ctx.incremental();
        let before = inputs.checksums(ctx.root_dir());
        if !state.is_build_file_out_of_date() && store.is_up_to_date(&self.id, &before) {
            info!(task = %self.id, project = %self.project, "up to date");
            state.set_incremental_success(&self.project);
            return TaskResult::up_to_date();
        }

        state.clear_incremental_success(&self.project);
        let result = self.execute(ctx.root_dir());
        if result.success {
            store.record(&self.id, inputs.checksums(ctx.root_dir()));
        } else {
            store.invalidate(&self.id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_shell_success() {
        let temp = TempDir::new().unwrap();
        let action = ShellAction::new(TaskId::new("touch"), "core", "touch made.txt");
        let result = action.run(&RunContext::new(temp.path()));

        assert!(result.success);
        assert!(temp.path().join("made.txt").exists());
    }

    #[test]
    fn test_shell_failure_message() {
        let temp = TempDir::new().unwrap();
        let action = ShellAction::new(TaskId::new("fail"), "core", "echo broken >&2; exit 3");
        let result = action.run(&RunContext::new(temp.path()));

        assert!(!result.success);
        assert_eq!(
            result.message.as_deref(),
            Some("Command exited with code 3: broken")
        );
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let temp = TempDir::new().unwrap();
        let action = ShellAction::new(TaskId::new("touch"), "core", "touch made.txt");
        let result = action.run(&RunContext::new(temp.path()).with_dry_run(true));

        assert!(result.success);
        assert!(!temp.path().join("made.txt").exists());
    }

    #[test]
    fn test_incremental_skip() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("in.txt"), "source").unwrap();
        let store = Arc::new(ChecksumStore::open(ChecksumStore::default_path(temp.path())).unwrap());
        let inputs = IncrementalInputs {
            inputs: vec!["in.txt".to_string()],
            outputs: vec!["out.txt".to_string()],
        };
        let action = ShellAction::new(TaskId::new("copy"), "core", "cp in.txt out.txt")
            .incremental(inputs, store.clone());

        // first run executes
        let ctx = RunContext::new(temp.path());
        assert_eq!(action.run(&ctx), TaskResult::success());
        assert!(!ctx.incremental().previous_task_was_incremental_success("core"));

        // second run is up to date
        let ctx = RunContext::new(temp.path());
        assert_eq!(action.run(&ctx), TaskResult::up_to_date());
        assert!(ctx.incremental().previous_task_was_incremental_success("core"));

        // a changed input forces a run
        fs::write(temp.path().join("in.txt"), "edited").unwrap();
        let ctx = RunContext::new(temp.path());
        assert_eq!(action.run(&ctx), TaskResult::success());
        assert_eq!(fs::read_to_string(temp.path().join("out.txt")).unwrap(), "edited");
    }

    #[test]
    fn test_build_file_out_of_date_forces_run() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("in.txt"), "source").unwrap();
        let store = Arc::new(ChecksumStore::open(ChecksumStore::default_path(temp.path())).unwrap());
        let inputs = IncrementalInputs {
            inputs: vec!["in.txt".to_string()],
            outputs: vec![],
        };
        let action = ShellAction::new(TaskId::new("count"), "core", "echo x >> runs.txt")
            .incremental(inputs, store);

        action.run(&RunContext::new(temp.path()));

        let ctx = RunContext::new(temp.path());
        ctx.incremental().set_build_file_out_of_date();
        assert_eq!(action.run(&ctx), TaskResult::success());

        let runs = fs::read_to_string(temp.path().join("runs.txt")).unwrap();
        assert_eq!(runs.lines().count(), 2);
    }

    #[test]
    fn test_output_is_streamed_to_reporter() {
        let temp = TempDir::new().unwrap();
        let reporter = Arc::new(crate::reporter::CollectingReporter::default());
        let action = ShellAction::new(TaskId::new("talk"), "core", "echo one; echo two >&2")
            .with_reporter(reporter.clone());

        assert!(action.run(&RunContext::new(temp.path())).success);

        let lines: Vec<(String, bool)> = reporter
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Output {
                    line, is_stderr, ..
                } => Some((line, is_stderr)),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec![("one".to_string(), false), ("two".to_string(), true)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_on_blocking_worker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let action = ShellAction::new(TaskId::new("touch"), "core", "touch made.txt");

        let result = tokio::task::spawn_blocking(move || action.run(&RunContext::new(root)))
            .await
            .unwrap();

        assert!(result.success);
        assert!(temp.path().join("made.txt").exists());
    }

    #[test]
    fn test_build_file_change_forces_run_on_later_invocation() {
        let temp = TempDir::new().unwrap();
        let build_file = temp.path().join("kiln.toml");
        let store_path = ChecksumStore::default_path(temp.path());
        fs::write(temp.path().join("in.txt"), "source").unwrap();
        let inputs = IncrementalInputs {
            inputs: vec!["in.txt".to_string()],
            outputs: vec!["out.txt".to_string()],
        };

        // first invocation records checksums for the v1 command
        fs::write(&build_file, "command = \"v1\"").unwrap();
        let store = Arc::new(ChecksumStore::open(store_path.clone()).unwrap());
        let ctx = RunContext::new(temp.path());
        store.check_build_file(&build_file, &ctx).unwrap();
        let action = ShellAction::new(TaskId::new("b"), "core", "echo v1 > out.txt")
            .incremental(inputs.clone(), store.clone());
        assert_eq!(action.run(&ctx), TaskResult::success());
        store.save().unwrap();

        // second invocation edits the build file but the task is withheld
        fs::write(&build_file, "command = \"v2\"").unwrap();
        let store = Arc::new(ChecksumStore::open(store_path.clone()).unwrap());
        let ctx = RunContext::new(temp.path());
        assert!(store.check_build_file(&build_file, &ctx).unwrap());
        store.save().unwrap();

        // third invocation: build file unchanged since, yet the task must run
        let store = Arc::new(ChecksumStore::open(store_path).unwrap());
        let ctx = RunContext::new(temp.path());
        assert!(!store.check_build_file(&build_file, &ctx).unwrap());
        let action = ShellAction::new(TaskId::new("b"), "core", "echo v2 > out.txt")
            .incremental(inputs, store.clone());
        assert_eq!(action.run(&ctx), TaskResult::success());
        assert_eq!(
            fs::read_to_string(temp.path().join("out.txt")).unwrap().trim(),
            "v2"
        );
    }
}
