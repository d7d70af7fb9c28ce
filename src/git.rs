//! Out-of-process git execution.
//!
//! Everything the crate knows about a repository comes from git child
//! processes started through a [`GitExecutor`]. [`RepoState`] wraps an
//! executor with the repository's paths and the per-repository gate that
//! keeps index/worktree mutations strictly one at a time.

use error_set::error_set;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, RwLockWriteGuard};

error_set! {
    /// Errors from running git child processes
    ProcessError := {
        #[display("Failed to spawn {program}: {message}")]
        SpawnFailed { program: String, message: String },
        #[display("Failed to write to git stdin: {message}")]
        StdinFailed { message: String },
        #[display("Failed to wait for git {command}: {message}")]
        WaitFailed { command: String, message: String },
        #[display("git {command} exited with {code}: {stderr}")]
        ExitError { command: String, code: i32, stderr: String },
        #[display("Unexpected output from git {command}: {message}")]
        UnexpectedOutput { command: String, message: String },
    }
}

/// Raw result of one git invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Return stdout, or the untouched stderr as an error on non-zero exit.
    pub fn into_stdout(self, args: &[String]) -> Result<String, ProcessError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(ProcessError::ExitError {
                command: describe(args),
                code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Per-call options: working directory and optional stdin payload
#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    pub cwd: &'a Path,
    pub stdin: Option<&'a [u8]>,
}

impl<'a> RunOptions<'a> {
    pub fn new(cwd: &'a Path) -> Self {
        Self { cwd, stdin: None }
    }

    pub fn with_stdin(mut self, stdin: &'a [u8]) -> Self {
        self.stdin = Some(stdin);
        self
    }
}

/// Runs git out-of-process. One child per call, no shell in between.
pub trait GitExecutor: Send + Sync + 'static {
    fn run(
        &self,
        args: &[String],
        options: RunOptions<'_>,
    ) -> impl Future<Output = Result<GitOutput, ProcessError>> + Send;
}

impl<T: GitExecutor> GitExecutor for Arc<T> {
    fn run(
        &self,
        args: &[String],
        options: RunOptions<'_>,
    ) -> impl Future<Output = Result<GitOutput, ProcessError>> + Send {
        (**self).run(args, options)
    }
}

/// [`GitExecutor`] backed by `tokio::process`
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new("git")
    }
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl GitExecutor for ProcessExecutor {
    async fn run(
        &self,
        args: &[String],
        options: RunOptions<'_>,
    ) -> Result<GitOutput, ProcessError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(args)
            .current_dir(options.cwd)
            // stderr is matched against git's English messages
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(if options.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| ProcessError::SpawnFailed {
            program: self.program.display().to_string(),
            message: e.to_string(),
        })?;

        if let Some(input) = options.stdin {
            let mut stdin = child.stdin.take().ok_or(ProcessError::StdinFailed {
                message: "stdin handle unavailable".to_string(),
            })?;
            stdin
                .write_all(input)
                .await
                .map_err(|e| ProcessError::StdinFailed {
                    message: e.to_string(),
                })?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProcessError::WaitFailed {
                command: describe(args),
                message: e.to_string(),
            })?;

        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Build an owned argument vector
pub fn git_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

/// Subcommand name used in log lines and error messages
fn describe(args: &[String]) -> String {
    args.iter()
        .skip_while(|arg| arg.starts_with('-') || arg.contains('='))
        .find(|arg| !arg.is_empty())
        .cloned()
        .unwrap_or_else(|| "git".to_string())
}

#[derive(Debug, Default)]
struct ClockState {
    last: Option<Instant>,
    in_flight: usize,
}

/// Records when the crate itself last wrote to the repository.
///
/// Shared with the change watcher so filesystem events caused by our own
/// mutations do not flag the status as stale.
#[derive(Debug, Clone, Default)]
pub struct ActivityClock {
    inner: Arc<Mutex<ClockState>>,
}

impl ActivityClock {
    pub fn begin(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight += 1;
        state.last = Some(Instant::now());
    }

    pub fn end(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last = Some(Instant::now());
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
    }

    /// True while a command runs, or if `at` falls within `cooldown` of the last one.
    pub fn suppresses(&self, at: Instant, cooldown: Duration) -> bool {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if state.in_flight > 0 {
            return true;
        }
        state
            .last
            .is_some_and(|last| at.saturating_duration_since(last) <= cooldown)
    }
}

/// A repository opened through an executor.
///
/// Reads take the shared half of the gate and may overlap each other;
/// mutations take the exclusive half, so a read issued while a mutation is
/// pending queues behind it.
pub struct RepoState<E> {
    executor: E,
    root: PathBuf,
    git_dir: PathBuf,
    gate: RwLock<()>,
    clock: ActivityClock,
}

impl<E> std::fmt::Debug for RepoState<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoState")
            .field("root", &self.root)
            .field("git_dir", &self.git_dir)
            .finish()
    }
}

impl<E: GitExecutor> RepoState<E> {
    /// Locate the repository containing `path`.
    pub async fn discover(executor: E, path: &Path) -> Result<Self, ProcessError> {
        let args = git_args(&["rev-parse", "--show-toplevel", "--absolute-git-dir"]);
        let stdout = executor
            .run(&args, RunOptions::new(path))
            .await?
            .into_stdout(&args)?;

        let mut lines = stdout.lines();
        let (Some(root), Some(git_dir)) = (lines.next(), lines.next()) else {
            return Err(ProcessError::UnexpectedOutput {
                command: "rev-parse".to_string(),
                message: stdout.clone(),
            });
        };

        Ok(Self::from_parts(executor, root, git_dir))
    }

    pub fn from_parts(executor: E, root: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            root: root.into(),
            git_dir: git_dir.into(),
            gate: RwLock::new(()),
            clock: ActivityClock::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn clock(&self) -> &ActivityClock {
        &self.clock
    }

    /// Run a read-only command. Reads leave the activity clock alone, so
    /// changes made by others while they run are still noticed.
    pub async fn read(&self, args: &[String]) -> Result<GitOutput, ProcessError> {
        let _shared = self.gate.read().await;
        self.invoke(args, None).await
    }

    /// Run a command that changes the index or worktree.
    pub async fn mutate(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<GitOutput, ProcessError> {
        let _exclusive = self.gate.write().await;
        self.clock.begin();
        let result = self.invoke(args, stdin).await;
        self.clock.end();
        result
    }

    /// Hold the mutation gate for work done outside git (direct file writes).
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }

    async fn invoke(&self, args: &[String], stdin: Option<&[u8]>) -> Result<GitOutput, ProcessError> {
        let mut options = RunOptions::new(&self.root);
        if let Some(input) = stdin {
            options = options.with_stdin(input);
        }

        tracing::debug!(args = ?args, stdin_bytes = stdin.map_or(0, <[u8]>::len), "running git");
        let result = self.executor.run(args, options).await;

        if let Ok(output) = &result
            && !output.success()
        {
            tracing::debug!(code = output.exit_code, stderr = %output.stderr.trim_end(), "git exited non-zero");
        }
        result
    }
}

/// Hands out one [`RepoState`] per repository root while any handle lives.
pub struct RepoRegistry<E> {
    open: HashMap<PathBuf, Weak<RepoState<E>>>,
}

impl<E> Default for RepoRegistry<E> {
    fn default() -> Self {
        Self {
            open: HashMap::new(),
        }
    }
}

impl<E: GitExecutor> RepoRegistry<E> {
    /// Open `path`, reusing the live state for the same root if there is one.
    pub async fn open(&mut self, executor: E, path: &Path) -> Result<Arc<RepoState<E>>, ProcessError> {
        let state = RepoState::discover(executor, path).await?;
        self.open.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = self.open.get(state.root()).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let root = state.root().to_path_buf();
        let state = Arc::new(state);
        tracing::info!(root = %root.display(), "opened repository");
        self.open.insert(root, Arc::downgrade(&state));
        Ok(state)
    }

    /// Number of repositories with at least one live handle.
    pub fn live(&self) -> usize {
        self.open
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
