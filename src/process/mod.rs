//! Subprocess execution and lifecycle tracking.
//!
//! [`CommandRunner`] spawns external tools with a hard timeout and output
//! buffer cap; [`ProcessManager`] owns every child it creates and guarantees
//! none outlive the parent, including on signal-driven shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{self, Instant};

use crate::error::ReconError;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BUFFER_BYTES: usize = 1024 * 1024;
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Options recognized by [`CommandRunner::run`].
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub timeout_ms: u64,
    pub max_buffer_bytes: usize,
    pub track_process: bool,
    pub cwd: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            track_process: true,
            cwd: None,
        }
    }
}

/// Machine-readable reason a run did not produce `ok: true`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorCode {
    Timeout,
    MaxBuffer,
    Enoent,
    ExitCode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunError {
    pub code: RunErrorCode,
    pub message: String,
}

/// Outcome of running an external program.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub error: Option<RunError>,
}

impl RunResult {
    fn success(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            ok: exit_code == 0,
            stdout,
            stderr,
            exit_code: Some(exit_code),
            error: if exit_code == 0 {
                None
            } else {
                Some(RunError {
                    code: RunErrorCode::ExitCode,
                    message: format!("exited with status {exit_code}"),
                })
            },
        }
    }

    fn failure(code: RunErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(RunError {
                code,
                message: message.into(),
            }),
        }
    }

    /// `runRedBlue`-style classification of a parsed JSON result.
    pub fn classify_json_status(&self, stdout_was_empty_json: bool) -> &'static str {
        if !self.ok {
            match self.error.as_ref().map(|e| &e.code) {
                Some(RunErrorCode::Enoent) => "unavailable",
                _ => "error",
            }
        } else if stdout_was_empty_json {
            "empty"
        } else {
            "ok"
        }
    }
}

/// Runs external programs and caches tool-availability probes.
///
/// Spawns with no shell interpolation; stdin is closed; stdout/stderr are
/// captured to in-memory buffers capped at `max_buffer_bytes`.
pub struct CommandRunner {
    availability_cache: RwLock<HashMap<String, bool>>,
    process_manager: Arc<ProcessManager>,
}

impl CommandRunner {
    pub fn new(process_manager: Arc<ProcessManager>) -> Self {
        Self {
            availability_cache: RwLock::new(HashMap::new()),
            process_manager,
        }
    }

    /// Probes via a `which`-style lookup and caches the result forever for
    /// the life of the runner. Availability probes are not tracked by the
    /// [`ProcessManager`].
    pub async fn is_available(&self, cmd: &str) -> bool {
        if let Some(cached) = self.availability_cache.read().get(cmd).copied() {
            return cached;
        }
        let available = which::which(cmd).is_ok();
        self.availability_cache
            .write()
            .insert(cmd.to_string(), available);
        available
    }

    pub fn clear_cache(&self) {
        self.availability_cache.write().clear();
    }

    /// Run `command args...` to completion or until `options.timeout_ms`/
    /// `options.max_buffer_bytes` fires, whichever happens first.
    ///
    /// Exactly one resolution: once timeout, buffer overflow, spawn error,
    /// or normal exit fires, the others are not observed.
    pub async fn run(&self, command: &str, args: &[&str], options: RunOptions) -> RunResult {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return RunResult::failure(RunErrorCode::Enoent, err.to_string());
            }
            Err(err) => {
                return RunResult::failure(RunErrorCode::ExitCode, err.to_string());
            }
        };

        let tracked = if options.track_process {
            Some(
                self.process_manager
                    .track(command.to_string(), child.id(), None)
                    .await,
            )
        } else {
            None
        };

        let result = self.drain_with_limits(&mut child, &options).await;

        if let Some(handle) = tracked {
            self.process_manager.untrack(handle).await;
        }

        result
    }

    /// Composes `[domain resource verb target]` plus `-o json` and parses
    /// stdout as JSON. Parse failure yields `{status:"ok", data:{raw:stdout}}`.
    pub async fn run_red_blue(
        &self,
        domain: &str,
        resource: &str,
        verb: &str,
        target: &str,
        options: RunOptions,
    ) -> (RunResult, serde_json::Value) {
        let result = self
            .run(
                domain,
                &[resource, verb, target, "-o", "json"],
                options,
            )
            .await;

        if !result.ok {
            return (result, serde_json::Value::Null);
        }

        let trimmed = result.stdout.trim();
        let empty = matches!(trimmed, "" | "[]" | "{}" | "null");
        let parsed = serde_json::from_str::<serde_json::Value>(trimmed).unwrap_or_else(|_| {
            serde_json::json!({ "raw": result.stdout })
        });
        let value = if empty { serde_json::Value::Null } else { parsed };
        (result, value)
    }

    async fn drain_with_limits(&self, child: &mut Child, options: &RunOptions) -> RunResult {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);

        let outcome = time::timeout_at(deadline, async {
            let mut stdout_chunk = [0u8; 8192];
            let mut stderr_chunk = [0u8; 8192];
            loop {
                tokio::select! {
                    n = async { stdout.as_mut().unwrap().read(&mut stdout_chunk).await }, if stdout.is_some() => {
                        match n {
                            Ok(0) => stdout = None,
                            Ok(n) => {
                                stdout_buf.extend_from_slice(&stdout_chunk[..n]);
                                if stdout_buf.len() + stderr_buf.len() > options.max_buffer_bytes {
                                    return Err(RunErrorCode::MaxBuffer);
                                }
                            }
                            Err(_) => stdout = None,
                        }
                    }
                    n = async { stderr.as_mut().unwrap().read(&mut stderr_chunk).await }, if stderr.is_some() => {
                        match n {
                            Ok(0) => stderr = None,
                            Ok(n) => {
                                stderr_buf.extend_from_slice(&stderr_chunk[..n]);
                                if stdout_buf.len() + stderr_buf.len() > options.max_buffer_bytes {
                                    return Err(RunErrorCode::MaxBuffer);
                                }
                            }
                            Err(_) => stderr = None,
                        }
                    }
                    status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                        return Ok(status);
                    }
                }
            }
        })
        .await;

        match outcome {
            Err(_) => {
                let _ = child.start_kill();
                stdout_buf.truncate(options.max_buffer_bytes);
                stderr_buf.truncate(options.max_buffer_bytes);
                RunResult::failure(RunErrorCode::Timeout, "command timed out")
            }
            Ok(Err(RunErrorCode::MaxBuffer)) => {
                let _ = child.start_kill();
                stdout_buf.truncate(options.max_buffer_bytes);
                stderr_buf.truncate(options.max_buffer_bytes);
                let mut result = RunResult::failure(RunErrorCode::MaxBuffer, "output buffer exceeded");
                result.stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
                result.stderr = String::from_utf8_lossy(&stderr_buf).into_owned();
                result
            }
            Ok(Err(_)) => unreachable!("drain loop only returns MaxBuffer as an Err variant"),
            Ok(Ok(Ok(status))) => RunResult::success(
                String::from_utf8_lossy(&stdout_buf).into_owned(),
                String::from_utf8_lossy(&stderr_buf).into_owned(),
                status.code().unwrap_or(-1),
            ),
            Ok(Ok(Err(err))) => RunResult::failure(RunErrorCode::ExitCode, err.to_string()),
        }
    }
}

/// A child process owned by [`ProcessManager`] for the duration of its life.
#[derive(Clone, Debug)]
pub struct TrackedProcess {
    pub handle: u64,
    pub pid: Option<u32>,
    pub name: String,
    pub started_at: std::time::SystemTime,
    pub temp_dirs: Vec<PathBuf>,
}

/// Owns every child the runner creates and every temp dir it registers, and
/// guarantees neither outlives the parent process.
///
/// Tracking is by pid, not by [`Child`] handle: the runner retains ownership
/// of its own `Child` (it needs it to drain stdout/stderr and `wait()` on
/// it), while the manager only needs enough to signal the OS process
/// directly on cleanup. Liveness is probed with a signal-0 style existence
/// check, never a real signal, per spec.
pub struct ProcessManager {
    processes: AsyncMutex<HashMap<u64, TrackedProcess>>,
    temp_dirs: AsyncMutex<Vec<PathBuf>>,
    next_handle: std::sync::atomic::AtomicU64,
    shutdown_installed: std::sync::atomic::AtomicBool,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            processes: AsyncMutex::new(HashMap::new()),
            temp_dirs: AsyncMutex::new(Vec::new()),
            next_handle: std::sync::atomic::AtomicU64::new(1),
            shutdown_installed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Record a child under management. Returns a handle used to untrack it
    /// once the runner observes the child's exit.
    pub async fn track(&self, name: String, pid: Option<u32>, temp_dir: Option<PathBuf>) -> u64 {
        let handle = self
            .next_handle
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut temp_dirs = Vec::new();
        if let Some(dir) = temp_dir {
            temp_dirs.push(dir);
        }
        self.processes.lock().await.insert(
            handle,
            TrackedProcess {
                handle,
                pid,
                name,
                started_at: std::time::SystemTime::now(),
                temp_dirs,
            },
        );
        handle
    }

    pub async fn untrack(&self, handle: u64) {
        self.processes.lock().await.remove(&handle);
    }

    /// Registers a directory that must be removed after cleanup.
    pub async fn track_temp_dir(&self, path: PathBuf) {
        self.temp_dirs.lock().await.push(path);
    }

    pub async fn get_processes(&self) -> Vec<TrackedProcess> {
        self.processes.lock().await.values().cloned().collect()
    }

    pub async fn get_process_count(&self) -> usize {
        self.processes.lock().await.len()
    }

    /// Registers `interrupt`/`terminate`/`hangup` signal handlers exactly
    /// once per instance; each triggers [`cleanup`](Self::cleanup) with
    /// `force: false`. Idempotent across repeated calls.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        if self
            .shutdown_installed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut terminate = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sig) => sig,
                Err(_) => return,
            };
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(sig) => sig,
                    Err(_) => return,
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
                _ = hangup.recv() => {}
            }
            manager.cleanup(false).await;
        });
    }

    /// 1. Gracefully terminate each tracked process, polling liveness every
    ///    100ms up to a 5s grace period, then force-kill survivors.
    /// 2. Remove each tracked temp directory recursively, ignoring missing
    ///    ones.
    /// 3. Orphan sweep (best-effort; errors are swallowed per step).
    /// 4. Clear internal sets.
    pub async fn cleanup(&self, force: bool) {
        let handles: Vec<u64> = self.processes.lock().await.keys().copied().collect();
        for handle in handles {
            self.terminate_tracked(handle, force).await;
        }

        let dirs: Vec<PathBuf> = self.temp_dirs.lock().await.drain(..).collect();
        for dir in dirs {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }

        self.sweep_orphans().await;

        self.processes.lock().await.clear();
    }

    async fn terminate_tracked(&self, handle: u64, force: bool) {
        let pid = {
            let guard = self.processes.lock().await;
            guard.get(&handle).and_then(|entry| entry.pid)
        };
        let Some(pid) = pid else { return };
        #[cfg(unix)]
        {
            let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
            if force {
                let _ = nix::sys::signal::kill(nix_pid, nix::sys::signal::Signal::SIGKILL);
                return;
            }

            let _ = nix::sys::signal::kill(nix_pid, nix::sys::signal::Signal::SIGTERM);
            let deadline = Instant::now() + KILL_GRACE_PERIOD;
            while Instant::now() < deadline {
                if !Self::is_alive(nix_pid) {
                    return;
                }
                time::sleep(KILL_POLL_INTERVAL).await;
            }
            if Self::is_alive(nix_pid) {
                let _ = nix::sys::signal::kill(nix_pid, nix::sys::signal::Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = force;
        }
    }

    /// Signal-0 existence check: never delivers a real signal, only asks the
    /// kernel whether `pid` still exists and is visible to this process.
    #[cfg(unix)]
    fn is_alive(pid: nix::unistd::Pid) -> bool {
        nix::sys::signal::kill(pid, None).is_ok()
    }

    /// Enumerate residual processes matching known tool signatures and
    /// scratch directories under the system temp root, and remove them.
    /// Swallows errors: a missing `/proc` or an unreadable temp root is not
    /// fatal to the rest of cleanup.
    async fn sweep_orphans(&self) {
        let temp_root = std::env::temp_dir();
        let Ok(mut entries) = tokio::fs::read_dir(&temp_root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("reconnoiter-") {
                let _ = tokio::fs::remove_dir_all(entry.path()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enoent_is_reported_as_unavailable() {
        let manager = Arc::new(ProcessManager::new());
        let runner = CommandRunner::new(manager);
        let result = runner
            .run("definitely-not-a-real-binary", &[], RunOptions::default())
            .await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, RunErrorCode::Enoent);
    }

    #[tokio::test]
    async fn cleanup_clears_process_count() {
        let manager = ProcessManager::new();
        let handle = manager.track("echo".to_string(), None, None).await;
        assert_eq!(manager.get_process_count().await, 1);
        manager.untrack(handle).await;
        assert_eq!(manager.get_process_count().await, 0);
    }

    #[tokio::test]
    async fn track_temp_dir_is_removed_on_cleanup() {
        let manager = ProcessManager::new();
        let dir = std::env::temp_dir().join(format!("reconnoiter-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        manager.track_temp_dir(dir.clone()).await;
        manager.cleanup(false).await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn cleanup_kills_a_real_tracked_child() {
        let manager = ProcessManager::new();
        let mut child = Command::new("sleep").arg("60").spawn().unwrap();
        let pid = child.id().unwrap();
        let handle = manager.track("sleep".to_string(), Some(pid), None).await;
        assert_eq!(manager.get_process_count().await, 1);

        manager.cleanup(false).await;

        let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
        assert!(!ProcessManager::is_alive(nix_pid));
        assert_eq!(manager.get_process_count().await, 0);

        manager.untrack(handle).await;
        let _ = child.try_wait();
    }
}
