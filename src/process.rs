//! Owned handle for a directly spawned database process
//!
//! The child is moved into a supervisor task that waits for it to exit or
//! for a kill request. The exit outcome is published once on a watch
//! channel. Dropping the handle detaches: the process keeps running so other
//! applications sharing the service are not cut off.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::log_buffer::{LogBuffer, Stream};

/// How long `stop()` waits after SIGTERM before killing.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Default)]
pub enum ProcessOutput {
    /// Line-by-line into the log buffer and `tracing`
    #[default]
    Capture,
    /// Appended to a file; survives the launching process exiting
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(Option<i32>),
    Killed,
    WaitFailed(String),
}

pub struct SupervisedProcess {
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl SupervisedProcess {
    pub fn spawn(
        program: &Path,
        args: &[String],
        output: &ProcessOutput,
        log_buffer: &Arc<LogBuffer>,
    ) -> Result<Self> {
        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null());

        match output {
            ProcessOutput::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            ProcessOutput::File(path) => {
                let file = open_log_file(path)?;
                let err_file = file.try_clone().map_err(|e| ServiceError::fs(path, e))?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err_file));
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ServiceError::fs(program, format!("failed to spawn: {e}")))?;
        let pid = child.id();
        info!(program = %program.display(), pid = ?pid, "Spawned database process");

        spawn_log_readers(&mut child, log_buffer);

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, kill_rx, exit_tx));

        Ok(Self {
            pid,
            started_at: Utc::now(),
            kill_tx: Some(kill_tx),
            exit_rx,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Exit outcome, if the process has already ended.
    pub fn exit(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Resolve once the process has ended.
    pub async fn wait(&mut self) -> ProcessExit {
        match self.exit_rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or(ProcessExit::Killed),
            // supervisor gone without publishing; treat as killed
            Err(_) => ProcessExit::Killed,
        }
    }

    /// Ask the supervisor to kill the process and wait for it to go.
    pub async fn kill(&mut self) -> ProcessExit {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await
    }

    /// SIGTERM, then kill if it has not exited within `grace`.
    pub async fn stop(&mut self, grace: Duration) -> ProcessExit {
        if let Some(exit) = self.exit() {
            return exit;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                terminate_pid(pid);
                match tokio::time::timeout(grace, self.wait()).await {
                    Ok(exit) => {
                        debug!(pid, "Database process stopped gracefully");
                        return exit;
                    }
                    Err(_) => warn!(pid, "Database process did not stop in time, killing"),
                }
            }
        }

        #[cfg(not(unix))]
        let _ = grace;

        self.kill().await
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    // Only an explicit kill request matches; a dropped sender leaves the child running.
    tokio::select! {
        status = child.wait() => {
            let exit = match status {
                Ok(status) => ProcessExit::Exited(status.code()),
                Err(e) => ProcessExit::WaitFailed(e.to_string()),
            };
            let _ = exit_tx.send(Some(exit));
            return;
        }
        Ok(()) = kill_rx => {}
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill database process: {}", e);
    }
    let _ = exit_tx.send(Some(ProcessExit::Killed));
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ServiceError::fs(parent, e))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ServiceError::fs(path, e))
}

/// Forward captured stdout/stderr into the log buffer.
fn spawn_log_readers(child: &mut Child, log_buffer: &Arc<LogBuffer>) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, Stream::Stdout, Arc::clone(log_buffer)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, Stream::Stderr, Arc::clone(log_buffer)));
    }
}

async fn pump_lines<R>(reader: R, stream: Stream, log_buffer: Arc<LogBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "altair_db::service", %stream, "{}", line);
        log_buffer.push(stream, line);
    }
}

/// Send SIGTERM to a process we do not hold a handle for.
#[cfg(unix)]
pub fn terminate_pid(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

/// Opaque start-time marker of a live process.
///
/// Recorded next to a PID so a later caller can tell the process it wrote
/// down from an unrelated one that reused the number.
#[cfg(target_os = "linux")]
pub fn process_start_marker(pid: u32) -> Option<String> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm is parenthesised and may contain spaces; starttime is field 22
    let (_, fields) = stat.rsplit_once(')')?;
    fields.split_whitespace().nth(19).map(str::to_string)
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_start_marker(pid: u32) -> Option<String> {
    let output = std::process::Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let marker = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (output.status.success() && !marker.is_empty()).then_some(marker)
}

#[cfg(windows)]
pub fn process_start_marker(pid: u32) -> Option<String> {
    let script = format!("(Get-Process -Id {pid}).StartTime.ToFileTimeUtc()");
    let output = std::process::Command::new("powershell")
        .args(["-NoProfile", "-Command", &script])
        .stderr(Stdio::null())
        .output()
        .ok()?;
    let marker = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (output.status.success() && !marker.is_empty()).then_some(marker)
}

#[cfg(windows)]
pub fn terminate_pid(pid: u32) -> bool {
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> (PathBuf, Vec<String>) {
        (
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), script.to_string()],
        )
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn captures_output_and_exit_code() {
        let buffer = Arc::new(LogBuffer::default());
        let (program, args) = sh("echo ready; echo oops 1>&2; exit 3");
        let mut process =
            SupervisedProcess::spawn(&program, &args, &ProcessOutput::Capture, &buffer).unwrap();

        assert_eq!(process.wait().await, ProcessExit::Exited(Some(3)));
        assert!(process.has_exited());

        // readers may lag the exit slightly
        for _ in 0..50 {
            if buffer.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let lines = buffer.tail(10);
        assert!(lines.contains(&"[stdout] ready".to_string()));
        assert!(lines.contains(&"[stderr] oops".to_string()));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn stop_terminates_long_running_process() {
        let buffer = Arc::new(LogBuffer::default());
        let (program, args) = sh("sleep 30");
        let mut process =
            SupervisedProcess::spawn(&program, &args, &ProcessOutput::Capture, &buffer).unwrap();
        assert!(process.pid().is_some());

        let exit = process.stop(Duration::from_secs(5)).await;
        assert_ne!(exit, ProcessExit::Exited(Some(0)));
        assert!(process.has_exited());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn kill_reports_killed() {
        let buffer = Arc::new(LogBuffer::default());
        let (program, args) = sh("sleep 30");
        let mut process =
            SupervisedProcess::spawn(&program, &args, &ProcessOutput::Capture, &buffer).unwrap();

        assert_eq!(process.kill().await, ProcessExit::Killed);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn file_output_is_appended() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("logs").join("db.log");
        let buffer = Arc::new(LogBuffer::default());
        let (program, args) = sh("echo to-file");

        let mut process = SupervisedProcess::spawn(
            &program,
            &args,
            &ProcessOutput::File(log.clone()),
            &buffer,
        )
        .unwrap();
        process.wait().await;

        let contents = std::fs::read_to_string(&log).unwrap();
        assert!(contents.contains("to-file"));
        assert!(buffer.is_empty());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn start_marker_identifies_a_live_process() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let marker = process_start_marker(child.id());
        assert!(marker.is_some());
        assert_eq!(process_start_marker(child.id()), marker);

        child.kill().unwrap();
        child.wait().unwrap();
        assert!(process_start_marker(child.id()).is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_filesystem_error() {
        let buffer = Arc::new(LogBuffer::default());
        let result = SupervisedProcess::spawn(
            Path::new("/definitely/not/a/real/surreal"),
            &[],
            &ProcessOutput::Capture,
            &buffer,
        );
        assert!(matches!(result, Err(ServiceError::FileSystem { .. })));
    }
}
