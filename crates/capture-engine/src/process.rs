//! Encoder process lifecycle.
//!
//! The supervisor owns the child handle and all three pipe endpoints.
//! Reader threads borrow stdout/stderr by taking them; they are unblocked
//! during `stop` by process termination closing the pipe write ends, which
//! is the portable way to wake a thread parked in a blocking read.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lenscast_common::error::{LenscastError, LenscastResult};

const LIVENESS_POLL: Duration = Duration::from_millis(100);

/// One running encoder process: child handle, pipes, `active` flag, and the
/// delivered-frame counter. Destruction is idempotent and safe from any of
/// the stop paths (explicit stop, shutdown, error recovery).
pub struct EncoderProcess {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    active: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    pid: u32,
}

impl EncoderProcess {
    /// Spawn the encoder with all three stdio streams piped.
    pub fn spawn(binary: &Path, args: &[String]) -> LenscastResult<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                LenscastError::device_unavailable(format!(
                    "failed to start encoder {}: {e}",
                    binary.display()
                ))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();

        tracing::info!(pid, "Encoder process started");

        Ok(Self {
            child: Some(child),
            stdout,
            stderr,
            active: Arc::new(AtomicBool::new(true)),
            frame_count: Arc::new(AtomicU64::new(0)),
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the stdout endpoint for the demultiplexer reader thread.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take the stderr endpoint for the diagnostic drain thread.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Shared flag cleared the moment teardown begins. Reader threads use it
    /// to tell expected pipe closure from an unexpected encoder death.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    /// Monotonically increasing count of frames delivered to the caller.
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        self.frame_count.clone()
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Poll liveness over the startup window. If the process exits inside
    /// the window, teardown completes and the collected diagnostic output is
    /// surfaced in the error.
    pub fn wait_until_ready(
        &mut self,
        window: Duration,
        diagnostics: &Arc<Mutex<Vec<String>>>,
    ) -> LenscastResult<()> {
        let deadline = Instant::now() + window;
        loop {
            if !self.is_alive() {
                // Give the drain thread a moment to pull the tail of stderr.
                std::thread::sleep(LIVENESS_POLL);
                let detail = {
                    let lines = match diagnostics.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    lines.join("\n")
                };
                self.stop(Duration::ZERO);
                return Err(LenscastError::device_unavailable(format!(
                    "encoder exited during startup: {}",
                    if detail.is_empty() {
                        "<no output>"
                    } else {
                        detail.as_str()
                    }
                )));
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            std::thread::sleep(LIVENESS_POLL);
        }
    }

    /// Stop the encoder. Safe to call repeatedly; every exit path ends with
    /// the process not alive and all pipes released.
    ///
    /// Order matters: close stdin first (ffmpeg treats the closed pipe like
    /// its `q` key and finalizes open outputs), wait out the graceful
    /// window, then escalate to a forced kill and reap the process. Reader
    /// threads blocked on stdout/stderr wake on EOF once the process dies.
    pub fn stop(&mut self, graceful_wait: Duration) {
        self.active.store(false, Ordering::SeqCst);

        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q") {
                tracing::debug!(error = %e, "Encoder stdin already closed");
            }
            drop(stdin);
        }

        // Release any pipe ends the readers never took.
        self.stdout.take();
        self.stderr.take();

        let deadline = Instant::now() + graceful_wait;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(pid = self.pid, %status, "Encoder exited gracefully");
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "Encoder wait failed");
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(LIVENESS_POLL);
        }

        tracing::warn!(pid = self.pid, "Encoder did not exit in time, killing");
        if let Err(e) = child.kill() {
            tracing::debug!(pid = self.pid, error = %e, "Kill failed (already dead?)");
        }
        match child.wait() {
            Ok(status) => tracing::info!(pid = self.pid, %status, "Encoder reaped"),
            Err(e) => tracing::warn!(pid = self.pid, error = %e, "Encoder reap failed"),
        }
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        self.stop(Duration::ZERO);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lenscast-process-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_early_exit_is_device_unavailable() {
        let dir = test_dir("early");
        let bin = script(&dir, "dies.sh", "echo 'cannot open device' >&2; exit 1");
        let mut process = EncoderProcess::spawn(&bin, &[]).unwrap();

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        if let Some(stderr) = process.take_stderr() {
            let sink = diagnostics.clone();
            std::thread::spawn(move || {
                use std::io::BufRead;
                for line in std::io::BufReader::new(stderr).lines().map_while(Result::ok) {
                    sink.lock().unwrap().push(line);
                }
            });
        }

        let err = process
            .wait_until_ready(Duration::from_secs(2), &diagnostics)
            .unwrap_err();
        match err {
            LenscastError::DeviceUnavailable { message } => {
                assert!(message.contains("cannot open device"), "got: {message}");
            }
            other => panic!("expected DeviceUnavailable, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stop_is_idempotent_and_kills() {
        let dir = test_dir("stop");
        let bin = script(&dir, "hangs.sh", "sleep 30");
        let mut process = EncoderProcess::spawn(&bin, &[]).unwrap();
        assert!(process.is_alive());

        process.stop(Duration::from_millis(200));
        assert!(!process.is_alive());

        // Second stop must be a no-op, not a double-kill error.
        process.stop(Duration::from_millis(200));
        assert!(!process.is_alive());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_reader_unblocked_by_stop() {
        let dir = test_dir("unblock");
        let bin = script(&dir, "quiet.sh", "sleep 30");
        let mut process = EncoderProcess::spawn(&bin, &[]).unwrap();

        let stdout = process.take_stdout().unwrap();
        let reader = std::thread::spawn(move || {
            use std::io::Read;
            let mut buf = [0u8; 256];
            let mut reader = stdout;
            // Blocks until the pipe closes.
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        process.stop(Duration::from_millis(100));
        // The reader must wake promptly once the process is gone.
        reader.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
