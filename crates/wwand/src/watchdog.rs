//! Bounded external command execution.
//!
//! Every external tool invocation goes through [`CommandWatchdog::run`],
//! which spawns the child, records its PID and deadline in the single
//! pending slot, and blocks until the child exits. A monitor thread wakes
//! once per second and force-kills any child still pending past its
//! deadline, so a wedged tool can never stall the supervisor beyond one
//! extra poll interval.
//!
//! At most one invocation is pending at any instant: the state machine
//! serializes all driver and probe calls. The pending slot is the only
//! state shared between the issuing thread and the monitor.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("failed to collect output of `{command}`: {source}")]
    Collect { command: String, source: io::Error },
    #[error("`{command}` exceeded its {timeout:?} deadline and was killed")]
    TimedOut { command: String, timeout: Duration },
}

/// Captured result of a command that ran to completion.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    /// stdout and stderr concatenated; backends match on substrings of
    /// this text.
    pub text: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text.contains(needle)
    }
}

/// Seam for everything that invokes external tools. Production code uses
/// the watchdog; tests substitute a scripted runner.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, WatchdogError>;
}

/// The single outstanding invocation.
struct PendingCommand {
    pid: u32,
    label: String,
    deadline: Instant,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<Option<PendingCommand>>,
    shutdown: AtomicBool,
}

/// Runs external commands under a hard wall-clock deadline.
///
/// Owns the monitor thread; dropping the watchdog stops it. The overdue
/// child is terminated through the PID retained at spawn time, never by
/// scanning the process table.
pub struct CommandWatchdog {
    shared: Arc<Shared>,
    monitor: Option<thread::JoinHandle<()>>,
}

impl CommandWatchdog {
    /// Start the watchdog with the standard 1 s poll interval.
    pub fn spawn() -> Self {
        Self::with_poll_interval(Duration::from_secs(1))
    }

    /// Poll interval override; tests use this to compress time.
    pub fn with_poll_interval(poll: Duration) -> Self {
        let shared = Arc::new(Shared::default());
        let monitor_shared = shared.clone();
        let monitor = thread::Builder::new()
            .name("wwand-watchdog".into())
            .spawn(move || monitor_loop(monitor_shared, poll))
            .expect("failed to spawn watchdog monitor thread");

        CommandWatchdog {
            shared,
            monitor: Some(monitor),
        }
    }

    /// Run `program` with `args`, blocking until it exits or the monitor
    /// kills it at `timeout`.
    ///
    /// A command that completes (with any exit status) yields
    /// [`CommandOutput`]; a killed command surfaces as
    /// [`WatchdogError::TimedOut`].
    pub fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, WatchdogError> {
        let label = display_command(program, args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WatchdogError::Spawn {
                command: label.clone(),
                source,
            })?;
        let pid = child.id();

        {
            let mut slot = self.lock_pending();
            debug_assert!(slot.is_none(), "overlapping watchdog invocations");
            *slot = Some(PendingCommand {
                pid,
                label: label.clone(),
                deadline: Instant::now() + timeout,
            });
        }
        debug!(command = %label, pid, "command started");

        let result = child.wait_with_output();

        // Clear the slot unless the monitor already did so after a kill.
        let monitor_cleared = {
            let mut slot = self.lock_pending();
            match slot.as_ref() {
                Some(pending) if pending.pid == pid => {
                    *slot = None;
                    false
                }
                _ => true,
            }
        };

        let output = result.map_err(|source| WatchdogError::Collect {
            command: label.clone(),
            source,
        })?;

        if monitor_cleared && output.status.signal() == Some(libc::SIGKILL) {
            return Err(WatchdogError::TimedOut {
                command: label,
                timeout,
            });
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        debug!(command = %label, code = ?output.status.code(), "command finished");

        Ok(CommandOutput {
            status: output.status,
            text,
        })
    }

    /// Whether an invocation is currently pending. Cleared on completion
    /// and after every forced kill.
    pub fn has_pending(&self) -> bool {
        self.lock_pending().is_some()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingCommand>> {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CommandWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CommandRunner for CommandWatchdog {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, WatchdogError> {
        CommandWatchdog::run(self, program, args, timeout)
    }
}

fn monitor_loop(shared: Arc<Shared>, poll: Duration) {
    while !shared.shutdown.load(Ordering::Relaxed) {
        thread::sleep(poll);

        let mut slot = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pending) = slot.take() else {
            continue;
        };
        if Instant::now() < pending.deadline {
            *slot = Some(pending);
            continue;
        }

        // SAFETY: the PID was retained from our own spawn. Worst case the
        // child already exited and kill reports ESRCH.
        let rc = unsafe { libc::kill(pending.pid as libc::pid_t, libc::SIGKILL) };
        if rc == 0 {
            info!(command = %pending.label, pid = pending.pid, "killed command past its deadline");
        } else {
            warn!(
                command = %pending.label,
                pid = pending.pid,
                error = %io::Error::last_os_error(),
                "failed to kill overdue command, clearing pending slot anyway"
            );
        }
        // The slot stays cleared either way so the watchdog itself can
        // never remain stuck on a single invocation.
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    let mut label = String::from(program);
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_command_joins_program_and_args() {
        assert_eq!(
            display_command("qmicli", &["-d", "/dev/cdc-wdm0"]),
            "qmicli -d /dev/cdc-wdm0"
        );
        assert_eq!(display_command("ping", &[]), "ping");
    }

    #[test]
    fn nothing_pending_at_rest() {
        let watchdog = CommandWatchdog::with_poll_interval(Duration::from_millis(10));
        assert!(!watchdog.has_pending());
    }
}
