//! Modem driver backends.
//!
//! The state machine drives the modem exclusively through [`ModemDriver`].
//! Each operation is realized as one or more watchdog-mediated tool
//! invocations; how success is derived from the captured output is
//! backend-internal and never leaks to the caller.

mod qmi_network;
mod qmicli;

pub use qmi_network::QmiNetworkDriver;
pub use qmicli::QmicliDriver;

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Backend, SupervisorConfig};
use crate::watchdog::{CommandOutput, CommandRunner, WatchdogError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Command(#[from] WatchdogError),
    #[error("`{command}` exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },
    #[error("`{command}`: expected `{expect}` in output, got: {snippet}")]
    UnexpectedOutput {
        command: String,
        expect: String,
        snippet: String,
    },
}

/// Capability set shared by all backends.
///
/// Methods take `&mut self`: a backend may carry session state between
/// calls (the qmicli backend remembers whether the modem was torn down so
/// the next bring-up forces the operating mode back online).
pub trait ModemDriver: Send {
    /// Establish the data session.
    fn bring_up(&mut self) -> Result<(), DriverError>;

    /// Cleanly disable the active data session.
    fn tear_down(&mut self) -> Result<(), DriverError>;

    /// Acquire a routable address for the data interface.
    fn acquire_address(&mut self) -> Result<(), DriverError>;
}

/// Construct the configured backend.
pub fn for_backend(
    backend: Backend,
    config: &SupervisorConfig,
    runner: Arc<dyn CommandRunner>,
) -> Box<dyn ModemDriver> {
    match backend {
        Backend::Qmicli => Box::new(QmicliDriver::new(config, runner)),
        Backend::QmiNetwork => Box::new(QmiNetworkDriver::new(config, runner)),
    }
}

/// Run one command and require `expect` somewhere in its combined output.
fn expect_output(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    timeout: Duration,
    expect: &str,
) -> Result<CommandOutput, DriverError> {
    let output = runner.run(program, args, timeout)?;
    if output.contains(expect) {
        Ok(output)
    } else {
        Err(DriverError::UnexpectedOutput {
            command: display(program, args),
            expect: expect.to_string(),
            snippet: snippet(&output.text),
        })
    }
}

/// Run one command and require a zero exit status; the output text is
/// irrelevant (interface up/down produces none).
fn run_ok(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<(), DriverError> {
    let output = runner.run(program, args, timeout)?;
    if output.success() {
        Ok(())
    } else {
        Err(DriverError::CommandFailed {
            command: display(program, args),
            status: output.status,
        })
    }
}

fn display(program: &str, args: &[&str]) -> String {
    let mut label = String::from(program);
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "<no output>".into();
    }
    let mut out: String = trimmed.chars().take(120).collect();
    if trimmed.chars().count() > 120 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted [`CommandRunner`] shared by the backend tests.

    use std::os::unix::process::ExitStatusExt;
    use std::sync::Mutex;

    use super::*;

    type Responder = Box<dyn Fn(&str, &[&str]) -> (i32, String) + Send + Sync>;

    pub struct ScriptedRunner {
        pub calls: Mutex<Vec<String>>,
        responder: Responder,
    }

    impl ScriptedRunner {
        pub fn new(responder: impl Fn(&str, &[&str]) -> (i32, String) + Send + Sync + 'static) -> Self {
            ScriptedRunner {
                calls: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            }
        }

        pub fn call_log(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Duration,
        ) -> Result<CommandOutput, WatchdogError> {
            self.calls.lock().unwrap().push(display(program, args));
            let (code, text) = (self.responder)(program, args);
            Ok(CommandOutput {
                status: ExitStatus::from_raw(code << 8),
                text,
            })
        }
    }
}
