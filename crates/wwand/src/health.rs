//! Reachability probing.
//!
//! One round-trip test per monitoring tick against a fixed external
//! address. Anything short of a clean success (timeout, packet loss,
//! forced kill, ambiguous output) counts as unreachable; the caller owns
//! the consecutive-failure counter.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::SupervisorConfig;
use crate::watchdog::CommandRunner;

pub trait ReachabilityProbe: Send {
    /// Perform one probe. `true` means the probe target answered.
    fn probe(&mut self) -> bool;
}

/// ICMP echo probe via the system `ping` binary, watchdog-mediated like
/// every other external invocation.
pub struct PingProbe {
    runner: Arc<dyn CommandRunner>,
    addr: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new(config: &SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        PingProbe {
            runner,
            addr: config.probe_addr.clone(),
            timeout: config.command_timeout(),
        }
    }
}

impl ReachabilityProbe for PingProbe {
    fn probe(&mut self) -> bool {
        let wait_s = self.timeout.as_secs().max(1).to_string();
        let args = ["-c", "1", "-W", wait_s.as_str(), self.addr.as_str()];
        match self.runner.run("ping", &args, self.timeout) {
            Ok(output) => {
                let reachable = output.success() && output.contains("1 received");
                debug!(addr = %self.addr, reachable, "probe");
                reachable
            }
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "probe failed");
                false
            }
        }
    }
}
