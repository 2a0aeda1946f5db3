//! Connectivity state machine.
//!
//! Owns the single mutable [`ConnectivityState`] record and drives the
//! modem driver, delay gate, and reachability probe from a 1 Hz tick.
//! All failures are absorbed locally through state-preserving retry; no
//! path terminates the process.

use std::thread;

use tracing::{debug, info, warn};

use crate::boot::BootMarker;
use crate::config::SupervisorConfig;
use crate::driver::{DriverError, ModemDriver};
use crate::gate::StartupGate;
use crate::health::ReachabilityProbe;

/// Lifecycle state of the supervised data session.
///
/// ```text
/// AwaitingBoot → Delaying → Initializing → Monitoring
///                                           ↓      ↑
///                                        Degraded → Restarting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Process started, boot state not yet resolved.
    AwaitingBoot,
    /// Holding for the startup grace period.
    Delaying,
    /// Establishing the data session after a fresh boot.
    Initializing,
    /// Steady state: one reachability probe per tick.
    Monitoring,
    /// Failure threshold breached, teardown pending. Teardown is retried
    /// once per tick with no upper bound: a teardown that never succeeds
    /// keeps the machine here indefinitely.
    Degraded,
    /// Session torn down, re-establishing.
    Restarting,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::AwaitingBoot => "awaiting-boot",
            LinkState::Delaying => "delaying",
            LinkState::Initializing => "initializing",
            LinkState::Monitoring => "monitoring",
            LinkState::Degraded => "degraded",
            LinkState::Restarting => "restarting",
        }
    }
}

/// The single authoritative mutable record. Owned by the supervisor;
/// nothing else writes it.
#[derive(Debug)]
pub struct ConnectivityState {
    pub link: LinkState,
    /// Consecutive failed probes. Reset to zero by any single success.
    pub probe_failures: u32,
    /// Set when this run follows a fresh machine boot; cleared once the
    /// first initialization completes.
    pub fresh_boot: bool,
}

/// Drives the modem from the current state and health signal.
pub struct Supervisor {
    config: SupervisorConfig,
    driver: Box<dyn ModemDriver>,
    prober: Box<dyn ReachabilityProbe>,
    marker: BootMarker,
    gate: StartupGate,
    state: ConnectivityState,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        driver: Box<dyn ModemDriver>,
        prober: Box<dyn ReachabilityProbe>,
    ) -> Self {
        let marker = BootMarker::new(&config.boot_marker);
        let gate = StartupGate::new(config.startup_delay_s);
        Supervisor {
            config,
            driver,
            prober,
            marker,
            gate,
            state: ConnectivityState {
                link: LinkState::AwaitingBoot,
                probe_failures: 0,
                fresh_boot: false,
            },
        }
    }

    pub fn state(&self) -> &ConnectivityState {
        &self.state
    }

    pub fn link_state(&self) -> LinkState {
        self.state.link
    }

    /// Advance the machine by one 1 Hz tick. Exactly one state action runs
    /// per call.
    pub fn tick(&mut self) {
        // AwaitingBoot resolves at the head of the first tick; the same
        // tick already counts against the delay gate.
        if self.state.link == LinkState::AwaitingBoot {
            self.arm();
        }

        match self.state.link {
            LinkState::AwaitingBoot => {}
            LinkState::Delaying => {
                if self.gate.tick() {
                    info!(
                        delay_s = self.config.startup_delay_s,
                        "startup grace period elapsed"
                    );
                    self.transition(LinkState::Initializing);
                }
            }
            LinkState::Initializing => {
                if !self.state.fresh_boot {
                    info!("supervisor restart, data session presumed up");
                    self.enter_monitoring();
                    return;
                }
                match self.establish() {
                    Ok(()) => {
                        self.state.fresh_boot = false;
                        self.enter_monitoring();
                    }
                    Err(e) => warn!(error = %e, "bring-up failed, retrying next cycle"),
                }
            }
            LinkState::Monitoring => {
                if self.prober.probe() {
                    if self.state.probe_failures > 0 {
                        debug!(
                            after_failures = self.state.probe_failures,
                            "reachability restored"
                        );
                    }
                    self.state.probe_failures = 0;
                } else {
                    self.state.probe_failures += 1;
                    warn!(
                        failures = self.state.probe_failures,
                        threshold = self.config.failure_threshold,
                        "reachability probe failed"
                    );
                    if self.state.probe_failures >= self.config.failure_threshold {
                        self.state.probe_failures = 0;
                        self.transition(LinkState::Degraded);
                    }
                }
            }
            LinkState::Degraded => match self.driver.tear_down() {
                Ok(()) => {
                    info!("teardown complete");
                    self.transition(LinkState::Restarting);
                }
                Err(e) => warn!(error = %e, "teardown failed, retrying next cycle"),
            },
            LinkState::Restarting => match self.establish() {
                Ok(()) => self.enter_monitoring(),
                Err(e) => warn!(error = %e, "restart bring-up failed, retrying next cycle"),
            },
        }
    }

    fn arm(&mut self) {
        self.state.fresh_boot = self.marker.detect();
        self.transition(LinkState::Delaying);
    }

    /// Bring-up then address acquisition, strictly sequential, with the
    /// settling pause between the two steps.
    fn establish(&mut self) -> Result<(), DriverError> {
        self.driver.bring_up()?;
        thread::sleep(self.config.settle_pause());
        self.driver.acquire_address()?;
        Ok(())
    }

    fn enter_monitoring(&mut self) {
        self.state.probe_failures = 0;
        self.transition(LinkState::Monitoring);
        info!("data session up, monitoring reachability");
    }

    fn transition(&mut self, to: LinkState) {
        debug!(from = self.state.link.as_str(), to = to.as_str(), "state transition");
        self.state.link = to;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub struct Counts {
        pub bring_up: usize,
        pub tear_down: usize,
        pub acquire: usize,
    }

    /// Driver whose per-call results are scripted; an exhausted script
    /// keeps returning the default.
    struct ScriptDriver {
        counts: Arc<Mutex<Counts>>,
        bring_up: VecDeque<bool>,
        tear_down: VecDeque<bool>,
        bring_up_default: bool,
        tear_down_default: bool,
    }

    impl ScriptDriver {
        fn healthy(counts: Arc<Mutex<Counts>>) -> Self {
            ScriptDriver {
                counts,
                bring_up: VecDeque::new(),
                tear_down: VecDeque::new(),
                bring_up_default: true,
                tear_down_default: true,
            }
        }
    }

    fn fail() -> DriverError {
        DriverError::UnexpectedOutput {
            command: "qmicli".into(),
            expect: "online".into(),
            snippet: "error".into(),
        }
    }

    impl ModemDriver for ScriptDriver {
        fn bring_up(&mut self) -> Result<(), DriverError> {
            self.counts.lock().unwrap().bring_up += 1;
            let ok = self.bring_up.pop_front().unwrap_or(self.bring_up_default);
            ok.then_some(()).ok_or_else(fail)
        }

        fn tear_down(&mut self) -> Result<(), DriverError> {
            self.counts.lock().unwrap().tear_down += 1;
            let ok = self.tear_down.pop_front().unwrap_or(self.tear_down_default);
            ok.then_some(()).ok_or_else(fail)
        }

        fn acquire_address(&mut self) -> Result<(), DriverError> {
            self.counts.lock().unwrap().acquire += 1;
            Ok(())
        }
    }

    struct ScriptProbe {
        results: VecDeque<bool>,
        default: bool,
    }

    impl ReachabilityProbe for ScriptProbe {
        fn probe(&mut self) -> bool {
            self.results.pop_front().unwrap_or(self.default)
        }
    }

    struct Fixture {
        supervisor: Supervisor,
        counts: Arc<Mutex<Counts>>,
        _dir: tempfile::TempDir,
    }

    fn fixture(delay_s: u32, driver_of: impl FnOnce(Arc<Mutex<Counts>>) -> ScriptDriver, probe: ScriptProbe) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig {
            startup_delay_s: delay_s,
            settle_pause_ms: 0,
            boot_marker: dir.path().join("wwand.boot"),
            ..SupervisorConfig::default()
        };
        let counts = Arc::new(Mutex::new(Counts::default()));
        let supervisor = Supervisor::new(
            config,
            Box::new(driver_of(counts.clone())),
            Box::new(probe),
        );
        Fixture {
            supervisor,
            counts,
            _dir: dir,
        }
    }

    fn always_reachable() -> ScriptProbe {
        ScriptProbe {
            results: VecDeque::new(),
            default: true,
        }
    }

    // ─── Boot and delay gating ──────────────────────────────────────────

    #[test]
    fn first_tick_resolves_boot_state_and_starts_delaying() {
        let mut f = fixture(60, ScriptDriver::healthy, always_reachable());
        assert_eq!(f.supervisor.link_state(), LinkState::AwaitingBoot);

        f.supervisor.tick();
        assert_eq!(f.supervisor.link_state(), LinkState::Delaying);
        assert!(f.supervisor.state().fresh_boot);
        assert_eq!(f.counts.lock().unwrap().bring_up, 0);
    }

    #[test]
    fn no_driver_calls_before_the_gate_opens() {
        let mut f = fixture(60, ScriptDriver::healthy, always_reachable());
        for _ in 0..59 {
            f.supervisor.tick();
        }
        assert_eq!(f.supervisor.link_state(), LinkState::Delaying);
        assert_eq!(f.counts.lock().unwrap().bring_up, 0);
    }

    #[test]
    fn supervisor_restart_skips_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("wwand.boot");
        std::fs::write(&marker, "1\n").unwrap();

        let config = SupervisorConfig {
            startup_delay_s: 1,
            settle_pause_ms: 0,
            boot_marker: marker,
            ..SupervisorConfig::default()
        };
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut supervisor = Supervisor::new(
            config,
            Box::new(ScriptDriver::healthy(counts.clone())),
            Box::new(always_reachable()),
        );

        supervisor.tick(); // gate opens, Initializing
        supervisor.tick(); // restart path straight to Monitoring
        assert_eq!(supervisor.link_state(), LinkState::Monitoring);
        assert_eq!(counts.lock().unwrap().bring_up, 0);
    }

    // ─── Monitoring counter semantics ───────────────────────────────────

    #[test]
    fn single_success_resets_the_failure_counter() {
        let probe = ScriptProbe {
            results: VecDeque::from([false, false, false, false, true]),
            default: true,
        };
        let mut f = fixture(1, ScriptDriver::healthy, probe);
        f.supervisor.tick(); // Initializing
        f.supervisor.tick(); // Monitoring

        for _ in 0..4 {
            f.supervisor.tick();
        }
        assert_eq!(f.supervisor.state().probe_failures, 4);
        assert_eq!(f.supervisor.link_state(), LinkState::Monitoring);

        f.supervisor.tick(); // the reachable probe
        assert_eq!(f.supervisor.state().probe_failures, 0);
        assert_eq!(f.supervisor.link_state(), LinkState::Monitoring);
        assert_eq!(f.counts.lock().unwrap().tear_down, 0);
    }

    #[test]
    fn fifth_consecutive_failure_enters_degraded_once() {
        let probe = ScriptProbe {
            results: VecDeque::new(),
            default: false,
        };
        let mut f = fixture(1, ScriptDriver::healthy, probe);
        f.supervisor.tick(); // Initializing
        f.supervisor.tick(); // Monitoring

        for _ in 0..4 {
            f.supervisor.tick();
            assert_eq!(f.supervisor.link_state(), LinkState::Monitoring);
        }
        f.supervisor.tick(); // fifth failure
        assert_eq!(f.supervisor.link_state(), LinkState::Degraded);
        // No teardown yet: the Degraded action runs on the next tick.
        assert_eq!(f.counts.lock().unwrap().tear_down, 0);

        f.supervisor.tick();
        assert_eq!(f.counts.lock().unwrap().tear_down, 1);
        assert_eq!(f.supervisor.link_state(), LinkState::Restarting);
    }

    // ─── Degraded retry ─────────────────────────────────────────────────

    #[test]
    fn failing_teardown_keeps_retrying_in_degraded() {
        let probe = ScriptProbe {
            results: VecDeque::new(),
            default: false,
        };
        let mut f = fixture(1, |counts| ScriptDriver {
            tear_down_default: false,
            ..ScriptDriver::healthy(counts)
        }, probe);
        f.supervisor.tick();
        f.supervisor.tick();
        for _ in 0..5 {
            f.supervisor.tick();
        }
        assert_eq!(f.supervisor.link_state(), LinkState::Degraded);

        for _ in 0..10 {
            f.supervisor.tick();
            assert_eq!(f.supervisor.link_state(), LinkState::Degraded);
        }
        assert_eq!(f.counts.lock().unwrap().tear_down, 10);
        assert_eq!(f.counts.lock().unwrap().bring_up, 1);
    }
}
