//! qmicli backend: drives the modem through the raw QMI control device.
//!
//! Bring-up sequence: enable raw-IP framing, raise the interface, confirm
//! (or force) the operating mode, then register the APN session. The
//! steps run strictly sequentially with a settling pause between them;
//! the modem firmware misbehaves when commands arrive back to back.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{expect_output, run_ok, DriverError, ModemDriver};
use crate::config::SupervisorConfig;
use crate::watchdog::CommandRunner;

pub struct QmicliDriver {
    runner: Arc<dyn CommandRunner>,
    device: String,
    iface: String,
    apn: String,
    timeout: Duration,
    settle: Duration,
    /// Set after a successful teardown. The next bring-up must force the
    /// operating mode back online instead of only querying it.
    reinit: bool,
}

impl QmicliDriver {
    pub fn new(config: &SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        QmicliDriver {
            runner,
            device: config.qmi_device.clone(),
            iface: config.interface.clone(),
            apn: config.apn.clone(),
            timeout: config.command_timeout(),
            settle: config.settle_pause(),
            reinit: false,
        }
    }

    /// Enable OS raw-IP framing for the interface (not persistent across
    /// reboots). Best-effort: the sysfs node is absent on some kernels.
    fn enable_raw_ip(&self) {
        let path = format!("/sys/class/net/{}/qmi/raw_ip", self.iface);
        match fs::write(&path, "Y\n") {
            Ok(()) => debug!(path, "raw IP mode enabled"),
            Err(e) => warn!(path, error = %e, "could not enable raw IP mode"),
        }
    }

    fn settle(&self) {
        thread::sleep(self.settle);
    }

    /// Confirm the modem is online, forcing the mode after a teardown.
    fn ensure_online(&self) -> Result<(), DriverError> {
        if self.reinit {
            expect_output(
                self.runner.as_ref(),
                "qmicli",
                &["-d", &self.device, "--dms-set-operating-mode=online"],
                self.timeout,
                "successfully",
            )?;
        } else {
            expect_output(
                self.runner.as_ref(),
                "qmicli",
                &["-d", &self.device, "--dms-get-operating-mode"],
                self.timeout,
                "online",
            )?;
        }
        Ok(())
    }

    /// Start the APN data session.
    ///
    /// `PolicyMismatch` means the registration from a previous session is
    /// still in place and counts as success.
    fn register_network(&self) -> Result<(), DriverError> {
        let start_network = format!("--wds-start-network=apn='{}',ip-type=4", self.apn);
        let args = [
            "-p",
            "-d",
            self.device.as_str(),
            "--device-open-net=net-raw-ip|net-no-qos-header",
            start_network.as_str(),
            "--client-no-release-cid",
        ];
        let output = self.runner.run("qmicli", &args, self.timeout)?;

        if output.contains("Network started") && output.contains("CID") {
            info!("network registration successful");
            return Ok(());
        }
        if output.contains("PolicyMismatch") {
            info!("network already registered, treating as success");
            return Ok(());
        }
        Err(DriverError::UnexpectedOutput {
            command: super::display("qmicli", &args),
            expect: "Network started".into(),
            snippet: super::snippet(&output.text),
        })
    }
}

impl ModemDriver for QmicliDriver {
    fn bring_up(&mut self) -> Result<(), DriverError> {
        self.enable_raw_ip();
        self.settle();

        run_ok(
            self.runner.as_ref(),
            "ip",
            &["link", "set", &self.iface, "up"],
            self.timeout,
        )?;
        debug!(iface = %self.iface, "interface up");
        self.settle();

        self.ensure_online()?;
        self.settle();

        self.register_network()?;
        self.reinit = false;
        Ok(())
    }

    fn tear_down(&mut self) -> Result<(), DriverError> {
        expect_output(
            self.runner.as_ref(),
            "qmicli",
            &["-d", &self.device, "--device-open-sync", "--dms-get-operating-mode"],
            self.timeout,
            "HW restricted:",
        )?;
        self.settle();

        run_ok(
            self.runner.as_ref(),
            "ip",
            &["link", "set", &self.iface, "down"],
            self.timeout,
        )?;
        debug!(iface = %self.iface, "interface down");
        self.settle();

        // Stale DHCP clients keep the old lease alive; a missing process
        // is not a failure.
        if let Ok(output) = self.runner.run("killall", &["udhcpc"], self.timeout) {
            debug!(code = ?output.status.code(), "killed stale udhcpc instances");
        }

        self.reinit = true;
        Ok(())
    }

    fn acquire_address(&mut self) -> Result<(), DriverError> {
        let args = ["-i", self.iface.as_str()];
        let output = self.runner.run("udhcpc", &args, self.timeout)?;
        if output.contains("lease of") && output.contains("obtained") {
            info!(iface = %self.iface, "address lease obtained");
            Ok(())
        } else {
            Err(DriverError::UnexpectedOutput {
                command: super::display("udhcpc", &args),
                expect: "lease of ... obtained".into(),
                snippet: super::snippet(&output.text),
            })
        }
    }
}
