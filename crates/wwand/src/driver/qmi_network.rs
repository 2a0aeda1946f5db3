//! qmi-network backend: drives the modem through the `qmi-network`
//! helper script shipped with libqmi.
//!
//! The helper wraps mode handling and APN registration itself, so this
//! backend only starts or stops the network and toggles the interface.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{expect_output, run_ok, DriverError, ModemDriver};
use crate::config::SupervisorConfig;
use crate::watchdog::CommandRunner;

pub struct QmiNetworkDriver {
    runner: Arc<dyn CommandRunner>,
    device: String,
    iface: String,
    timeout: Duration,
    settle: Duration,
}

impl QmiNetworkDriver {
    pub fn new(config: &SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        QmiNetworkDriver {
            runner,
            device: config.qmi_device.clone(),
            iface: config.interface.clone(),
            timeout: config.command_timeout(),
            settle: config.settle_pause(),
        }
    }

    fn settle(&self) {
        thread::sleep(self.settle);
    }
}

impl ModemDriver for QmiNetworkDriver {
    fn bring_up(&mut self) -> Result<(), DriverError> {
        expect_output(
            self.runner.as_ref(),
            "qmi-network",
            &[&self.device, "start"],
            self.timeout,
            "Network started successfully",
        )?;
        info!(device = %self.device, "network started");
        self.settle();

        run_ok(
            self.runner.as_ref(),
            "ip",
            &["link", "set", &self.iface, "up"],
            self.timeout,
        )?;
        debug!(iface = %self.iface, "interface up");
        Ok(())
    }

    fn tear_down(&mut self) -> Result<(), DriverError> {
        expect_output(
            self.runner.as_ref(),
            "qmi-network",
            &[&self.device, "stop"],
            self.timeout,
            "Network stopped successfully",
        )?;
        info!(device = %self.device, "network stopped");
        self.settle();

        run_ok(
            self.runner.as_ref(),
            "ip",
            &["link", "set", &self.iface, "down"],
            self.timeout,
        )?;
        debug!(iface = %self.iface, "interface down");
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
