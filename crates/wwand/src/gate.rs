//! Startup delay gate.
//!
//! Withholds modem initialization for a grace period after process start,
//! so the supervisor does not race the modem firmware's own bring-up
//! right after the host boots.

/// One-way latch over elapsed seconds.
#[derive(Debug)]
pub struct StartupGate {
    elapsed_s: u32,
    threshold_s: u32,
    open: bool,
}

impl StartupGate {
    pub fn new(threshold_s: u32) -> Self {
        StartupGate {
            elapsed_s: 0,
            threshold_s,
            open: false,
        }
    }

    /// Advance by one second. Returns `false` until the grace period has
    /// elapsed, then `true` permanently for the rest of the process
    /// lifetime.
    pub fn tick(&mut self) -> bool {
        if self.open {
            return true;
        }
        self.elapsed_s += 1;
        if self.elapsed_s >= self.threshold_s {
            self.open = true;
        }
        self.open
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
