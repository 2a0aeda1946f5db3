//! WWAN modem connectivity supervisor.
//!
//! Brings a cellular data session up after boot, verifies reachability
//! once per second, and recovers from sustained failure by tearing the
//! session down and restarting it. External tools are only ever invoked
//! through the command watchdog, which force-kills anything that outlives
//! its deadline.

pub mod boot;
pub mod config;
pub mod driver;
pub mod gate;
pub mod health;
pub mod logging;
pub mod supervisor;
pub mod watchdog;
