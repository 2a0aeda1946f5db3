//! Boot state detection.
//!
//! A marker file in an ephemeral directory distinguishes a fresh machine
//! boot (marker absent, full initialization required) from a mere
//! supervisor restart (marker present, the data session is presumed up).
//! The marker is the only state persisted across process restarts.

use std::fs;
use std::path::PathBuf;

use tracing::{info, warn};

/// Last-run marker in a well-known ephemeral location.
pub struct BootMarker {
    path: PathBuf,
}

impl BootMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        BootMarker { path: path.into() }
    }

    /// Returns `true` when this run follows a fresh machine boot.
    ///
    /// An I/O error while checking is treated as a fresh boot (fail-open;
    /// preserved legacy default). On a fresh boot the marker is created as
    /// a side effect; the write is best-effort and a failure never blocks
    /// progress.
    pub fn detect(&self) -> bool {
        let fresh = match self.path.try_exists() {
            Ok(present) => !present,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "boot marker check failed, assuming fresh boot");
                true
            }
        };

        if fresh {
            info!(path = %self.path.display(), "no boot marker found, treating this as a fresh machine boot");
            if let Err(e) = fs::write(&self.path, format!("{}\n", std::process::id())) {
                warn!(path = %self.path.display(), error = %e, "failed to create boot marker");
            }
        } else {
            info!(path = %self.path.display(), "boot marker present, supervisor restart");
        }

        fresh
    }
}
