//! Status Reporting
//!
//! Feature on/off notices for the host application's terminal.

use tracing::info;

/// Receives feature enable/disable notices.
pub trait StatusReporter: Send + Sync {
    fn enabled(&self, feature: &str);
    fn disabled(&self, feature: &str);
}

/// Reports feature status through tracing at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusReporter;

impl StatusReporter for TracingStatusReporter {
    fn enabled(&self, feature: &str) {
        info!(feature, "{} enabled", feature);
    }

    fn disabled(&self, feature: &str) {
        info!(feature, "{} disabled", feature);
    }
}
