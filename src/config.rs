//! Profiler configuration

use std::path::PathBuf;
use std::time::Duration;

/// Where and how often the aggregated report is written.
///
/// The report interval gates only the periodic mid-flight writes; a completed
/// root cycle and profiler teardown always flush. A zero interval disables
/// the periodic writes entirely. Writing more often can itself show up in the
/// measurements, so the default stays coarse.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Report file, overwritten on every write.
    pub output_path: PathBuf,
    /// Minimum time between periodic report writes; zero disables them.
    pub report_interval: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            output_path: PathBuf::from("profiling.md"),
            report_interval: Duration::from_secs(1),
        }
    }
}

impl ProfilerConfig {
    pub fn new(output_path: impl Into<PathBuf>, report_interval: Duration) -> Self {
        ProfilerConfig {
            output_path: output_path.into(),
            report_interval,
        }
    }
}
