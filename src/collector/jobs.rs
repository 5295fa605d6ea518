//! Stuck-job detection for the job queue probe

use super::sources::RunningJob;
use crate::clock::MINUTE_MS;

/// Age thresholds past which a running job counts as stuck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckJobPolicy {
    pub default_threshold_ms: i64,
    pub long_running_threshold_ms: i64,
    /// Case-insensitive substrings marking long-running job types
    pub long_running_markers: Vec<String>,
}

impl Default for StuckJobPolicy {
    fn default() -> Self {
        Self {
            default_threshold_ms: 10 * MINUTE_MS,
            long_running_threshold_ms: 60 * MINUTE_MS,
            long_running_markers: ["import", "rerate", "re-rate", "rerating", "sync"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl StuckJobPolicy {
    pub fn threshold_for(&self, job_type: &str) -> i64 {
        let job_type = job_type.to_ascii_lowercase();
        if self
            .long_running_markers
            .iter()
            .any(|marker| job_type.contains(marker.as_str()))
        {
            self.long_running_threshold_ms
        } else {
            self.default_threshold_ms
        }
    }

    pub fn is_stuck(&self, job: &RunningJob) -> bool {
        job.age_ms > self.threshold_for(&job.job_type)
    }

    /// Stuck jobs plus the distinct types involved, sorted
    pub fn find_stuck<'a>(&self, jobs: &'a [RunningJob]) -> (usize, Vec<&'a str>) {
        let stuck: Vec<&RunningJob> = jobs.iter().filter(|j| self.is_stuck(j)).collect();
        let mut types: Vec<&str> = stuck.iter().map(|j| j.job_type.as_str()).collect();
        types.sort_unstable();
        types.dedup();
        (stuck.len(), types)
    }
}
