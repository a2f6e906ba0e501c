//! Progress monitoring and statistics collection

use snapferry_types::{Error, ProgressReporter};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// A step that is currently running
#[derive(Debug, Clone)]
pub struct ActiveStep {
    /// Source filesystem of the chain
    pub filesystem: String,
    /// Human readable step description
    pub description: String,
    /// When the step started
    pub started: Instant,
}

/// Overall statistics for a replication run
#[derive(Debug, Clone)]
pub struct Statistics {
    /// Steps started
    pub started_steps: u64,
    /// Steps currently running
    pub running_steps: u64,
    /// Highest number of steps observed running at once
    pub peak_running_steps: u64,
    /// Steps completed successfully
    pub completed_steps: u64,
    /// Steps that failed
    pub failed_steps: u64,
    /// Summed wall time of finished steps
    pub total_execution_time: Duration,
    /// Time since the collector was created
    pub uptime: Duration,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            started_steps: 0,
            running_steps: 0,
            peak_running_steps: 0,
            completed_steps: 0,
            failed_steps: 0,
            total_execution_time: Duration::from_secs(0),
            uptime: Duration::from_secs(0),
        }
    }
}

impl Statistics {
    /// Calculate overall success rate
    pub fn success_rate(&self) -> f64 {
        let total_finished = self.completed_steps + self.failed_steps;
        if total_finished > 0 {
            (self.completed_steps as f64 / total_finished as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Average wall time of a finished step
    pub fn average_step_time(&self) -> Duration {
        let finished = self.completed_steps + self.failed_steps;
        u32::try_from(finished)
            .ok()
            .filter(|count| *count > 0)
            .map_or(Duration::ZERO, |count| self.total_execution_time / count)
    }
}

#[derive(Debug, Default)]
struct CollectorState {
    statistics: Statistics,
    active: HashMap<String, ActiveStep>,
}

/// Statistics collector fed by executor progress events
#[derive(Debug)]
pub struct StatisticsCollector {
    state: Mutex<CollectorState>,
    start_time: Instant,
}

impl StatisticsCollector {
    /// Create a new statistics collector
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState::default()),
            start_time: Instant::now(),
        }
    }

    /// Get current statistics
    pub fn current_stats(&self) -> Statistics {
        let mut stats = self
            .state
            .lock()
            .map(|state| state.statistics.clone())
            .unwrap_or_default();
        stats.uptime = self.start_time.elapsed();
        stats
    }

    /// Steps currently running, keyed by task id
    pub fn active_steps(&self) -> HashMap<String, ActiveStep> {
        self.state
            .lock()
            .map(|state| state.active.clone())
            .unwrap_or_default()
    }

    fn finish(&self, task: &str, succeeded: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let elapsed = state
            .active
            .remove(task)
            .map_or(Duration::ZERO, |step| step.started.elapsed());
        let stats = &mut state.statistics;
        stats.running_steps = stats.running_steps.saturating_sub(1);
        stats.total_execution_time += elapsed;
        if succeeded {
            stats.completed_steps += 1;
        } else {
            stats.failed_steps += 1;
        }
    }
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for StatisticsCollector {
    fn step_started(&self, task: &str, filesystem: &str, description: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.active.insert(
            task.to_string(),
            ActiveStep {
                filesystem: filesystem.to_string(),
                description: description.to_string(),
                started: Instant::now(),
            },
        );
        let stats = &mut state.statistics;
        stats.started_steps += 1;
        stats.running_steps += 1;
        stats.peak_running_steps = stats.peak_running_steps.max(stats.running_steps);
    }

    fn step_finished(&self, task: &str) {
        self.finish(task, true);
    }

    fn step_failed(&self, task: &str, error: &Error) {
        debug!("{} failed: {}", task, error);
        self.finish(task, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_calculations() {
        let stats = Statistics {
            completed_steps: 6,
            failed_steps: 2,
            total_execution_time: Duration::from_secs(16),
            ..Default::default()
        };

        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(stats.average_step_time(), Duration::from_secs(2));
        assert_eq!(Statistics::default().average_step_time(), Duration::ZERO);
    }

    #[test]
    fn test_collector_tracks_running_steps() {
        let collector = StatisticsCollector::new();
        collector.step_started("TASK001", "tank/a", "send initial snapshot a1");
        collector.step_started("TASK002", "tank/b", "send initial snapshot b1");
        assert_eq!(collector.active_steps().len(), 2);

        collector.step_finished("TASK001");
        collector.step_failed("TASK002", &Error::other("recv failed"));

        let stats = collector.current_stats();
        assert_eq!(stats.started_steps, 2);
        assert_eq!(stats.running_steps, 0);
        assert_eq!(stats.peak_running_steps, 2);
        assert_eq!(stats.completed_steps, 1);
        assert_eq!(stats.failed_steps, 1);
        assert!(collector.active_steps().is_empty());
    }

    #[test]
    fn test_peak_follows_overlap() {
        let collector = StatisticsCollector::new();
        for task in ["TASK001", "TASK002", "TASK003"] {
            collector.step_started(task, "tank/a", "step");
            collector.step_finished(task);
        }
        assert_eq!(collector.current_stats().peak_running_steps, 1);
    }
}
