//! # Kernel Metrics
//!
//! Running counters the kernel maintains across a run. Plain fields: the
//! engine is single-threaded, simulated time is the only clock.

use crate::time::SimTime;

/// Kernel-level counters for one run.
#[derive(Debug, Clone, Default)]
pub struct KernelMetrics {
    /// Context switches (picks that changed the running task).
    pub context_switches: u64,
    /// Dispatches total (including re-picks of the same task).
    pub picks: u64,
    /// Involuntary deschedules.
    pub preemptions: u64,
    /// Timer ticks delivered to a policy.
    pub ticks: u64,
    /// Time a non-idle task was running.
    pub busy_time: SimTime,
    /// Time the idle task was running.
    pub idle_time: SimTime,
}

impl KernelMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// CPU load over the charged span: busy / (busy + idle).
    pub fn load(&self) -> f64 {
        let total = self.busy_time + self.idle_time;
        if total == 0 {
            0.0
        } else {
            self.busy_time as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_bounds() {
        let mut m = KernelMetrics::new();
        assert_eq!(m.load(), 0.0);
        m.busy_time = 75;
        m.idle_time = 25;
        assert!((m.load() - 0.75).abs() < 1e-12);
    }
}
