//! # Result Objects
//!
//! What a run hands back to the embedder: the event trace, per-process and
//! per-class rollups, and the derived aggregates. The whole tree serializes
//! so an external shell can consume it as a structured document.

use std::fmt::Write as _;

use serde::Serialize;

use crate::stats::Stats;
use crate::task::ExecSpan;
use crate::time::{display, SimTime};

/// One line of the event trace. Includes the consumed queue events plus the
/// log-only `pick` and `preempt` records.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// Instant the event fired.
    pub time: SimTime,
    /// Instant the event was placed.
    pub set_on: SimTime,
    /// Event kind label (`fork`, `block`, `pick`, ...).
    pub kind: &'static str,
    /// Target task pid, when the event has one.
    pub pid: Option<u32>,
}

/// Identity and lifetime of one process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    /// Pid.
    pub pid: u32,
    /// Display name.
    pub pname: String,
    /// Owning policy name.
    pub class: String,
    /// Fork instant.
    pub spawned: SimTime,
    /// Exit instant, when the task exited within the run.
    pub exited: Option<SimTime>,
    /// Executed spans, for timeline reconstruction.
    pub exec_log: Vec<ExecSpan>,
    /// User-supplied opaque fields, echoed back.
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// Derived per-process statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStats {
    /// Pid.
    pub pid: u32,
    /// Display name.
    pub pname: String,
    /// Total time running.
    pub exec_time: SimTime,
    /// Total time runnable-but-not-running.
    pub wait_time: SimTime,
    /// Times picked.
    pub exec_count: u64,
    /// Burst-length statistics.
    pub run: Stats,
    /// Per-pick wait statistics.
    pub latency: Stats,
    /// `exited - spawned`, when exited.
    pub turnaround: Option<SimTime>,
}

/// Per-class latency rollup.
#[derive(Debug, Clone, Serialize)]
pub struct ClassLatency {
    /// Policy name.
    pub class: String,
    /// Statistics over the class's decision samples.
    pub latency: Stats,
}

/// Per-class statistics, including whatever extras the policy reports.
#[derive(Debug, Clone, Serialize)]
pub struct ClassStatsEntry {
    /// Policy name.
    pub class: String,
    /// Statistics over the class's decision samples.
    pub latency: Stats,
    /// Tasks of the class alive and runnable at the end of the run.
    pub nr_running: usize,
    /// Policy-specific key/value stats.
    pub extra: Vec<(String, f64)>,
}

/// Latency aggregates: pooled over all classes plus per-class rollups.
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
    /// Over all classes' samples pooled.
    pub general: Stats,
    /// Per-class rollups.
    pub by_class: Vec<ClassLatency>,
}

/// Turnaround aggregates over exited tasks.
#[derive(Debug, Clone, Serialize)]
pub struct TurnaroundReport {
    /// Mean turnaround.
    pub avg: f64,
    /// Population std.dev of turnaround.
    pub dev: f64,
    /// Tasks that exited within the run.
    pub exited: usize,
    /// Tasks still alive at the end.
    pub running: usize,
}

/// The result of one run (complete or partial).
///
/// Partial results (`finished == false`) carry the process list and event
/// trace collected so far but no aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    /// Configuration name.
    pub name: String,
    /// Real (wall-clock) time the run took, in milliseconds.
    pub duration_ms: f64,
    /// Whether the run reached `SimStop`.
    pub finished: bool,
    /// Simulated time actually covered.
    pub run_time: SimTime,
    /// Configured `sim_len`.
    pub length: SimTime,
    /// Picks that changed the running task.
    pub context_switches: u64,
    /// Identity and lifetime of every process.
    pub process_list: Vec<ProcessInfo>,
    /// The event trace.
    pub sim_events: Vec<EventRecord>,
    /// Fraction of `run_time` a non-idle task was running.
    pub average_load: f64,
    /// Latency aggregates. Empty on partial results.
    pub average_latency: Option<LatencyReport>,
    /// Turnaround aggregates. Empty on partial results.
    pub average_turnaround: Option<TurnaroundReport>,
    /// Names of the policies active this run, in priority order.
    pub active_classes: Vec<String>,
    /// Per-class statistics. Empty on partial results.
    pub class_stats: Vec<ClassStatsEntry>,
    /// Per-process statistics. Empty on partial results.
    pub process_stats: Vec<ProcessStats>,
}

impl SimReport {
    /// Compact, human-readable rendering for headless runs and tests.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({})", self.name, if self.finished { "finished" } else { "partial" });
        let _ = writeln!(out, "========================");
        let _ = writeln!(
            out,
            "run time: {} / {}  load: {:.3}  context switches: {}",
            display(self.run_time),
            display(self.length),
            self.average_load,
            self.context_switches
        );
        if let Some(turn) = &self.average_turnaround {
            let _ = writeln!(
                out,
                "turnaround: avg {:.1}ns dev {:.1}ns ({} exited, {} running)",
                turn.avg, turn.dev, turn.exited, turn.running
            );
        }
        if let Some(lat) = &self.average_latency {
            let _ = writeln!(out, "latency: avg {:.1}ns dev {:.1}ns", lat.general.avg, lat.general.dev);
            for class in &lat.by_class {
                let _ = writeln!(out, "  [{}] avg {:.1}ns dev {:.1}ns", class.class, class.latency.avg, class.latency.dev);
            }
        }
        if !self.process_stats.is_empty() {
            let _ = writeln!(out, "processes:");
            for p in &self.process_stats {
                let _ = writeln!(
                    out,
                    "  {} (pid {}): exec {} wait {} picks {} run avg {:.1}ns",
                    p.pname,
                    p.pid,
                    display(p.exec_time),
                    display(p.wait_time),
                    p.exec_count,
                    p.run.avg
                );
            }
        }
        out
    }
}

/// One reduced aggregate across the runs of a multi-run batch.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReducedStat {
    /// Average of the per-run averages.
    pub avg_of_avgs: f64,
    /// Population std.dev of the per-run averages.
    pub dev_of_avgs: f64,
    /// Average of the per-run std.devs.
    pub avg_of_devs: f64,
}

impl ReducedStat {
    fn reduce(pairs: &[(f64, f64)]) -> Self {
        let avgs: Vec<f64> = pairs.iter().map(|&(a, _)| a).collect();
        let devs: Vec<f64> = pairs.iter().map(|&(_, d)| d).collect();
        let avg_stats = Stats::of_f64(&avgs);
        let dev_stats = Stats::of_f64(&devs);
        Self {
            avg_of_avgs: avg_stats.avg,
            dev_of_avgs: avg_stats.dev,
            avg_of_devs: dev_stats.avg,
        }
    }
}

/// The reduced result of `multi_run`.
#[derive(Debug, Clone, Serialize)]
pub struct MultiRunReport {
    /// Number of runs reduced.
    pub runs: usize,
    /// CPU load across runs (devs are zero; load is a scalar per run).
    pub load: ReducedStat,
    /// General latency across runs.
    pub latency: ReducedStat,
    /// Turnaround across runs.
    pub turnaround: ReducedStat,
    /// The individual run results.
    pub reports: Vec<SimReport>,
}

impl MultiRunReport {
    /// Reduce a batch of completed runs.
    pub fn reduce(reports: Vec<SimReport>) -> Self {
        let loads: Vec<(f64, f64)> = reports.iter().map(|r| (r.average_load, 0.0)).collect();
        let lats: Vec<(f64, f64)> = reports
            .iter()
            .filter_map(|r| r.average_latency.as_ref())
            .map(|l| (l.general.avg, l.general.dev))
            .collect();
        let turns: Vec<(f64, f64)> = reports
            .iter()
            .filter_map(|r| r.average_turnaround.as_ref())
            .map(|t| (t.avg, t.dev))
            .collect();
        Self {
            runs: reports.len(),
            load: ReducedStat::reduce(&loads),
            latency: ReducedStat::reduce(&lats),
            turnaround: ReducedStat::reduce(&turns),
            reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce() {
        let r = ReducedStat::reduce(&[(1.0, 0.5), (3.0, 1.5)]);
        assert!((r.avg_of_avgs - 2.0).abs() < 1e-12);
        assert!((r.dev_of_avgs - 1.0).abs() < 1e-12);
        assert!((r.avg_of_devs - 1.0).abs() < 1e-12);
    }
}
