//! # Behaviour FSM
//!
//! A task's behaviour program is an ordered list: the first entry fixes
//! `{priority, run, block}`, each later entry is either an update (overlays
//! at least one of the three) or a final (exit) entry, and every non-first
//! entry carries exactly one switch condition.
//!
//! Switch conditions are evaluated only at pick time: at most one update may
//! fire per pick, and the final entry may fire at the same pick immediately
//! after it. Exit timing then depends on the condition kind and on
//! `end_nicely` (wait for the burst vs. cut it short).

use crate::event::ExitKind;
use crate::time::{SimTime, TimeSpec};

/// The condition under which a behaviour entry fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchCond {
    /// Fires once the simulation clock reaches this instant.
    SimExec(SimTime),
    /// Fires once the task's cumulative execution time reaches this value.
    ProcExec(SimTime),
    /// Fires once the task has been picked this many times.
    ExecCount(u64),
}

impl SwitchCond {
    /// Whether the condition holds for a task with the given clock,
    /// cumulative execution time and pick count.
    pub fn satisfied(&self, now: SimTime, exec_time: SimTime, exec_count: u64) -> bool {
        match *self {
            SwitchCond::SimExec(t) => t <= now,
            SwitchCond::ProcExec(t) => t <= exec_time,
            SwitchCond::ExecCount(n) => exec_count >= n,
        }
    }

    /// The exit-event kind this condition maps to.
    pub fn exit_kind(&self) -> ExitKind {
        match self {
            SwitchCond::SimExec(_) => ExitKind::SimExec,
            SwitchCond::ProcExec(_) => ExitKind::ProcExec,
            SwitchCond::ExecCount(_) => ExitKind::ExecCount,
        }
    }
}

/// Fields an update entry overlays onto the current behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BehaviorChange {
    /// New priority, if given.
    pub priority: Option<i64>,
    /// New run spec, if given.
    pub run: Option<TimeSpec>,
    /// New block spec, if given.
    pub block: Option<TimeSpec>,
}

/// A non-first behaviour entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorEntry {
    /// Overlay `change` when `cond` holds.
    Update {
        /// Switch condition.
        cond: SwitchCond,
        /// Fields to overlay.
        change: BehaviorChange,
    },
    /// Exit when `cond` holds.
    Final {
        /// Switch condition.
        cond: SwitchCond,
        /// Wait for the current burst (`true`) or cut it short (`false`).
        end_nicely: bool,
    },
}

/// The task's effective behaviour: entry 0 overlaid with every update that
/// has fired so far.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentBehavior {
    /// Priority, interpreted by the owning policy.
    pub priority: i64,
    /// Run-burst length spec.
    pub run: TimeSpec,
    /// Block-interval spec.
    pub block: TimeSpec,
}

impl CurrentBehavior {
    /// Overlay an update.
    pub fn apply(&mut self, change: &BehaviorChange) {
        if let Some(p) = change.priority {
            self.priority = p;
        }
        if let Some(r) = change.run {
            self.run = r;
        }
        if let Some(b) = change.block {
            self.block = b;
        }
    }
}

/// What the kernel must schedule for a freshly picked task, after exit
/// planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPlan {
    /// No exit this pick; schedule the normal `Block`.
    None,
    /// Schedule an `Exit` at `at` instead of the `Block`.
    ExitAt {
        /// Exit instant.
        at: SimTime,
        /// Condition kind that produced it.
        kind: ExitKind,
        /// Whether the burst was allowed to finish.
        nice: bool,
    },
    /// The armed strict `sim_exec` exit fires during this burst; alias
    /// `next_event` to `strict_end_event` and schedule nothing else.
    AliasStrict,
}

/// Run the per-pick behaviour step for a task: at most one update, then exit
/// planning against the burst about to be scheduled.
///
/// `run` is the burst length the kernel chose (carried `remaining_runtime`
/// or a fresh sample); `strict_end` is the armed strict-exit instant, if
/// any. Returns the updated state alongside the plan via the task itself -
/// callers mutate the task through [`super::Task`] fields directly.
pub fn plan_exit(
    pending_final: Option<(&SwitchCond, bool)>,
    now: SimTime,
    run: SimTime,
    exec_time: SimTime,
    strict_end: Option<SimTime>,
) -> ExitPlan {
    let Some((cond, nice)) = pending_final else {
        return ExitPlan::None;
    };
    match (*cond, nice) {
        // The burst is allowed to finish, then the task exits.
        (SwitchCond::ProcExec(threshold), true) => {
            if exec_time + run >= threshold {
                ExitPlan::ExitAt { at: now + run, kind: ExitKind::ProcExec, nice: true }
            } else {
                ExitPlan::None
            }
        }
        // Cut the burst exactly at the threshold.
        (SwitchCond::ProcExec(threshold), false) => {
            if exec_time + run >= threshold {
                let at = if exec_time >= threshold {
                    now + 1
                } else {
                    now + (threshold - exec_time)
                };
                ExitPlan::ExitAt { at, kind: ExitKind::ProcExec, nice: false }
            } else {
                ExitPlan::None
            }
        }
        // Exit at burst end, but only if the burst reaches the threshold.
        (SwitchCond::SimExec(threshold), true) => {
            if now + run >= threshold {
                ExitPlan::ExitAt { at: now + run, kind: ExitKind::SimExec, nice: true }
            } else {
                ExitPlan::None
            }
        }
        // The unconditional exit is armed separately (`strict_end_event`);
        // if this burst is still running when it fires, alias onto it.
        (SwitchCond::SimExec(_), false) => match strict_end {
            Some(end) if now + run >= end => ExitPlan::AliasStrict,
            _ => ExitPlan::None,
        },
        // Count-based exits resolve at block/preempt time, not at pick.
        (SwitchCond::ExecCount(_), _) => ExitPlan::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_satisfied() {
        assert!(SwitchCond::SimExec(50).satisfied(50, 0, 0));
        assert!(!SwitchCond::SimExec(50).satisfied(49, 0, 0));
        assert!(SwitchCond::ProcExec(10).satisfied(0, 10, 0));
        assert!(SwitchCond::ExecCount(3).satisfied(0, 0, 3));
        assert!(!SwitchCond::ExecCount(3).satisfied(0, 0, 2));
    }

    #[test]
    fn test_overlay() {
        let mut b = CurrentBehavior {
            priority: 0,
            run: TimeSpec::Fixed(10),
            block: TimeSpec::Fixed(5),
        };
        b.apply(&BehaviorChange { priority: Some(3), run: None, block: Some(TimeSpec::Fixed(7)) });
        assert_eq!(b.priority, 3);
        assert_eq!(b.run, TimeSpec::Fixed(10));
        assert_eq!(b.block, TimeSpec::Fixed(7));
    }

    #[test]
    fn test_proc_exec_nice_waits_for_burst() {
        let cond = SwitchCond::ProcExec(100);
        // Burst crosses the threshold: exit at burst end.
        let plan = plan_exit(Some((&cond, true)), 1_000, 30, 80, None);
        assert_eq!(
            plan,
            ExitPlan::ExitAt { at: 1_030, kind: ExitKind::ProcExec, nice: true }
        );
        // Burst falls short: no exit yet.
        assert_eq!(plan_exit(Some((&cond, true)), 1_000, 10, 80, None), ExitPlan::None);
    }

    #[test]
    fn test_proc_exec_strict_cuts_burst() {
        let cond = SwitchCond::ProcExec(100);
        let plan = plan_exit(Some((&cond, false)), 1_000, 30, 80, None);
        assert_eq!(
            plan,
            ExitPlan::ExitAt { at: 1_020, kind: ExitKind::ProcExec, nice: false }
        );
        // Already past the threshold: fire on the next nanosecond.
        let plan = plan_exit(Some((&cond, false)), 1_000, 30, 120, None);
        assert_eq!(
            plan,
            ExitPlan::ExitAt { at: 1_001, kind: ExitKind::ProcExec, nice: false }
        );
    }

    #[test]
    fn test_sim_exec_variants() {
        let nice = SwitchCond::SimExec(500);
        assert_eq!(
            plan_exit(Some((&nice, true)), 480, 30, 0, None),
            ExitPlan::ExitAt { at: 510, kind: ExitKind::SimExec, nice: true }
        );
        assert_eq!(plan_exit(Some((&nice, true)), 400, 30, 0, None), ExitPlan::None);

        let strict = SwitchCond::SimExec(500);
        assert_eq!(plan_exit(Some((&strict, false)), 480, 30, 0, Some(500)), ExitPlan::AliasStrict);
        assert_eq!(plan_exit(Some((&strict, false)), 400, 30, 0, Some(500)), ExitPlan::None);
    }
}
