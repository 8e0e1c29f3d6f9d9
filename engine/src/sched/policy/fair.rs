//! # Fair (CFS-like)
//!
//! Completely-fair scheduling over virtual runtime: the runqueue is an
//! ordered map keyed by vruntime, the weight table is the standard 40-entry
//! nice-to-weight map, and `min_vruntime` tracks the class's progress
//! monotonically. New tasks start at `min_vruntime` (plus one vslice of
//! debit when `start_debit` is set); waking tasks keep their old vruntime
//! but are granted at most half a `sched_latency` of credit.
//!
//! The current task is accounted in the period/slice computations even
//! while it is off the runqueue: `total_load` is maintained as an explicit
//! queued + current pair, so no runqueue flag needs to be toggled to keep
//! the accounting invariant.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::KeyedQueue;
use crate::sched::traits::{parse_params, ExtraStat, PolicyCtx, SchedPolicy};
use crate::task::{Task, TaskFlags, TaskTable};
use crate::time::{RawTime, SimTime, TimeSpec};
use crate::TaskId;

/// The standard nice-to-weight map; nice 0 maps to 1024 and each nice step
/// changes CPU share by ~10%.
const WEIGHT_TABLE: [u64; 40] = [
    /* -20 */ 88761, 71755, 56483, 46273, 36291,
    /* -15 */ 29154, 23254, 18705, 14949, 11916,
    /* -10 */ 9548, 7620, 6100, 4904, 3906,
    /*  -5 */ 3121, 2501, 1991, 1586, 1277,
    /*   0 */ 1024, 820, 655, 526, 423,
    /*   5 */ 335, 272, 215, 172, 137,
    /*  10 */ 110, 87, 70, 56, 45,
    /*  15 */ 36, 29, 23, 18, 15,
];

const NICE_0_LOAD: u64 = 1024;

static_assertions::const_assert_eq!(WEIGHT_TABLE.len(), 40);
static_assertions::const_assert_eq!(WEIGHT_TABLE[20], NICE_0_LOAD);

const DEFAULT_TIME_SCALE: u64 = 1_000_000;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct FairParams {
    time_scale: Option<u64>,
    min_granularity: Option<RawTime>,
    sched_latency: Option<RawTime>,
    sched_wakeup_granularity: Option<RawTime>,
    sched_min_granularity: Option<RawTime>,
    start_debit: bool,
}

/// Fair policy state.
#[derive(Debug)]
pub struct FairPolicy {
    /// vruntime-keyed tree of runnable, not-running tasks.
    tree: KeyedQueue,
    /// Key each queued task was inserted under.
    keys: HashMap<TaskId, u64>,
    /// Per-task virtual runtime.
    vruntime: HashMap<TaskId, u64>,
    /// Per-task `exec_time` already converted into vruntime.
    charged_exec: HashMap<TaskId, SimTime>,
    /// Per-task `exec_time` snapshot at pick (slice accounting).
    prev_sum_exec: HashMap<TaskId, SimTime>,
    /// The fair task currently on the CPU, if any.
    current: Option<TaskId>,
    /// Weight of `current` (0 when none).
    current_load: u64,
    /// Sum of weights on the tree.
    queued_load: u64,
    /// Monotonically non-decreasing class progress marker.
    min_vruntime: u64,

    time_scale: u64,
    min_granularity: SimTime,
    sched_latency: SimTime,
    wakeup_granularity: SimTime,
    sched_min_granularity: SimTime,
    start_debit: bool,
    /// `floor(sched_latency / sched_wakeup_granularity)`.
    nr_latency: u64,
}

fn nice_of(task: &Task) -> i64 {
    task.behavior.priority.clamp(-20, 19)
}

/// `weight_table[nice + 20]`.
fn get_load(nice: i64) -> u64 {
    WEIGHT_TABLE[(nice + 20) as usize]
}

/// Scale a wall-clock delta into virtual time for the given nice level.
fn calc_delta_fair(delta: u64, nice: i64) -> u64 {
    if nice == 0 {
        delta
    } else {
        delta * NICE_0_LOAD / get_load(nice)
    }
}

impl FairPolicy {
    /// New policy with default parameters.
    pub fn new() -> Self {
        let mut policy = Self {
            tree: KeyedQueue::new(),
            keys: HashMap::new(),
            vruntime: HashMap::new(),
            charged_exec: HashMap::new(),
            prev_sum_exec: HashMap::new(),
            current: None,
            current_load: 0,
            queued_load: 0,
            min_vruntime: 0,
            time_scale: DEFAULT_TIME_SCALE,
            min_granularity: 0,
            sched_latency: 0,
            wakeup_granularity: 0,
            sched_min_granularity: 0,
            start_debit: false,
            nr_latency: 0,
        };
        policy.apply_defaults();
        policy
    }

    fn apply_defaults(&mut self) {
        self.min_granularity = self.time_scale;
        self.sched_latency = 8 * self.time_scale;
        self.wakeup_granularity = self.time_scale;
        self.sched_min_granularity = self.time_scale;
        self.nr_latency = self.sched_latency / self.wakeup_granularity;
    }

    /// Runnable tasks of the class, current included.
    fn nr_running(&self) -> u64 {
        self.tree.len() as u64 + u64::from(self.current.is_some())
    }

    /// Total weight, current included even while off the runqueue.
    fn total_load(&self) -> u64 {
        self.queued_load + self.current_load
    }

    /// The latency period the class cycles through once.
    fn sched_period(&self, nr: u64) -> SimTime {
        if nr > self.nr_latency {
            nr * self.min_granularity
        } else {
            self.sched_latency
        }
    }

    /// A task's wall-clock share of the period, by weight.
    fn sched_slice(&self, weight: u64, extra_nr: u64, extra_load: u64) -> SimTime {
        let total = self.total_load() + extra_load;
        if total == 0 {
            return self.sched_latency;
        }
        self.sched_period(self.nr_running() + extra_nr) * weight / total
    }

    /// The slice converted into virtual time.
    fn sched_vslice(&self, nice: i64) -> SimTime {
        let weight = get_load(nice);
        calc_delta_fair(self.sched_slice(weight, 1, weight), nice)
    }

    /// Advance `min_vruntime` from the current task and the tree minimum.
    /// Never decreases.
    fn update_min_vruntime(&mut self) {
        let mut candidate = match self.current {
            Some(c) => self.vruntime[&c],
            None => self.min_vruntime,
        };
        if let Some((leftmost, _)) = self.tree.min() {
            candidate = candidate.min(leftmost);
        }
        let next = self.min_vruntime.max(candidate);
        debug_assert!(next >= self.min_vruntime);
        self.min_vruntime = next;
    }

    /// Convert the current task's charged execution into vruntime.
    fn update_current(&mut self, tasks: &TaskTable) {
        let Some(current) = self.current else {
            return;
        };
        let exec = tasks[current].exec_time;
        let charged = self.charged_exec.entry(current).or_insert(exec);
        if exec > *charged {
            let delta = exec - *charged;
            *charged = exec;
            let nice = nice_of(&tasks[current]);
            *self.vruntime.entry(current).or_insert(0) += calc_delta_fair(delta, nice);
        }
        self.update_min_vruntime();
    }

    /// Place a task and insert it into the tree.
    fn place_and_insert(&mut self, task: &mut Task) {
        let nice = nice_of(task);
        let weight = get_load(nice);
        let id = task.id;
        let vruntime = match self.vruntime.get(&id) {
            // Waking task: keep its vruntime, but grant at most half a
            // latency period of credit (the gentle-sleepers bonus).
            Some(&v) => v.max(self.min_vruntime.saturating_sub(self.sched_latency / 2)),
            // New task: start at the class marker, optionally debited by
            // one vslice.
            None => {
                let debit = if self.start_debit { self.sched_vslice(nice) } else { 0 };
                self.min_vruntime + debit
            }
        };
        self.vruntime.insert(id, vruntime);
        self.tree.insert(vruntime, id);
        self.keys.insert(id, vruntime);
        self.queued_load += weight;
        task.flags.insert(TaskFlags::ON_RQ);
    }
}

impl Default for FairPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for FairPolicy {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: FairParams = parse_params(self.name(), params)?;

        self.time_scale = params.time_scale.unwrap_or(DEFAULT_TIME_SCALE);
        if self.time_scale == 0 {
            return Err(ConfigError::BadClassParam {
                class: self.name().to_string(),
                param: "time_scale".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        self.apply_defaults();

        // Unit-less granularities scale by `time_scale`; suffixed strings
        // are absolute.
        let scale = self.time_scale;
        let resolve = |raw: &Option<RawTime>, name: &'static str, default: SimTime| {
            match raw {
                None => Ok(default),
                Some(raw) => match raw.resolve(scale) {
                    Ok(TimeSpec::Fixed(t)) if t > 0 => Ok(t),
                    _ => Err(ConfigError::BadClassParam {
                        class: "fair".to_string(),
                        param: name.to_string(),
                        reason: "must be a positive fixed time".to_string(),
                    }),
                },
            }
        };
        self.min_granularity = resolve(&params.min_granularity, "min_granularity", scale)?;
        self.sched_latency = resolve(&params.sched_latency, "sched_latency", 8 * scale)?;
        self.wakeup_granularity =
            resolve(&params.sched_wakeup_granularity, "sched_wakeup_granularity", scale)?;
        self.sched_min_granularity =
            resolve(&params.sched_min_granularity, "sched_min_granularity", scale)?;
        self.start_debit = params.start_debit;
        self.nr_latency = self.sched_latency / self.wakeup_granularity;

        self.tree.clear();
        self.keys.clear();
        self.vruntime.clear();
        self.charged_exec.clear();
        self.prev_sum_exec.clear();
        self.current = None;
        self.current_load = 0;
        self.queued_load = 0;
        self.min_vruntime = 0;

        for &t in members {
            let nice = tasks[t].behavior.priority;
            if !(-20..=19).contains(&nice) {
                return Err(ConfigError::PriorityOutOfRange {
                    pname: tasks[t].pname.clone(),
                    priority: nice,
                    class: self.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.keys.contains_key(&task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        self.update_current(ctx.tasks);
        self.place_and_insert(&mut ctx.tasks[task]);
        self.update_min_vruntime();
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        let key = self
            .keys
            .remove(&task)
            .ok_or(ProtocolError::NotQueued { policy: self.name(), task })?;
        self.tree.remove(key, task, self.name())?;
        self.queued_load -= get_load(nice_of(&ctx.tasks[task]));
        ctx.tasks[task].flags.remove(TaskFlags::ON_RQ);
        self.update_min_vruntime();
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        self.update_current(ctx.tasks);

        let next = match self.tree.pop_min() {
            Some((_, next)) => {
                self.keys.remove(&next);
                self.queued_load -= get_load(nice_of(&ctx.tasks[next]));
                ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);
                next
            }
            None => {
                // Empty tree: keep the running fair task if it can go on.
                let prev = ctx.current;
                if self.current == Some(prev) && ctx.tasks[prev].runnable() {
                    prev
                } else {
                    return None;
                }
            }
        };

        self.current = Some(next);
        self.current_load = get_load(nice_of(&ctx.tasks[next]));
        self.prev_sum_exec.insert(next, ctx.tasks[next].exec_time);
        self.charged_exec.insert(next, ctx.tasks[next].exec_time);
        Some(next)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()> {
        if self.current == Some(prev) {
            self.update_current(ctx.tasks);
            self.current = None;
            self.current_load = 0;
        }
        let task = &mut ctx.tasks[prev];
        if task.runnable() && !task.on_rq() {
            self.place_and_insert(task);
        }
        self.update_min_vruntime();
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        self.update_current(ctx.tasks);
        let Some(current) = self.current else {
            return;
        };
        let current_v = self.vruntime.get(&current).copied().unwrap_or(0);
        let new_v = self.vruntime.get(&task).copied().unwrap_or(0);
        let vdiff = current_v as i128 - new_v as i128;
        let gran = calc_delta_fair(self.wakeup_granularity, nice_of(&ctx.tasks[task])) as i128;
        if vdiff > gran {
            *ctx.resched = true;
        }
    }

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        self.update_current(ctx.tasks);
        let current = ctx.current;
        if self.current != Some(current) {
            return;
        }
        let delta_exec =
            ctx.tasks[current].exec_time - self.prev_sum_exec.get(&current).copied().unwrap_or(0);
        let ideal = self.sched_slice(self.current_load, 0, 0);
        if delta_exec > ideal {
            *ctx.resched = true;
            return;
        }
        if delta_exec < self.sched_min_granularity {
            return;
        }
        if let Some((leftmost, _)) = self.tree.min() {
            let vdiff = self.vruntime[&current] as i128 - leftmost as i128;
            if vdiff > ideal as i128 {
                *ctx.resched = true;
            }
        }
    }

    fn class_stats(&self) -> Vec<ExtraStat> {
        vec![
            ("min_vruntime", self.min_vruntime as f64),
            ("queued_load", self.queued_load as f64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_table_shape() {
        assert_eq!(get_load(0), 1024);
        assert_eq!(get_load(-1), 1277);
        assert_eq!(get_load(19), 15);
        assert_eq!(get_load(-20), 88761);
        // Each step changes weight by roughly 25% in load units.
        for nice in -20..19 {
            assert!(get_load(nice) > get_load(nice + 1));
        }
    }

    #[test]
    fn test_calc_delta_fair() {
        // Nice 0 passes through.
        assert_eq!(calc_delta_fair(1_000, 0), 1_000);
        // Heavier tasks accrue vruntime slower.
        assert!(calc_delta_fair(1_000, -5) < 1_000);
        // Lighter tasks accrue faster.
        assert!(calc_delta_fair(1_000, 5) > 1_000);
        assert_eq!(calc_delta_fair(1_277, -1), 1_024);
    }

    #[test]
    fn test_sched_period_scales_past_nr_latency() {
        let policy = FairPolicy::new();
        assert_eq!(policy.nr_latency, 8);
        assert_eq!(policy.sched_period(3), policy.sched_latency);
        assert_eq!(policy.sched_period(8), policy.sched_latency);
        assert_eq!(policy.sched_period(9), 9 * policy.min_granularity);
    }
}
