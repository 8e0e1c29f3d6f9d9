//! # Linux O(n)
//!
//! The 2.4-era shape: Unix nice priorities in `[-20, 19]`, slice
//! `(20 - nice) * 2 * time_scale`, selection by the goodness score
//! `slice + 20 - nice`, and the epoch recompute
//! `round(slice/2) + (20 - nice) * 2 * time_scale` when every runnable
//! slice is spent.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::FifoQueue;
use crate::sched::traits::{parse_params, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::time::SimTime;
use crate::TaskId;

fn default_time_scale() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinuxOnParams {
    #[serde(default = "default_time_scale")]
    time_scale: u64,
}

impl Default for LinuxOnParams {
    fn default() -> Self {
        Self { time_scale: default_time_scale() }
    }
}

/// Linux O(n) policy state.
#[derive(Debug)]
pub struct LinuxOnPolicy {
    list: FifoQueue,
    time_scale: u64,
    /// Remaining slice per owned task.
    slices: HashMap<TaskId, i64>,
    /// `exec_time` snapshot at pick, for elapsed accounting.
    picked_exec: HashMap<TaskId, SimTime>,
}

impl LinuxOnPolicy {
    /// New, empty policy.
    pub fn new() -> Self {
        Self {
            list: FifoQueue::new(),
            time_scale: default_time_scale(),
            slices: HashMap::new(),
            picked_exec: HashMap::new(),
        }
    }

    fn base_slice(&self, nice: i64) -> i64 {
        (20 - nice) * 2 * self.time_scale as i64
    }

    fn goodness(&self, task: TaskId, nice: i64) -> i64 {
        self.slices.get(&task).copied().unwrap_or(0) + 20 - nice
    }

    /// The queued task with the best goodness (ties keep list order).
    fn best_queued(&self, ctx: &PolicyCtx<'_>) -> Option<TaskId> {
        let mut best: Option<(TaskId, i64)> = None;
        for task in self.list.iter() {
            let score = self.goodness(task, ctx.tasks[task].behavior.priority);
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((task, score));
            }
        }
        best.map(|(task, _)| task)
    }

    fn all_queued_spent(&self) -> bool {
        self.list
            .iter()
            .all(|t| self.slices.get(&t).copied().unwrap_or(0) <= 0)
    }

    fn recompute_slices(&mut self, ctx: &PolicyCtx<'_>) {
        let time_scale = self.time_scale as i64;
        for (&task, slice) in self.slices.iter_mut() {
            let nice = ctx.tasks[task].behavior.priority;
            *slice = (*slice as f64 / 2.0).round() as i64 + (20 - nice) * 2 * time_scale;
        }
    }
}

impl Default for LinuxOnPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for LinuxOnPolicy {
    fn name(&self) -> &'static str {
        "linux_on"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: LinuxOnParams = parse_params(self.name(), params)?;
        if params.time_scale == 0 {
            return Err(ConfigError::BadClassParam {
                class: self.name().to_string(),
                param: "time_scale".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        self.time_scale = params.time_scale;
        self.list.clear();
        self.picked_exec.clear();
        self.slices.clear();
        for &t in members {
            let nice = tasks[t].behavior.priority;
            if !(-20..=19).contains(&nice) {
                return Err(ConfigError::PriorityOutOfRange {
                    pname: tasks[t].pname.clone(),
                    priority: nice,
                    class: self.name().to_string(),
                });
            }
            self.slices.insert(t, self.base_slice(nice));
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.list.contains(task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        let nice = ctx.tasks[task].behavior.priority;
        let base = self.base_slice(nice);
        self.slices.entry(task).or_insert(base);
        self.list.push_back(task);
        ctx.tasks[task].flags.insert(TaskFlags::ON_RQ);
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if !self.list.remove(task) {
            return Err(ProtocolError::NotQueued { policy: self.name(), task }.into());
        }
        ctx.tasks[task].flags.remove(TaskFlags::ON_RQ);
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        if self.list.is_empty() {
            return None;
        }
        if self.all_queued_spent() {
            self.recompute_slices(ctx);
        }
        let next = self.best_queued(ctx)?;
        self.list.remove(next);
        self.picked_exec.insert(next, ctx.tasks[next].exec_time);
        ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);
        Some(next)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()> {
        if let Some(start) = self.picked_exec.remove(&prev) {
            let elapsed = (ctx.tasks[prev].exec_time - start) as i64;
            *self.slices.entry(prev).or_insert(0) -= elapsed;
        }
        let task = &mut ctx.tasks[prev];
        if task.runnable() && !task.on_rq() {
            task.flags.insert(TaskFlags::ON_RQ);
            self.list.push_back(prev);
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _task: TaskId) {}

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        let current = ctx.current;
        let (Some(&slice), Some(&start)) =
            (self.slices.get(&current), self.picked_exec.get(&current))
        else {
            return;
        };
        let elapsed = (ctx.tasks[current].exec_time - start) as i64;
        if slice - elapsed <= 0 {
            *ctx.resched = true;
        }
    }
}
