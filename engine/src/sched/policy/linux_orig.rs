//! # Linux-Original
//!
//! The earliest Linux scheduler shape: one FIFO list, priority doubles as
//! an integer time slice. Selection scans for the largest remaining slice;
//! when every runnable slice is spent, all slices recompute as
//! `round(slice/2) + priority` and selection repeats.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::FifoQueue;
use crate::sched::traits::{parse_params, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::time::SimTime;
use crate::TaskId;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinuxOrigParams {}

/// Linux-Original policy state.
#[derive(Debug, Default)]
pub struct LinuxOrigPolicy {
    list: FifoQueue,
    /// Remaining slice per owned task.
    slices: HashMap<TaskId, i64>,
    /// `exec_time` snapshot at pick, for elapsed accounting.
    picked_exec: HashMap<TaskId, SimTime>,
}

/// Priority as a slice seed: positive, zero-clamped.
fn slice_seed(priority: i64) -> i64 {
    priority.max(0)
}

impl LinuxOrigPolicy {
    /// New, empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// The queued task with the largest remaining slice (ties keep list
    /// order).
    fn best_queued(&self) -> Option<(TaskId, i64)> {
        let mut best: Option<(TaskId, i64)> = None;
        for task in self.list.iter() {
            let slice = self.slices.get(&task).copied().unwrap_or(0);
            if best.map_or(true, |(_, b)| slice > b) {
                best = Some((task, slice));
            }
        }
        best
    }

    fn recompute_slices(&mut self, ctx: &PolicyCtx<'_>) {
        for (&task, slice) in self.slices.iter_mut() {
            let priority = slice_seed(ctx.tasks[task].behavior.priority);
            *slice = (*slice as f64 / 2.0).round() as i64 + priority;
        }
    }
}

impl SchedPolicy for LinuxOrigPolicy {
    fn name(&self) -> &'static str {
        "linux_orig"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let LinuxOrigParams {} = parse_params(self.name(), params)?;
        self.list.clear();
        self.picked_exec.clear();
        self.slices = members
            .iter()
            .map(|&t| (t, slice_seed(tasks[t].behavior.priority)))
            .collect();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.list.contains(task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        self.slices
            .entry(task)
            .or_insert_with(|| slice_seed(ctx.tasks[task].behavior.priority));
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
        let (mut next, best) = self.best_queued()?;
        if best <= 0 {
            self.recompute_slices(ctx);
            (next, _) = self.best_queued()?;
        }
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
