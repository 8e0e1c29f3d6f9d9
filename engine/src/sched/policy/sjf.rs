//! # Shortest Job First / Shortest Remaining Time First
//!
//! Ordered map keyed by remaining runtime. With `early_preemption` a newly
//! runnable task whose remaining runtime undercuts the current task's
//! requests a reschedule, turning SJF into SRTF.
//!
//! A just-woken task has no remaining runtime yet, so `enqueue` synthesises
//! one from the current behaviour's run spec. The value may diverge from
//! the one the kernel computes at pick time if a behaviour update fires at
//! that pick; behaviour switches evaluate only at pick, so the early sample
//! stays.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::KeyedQueue;
use crate::sched::traits::{parse_params, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::TaskId;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct SjfParams {
    early_preemption: bool,
}

/// SJF/SRTF policy state.
#[derive(Debug, Default)]
pub struct SjfPolicy {
    queue: KeyedQueue,
    /// Key each queued task was inserted under.
    keys: HashMap<TaskId, u64>,
    early_preemption: bool,
}

impl SjfPolicy {
    /// New, non-preemptive policy.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        let t = &mut ctx.tasks[task];
        if t.remaining_runtime == 0 {
            t.remaining_runtime = t.behavior.run.sample(ctx.rng);
        }
        let key = t.remaining_runtime;
        t.flags.insert(TaskFlags::ON_RQ);
        self.queue.insert(key, task);
        self.keys.insert(task, key);
    }
}

impl SchedPolicy for SjfPolicy {
    fn name(&self) -> &'static str {
        "sjf"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        _tasks: &TaskTable,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: SjfParams = parse_params(self.name(), params)?;
        self.early_preemption = params.early_preemption;
        self.queue.clear();
        self.keys.clear();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.keys.contains_key(&task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        self.insert(ctx, task);
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        let key = self
            .keys
            .remove(&task)
            .ok_or(ProtocolError::NotQueued { policy: self.name(), task })?;
        self.queue.remove(key, task, self.name())?;
        ctx.tasks[task].flags.remove(TaskFlags::ON_RQ);
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        let (_, next) = self.queue.pop_min()?;
        self.keys.remove(&next);
        ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);
        Some(next)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()> {
        let task = &ctx.tasks[prev];
        if task.runnable() && !task.on_rq() {
            self.insert(ctx, prev);
        }
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        if !self.early_preemption {
            return;
        }
        let new_remaining = ctx.tasks[task].remaining_runtime;
        let cur_remaining = ctx.tasks[ctx.current].remaining_runtime;
        if new_remaining < cur_remaining {
            *ctx.resched = true;
        }
    }

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}
}
