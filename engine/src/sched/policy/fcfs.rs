//! # First-Come First-Served
//!
//! Plain FIFO, no priorities, no preemption of its own. A task preempted by
//! a higher class re-enters at the head: class preemption must not reorder
//! the arrival order.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::FifoQueue;
use crate::sched::traits::{parse_params, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::TaskId;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FcfsParams {}

/// FCFS policy state.
#[derive(Debug, Default)]
pub struct FcfsPolicy {
    queue: FifoQueue,
}

impl FcfsPolicy {
    /// New, empty policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedPolicy for FcfsPolicy {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        _tasks: &TaskTable,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let FcfsParams {} = parse_params(self.name(), params)?;
        self.queue.clear();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.queue.contains(task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        self.queue.push_back(task);
        ctx.tasks[task].flags.insert(TaskFlags::ON_RQ);
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if !self.queue.remove(task) {
            return Err(ProtocolError::NotQueued { policy: self.name(), task }.into());
        }
        ctx.tasks[task].flags.remove(TaskFlags::ON_RQ);
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        let next = self.queue.pop_front()?;
        ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);
        Some(next)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()> {
        let task = &mut ctx.tasks[prev];
        if task.runnable() && !task.on_rq() {
            task.flags.insert(TaskFlags::ON_RQ);
            self.queue.push_front(prev);
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _task: TaskId) {}

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}
}
