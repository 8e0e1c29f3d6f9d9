//! # Round-Robin
//!
//! FIFO with a single time-slice setting. The slice is granted on enqueue,
//! burned down by the scheduler tick and reset on exhaustion; an exhausted
//! task yields and re-enters at the tail.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::FifoQueue;
use crate::sched::traits::{parse_params, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::time::{RawTime, SimTime};
use crate::TaskId;

const DEFAULT_TIME_SLICE: SimTime = 1_000;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoundParams {
    time_slice: Option<RawTime>,
}

/// Round-Robin policy state.
#[derive(Debug)]
pub struct RoundPolicy {
    queue: FifoQueue,
    time_slice: SimTime,
    /// Remaining slice per task; may go negative between ticks.
    slices: HashMap<TaskId, i64>,
}

impl RoundPolicy {
    /// New policy with the default slice.
    pub fn new() -> Self {
        Self {
            queue: FifoQueue::new(),
            time_slice: DEFAULT_TIME_SLICE,
            slices: HashMap::new(),
        }
    }
}

impl Default for RoundPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for RoundPolicy {
    fn name(&self) -> &'static str {
        "round"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        _tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: RoundParams = parse_params(self.name(), params)?;
        self.time_slice = match &params.time_slice {
            Some(raw) => match raw.resolve(1) {
                Ok(crate::time::TimeSpec::Fixed(t)) if t > 0 => t,
                _ => {
                    return Err(ConfigError::BadClassParam {
                        class: self.name().to_string(),
                        param: "time_slice".to_string(),
                        reason: "must be a positive fixed time".to_string(),
                    })
                }
            },
            None => DEFAULT_TIME_SLICE,
        };
        self.queue.clear();
        let slice = self.time_slice as i64;
        self.slices = members.iter().map(|&t| (t, slice)).collect();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.queue.contains(task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        self.slices.insert(task, self.time_slice as i64);
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
            self.queue.push_back(prev);
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _task: TaskId) {}

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        let current = ctx.current;
        let slice = self.slices.entry(current).or_insert(self.time_slice as i64);
        *slice -= ctx.tick_len as i64;
        if *slice <= 0 {
            *slice = self.time_slice as i64;
            *ctx.resched = true;
        }
    }
}
