//! # Idle
//!
//! The fallback "class": a single-task runqueue that always offers the idle
//! task. It is held by the kernel outside the registry and asked only when
//! every registered policy passes.

use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::traits::{PolicyCtx, SchedPolicy};
use crate::task::TaskTable;
use crate::TaskId;

/// The idle policy. Stateless.
#[derive(Debug, Default)]
pub struct IdlePolicy;

impl IdlePolicy {
    /// New idle policy.
    pub fn new() -> Self {
        Self
    }
}

impl SchedPolicy for IdlePolicy {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn init(
        &mut self,
        _params: Option<&Value>,
        _tasks: &TaskTable,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    fn enqueue(&mut self, _ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        // The idle task never joins a runqueue.
        Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into())
    }

    fn dequeue(&mut self, _ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        Err(ProtocolError::NotQueued { policy: self.name(), task }.into())
    }

    fn pick_next(&mut self, _ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        Some(TaskId::idle())
    }

    fn put_prev(&mut self, _ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> SimResult<()> {
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _task: TaskId) {}

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}
}
