//! # Policy Protocol
//!
//! The contract every scheduling policy satisfies. The kernel mediates all
//! calls: policies never hold references to tasks or to each other, and a
//! policy call must never trigger another dispatch - `check_preempt` and
//! `task_tick` request a reschedule through the context flag, which the
//! kernel honours at the next natural boundary.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, SimResult};
use crate::rng::SimRng;
use crate::task::TaskTable;
use crate::time::SimTime;
use crate::TaskId;

/// Mutable view a policy receives on every dispatch call.
///
/// `tasks` exposes the whole table, but a policy must only touch tasks of
/// its own class; the runqueue and private counters it owns exclusively.
#[derive(Debug)]
pub struct PolicyCtx<'a> {
    /// Current simulation time.
    pub now: SimTime,
    /// The task table.
    pub tasks: &'a mut TaskTable,
    /// The kernel's RNG (interval sampling).
    pub rng: &'a mut SimRng,
    /// The task currently on the CPU.
    pub current: TaskId,
    /// Set to request a reschedule at the next boundary.
    pub resched: &'a mut bool,
    /// Scheduler tick period.
    pub tick_len: SimTime,
}

/// One key/value pair of policy-specific statistics.
pub type ExtraStat = (&'static str, f64);

/// The scheduling-policy contract.
///
/// Dispatch rules enforced by the kernel:
/// - `put_prev` runs on the previous task's policy exactly once per dispatch
///   cycle iff some policy returned a task (and the winner is not the
///   previous task itself).
/// - `pick_next` must not re-enter the dispatcher; preemption wishes go
///   through [`PolicyCtx::resched`].
pub trait SchedPolicy: std::fmt::Debug {
    /// Stable policy name; configuration documents reference it.
    fn name(&self) -> &'static str;

    /// Reset internal state, install per-task private state for `members`
    /// and validate `params`. Called once per run, before any event.
    fn init(
        &mut self,
        params: Option<&Value>,
        tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError>;

    /// `task` became runnable and joins this runqueue. Sets `ON_RQ`.
    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()>;

    /// `task` leaves the runqueue for any reason. Clears `ON_RQ`.
    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()>;

    /// Select the next task of this class, removing it from the runqueue,
    /// or `None` to pass. `ctx.current` is the task being descheduled.
    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId>;

    /// Finalise bookkeeping for the just-descheduled `prev` (decrement its
    /// slice, re-enqueue it if still runnable, ...).
    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()>;

    /// `task` of this class became runnable while another task of this
    /// class is current; may request a reschedule.
    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId);

    /// Periodic scheduler tick while a task of this class is current; may
    /// request a reschedule.
    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>);

    /// Policy-specific statistics, surfaced per class in the report.
    fn class_stats(&self) -> Vec<ExtraStat> {
        Vec::new()
    }
}

/// Deserialize a policy's `class_params` object, falling back to defaults
/// when absent.
pub(crate) fn parse_params<T>(class: &'static str, params: Option<&Value>) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    match params {
        None => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| ConfigError::BadClassParam {
            class: class.to_string(),
            param: "*".to_string(),
            reason: e.to_string(),
        }),
    }
}
