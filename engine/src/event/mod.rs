//! # Simulation Events
//!
//! Everything that happens in a run is an event popped from the time-ordered
//! queue. Events are a tagged sum; the only runtime-polymorphic objects in
//! the engine are the policies.

pub mod queue;

pub use queue::{EventHandle, EventQueue};

use crate::time::SimTime;
use crate::TaskId;

/// What an event does when the kernel dispatches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The run begins; triggers the first dispatch.
    SimStart,
    /// The run ends.
    SimStop,
    /// A task is born (after its spawn delay) and becomes runnable.
    Fork(TaskId),
    /// A blocked task wakes and becomes runnable.
    Enqueue(TaskId),
    /// The running task's burst ends; it blocks.
    Block(TaskId),
    /// A task leaves the system.
    Exit {
        /// The exiting task.
        task: TaskId,
        /// Which switch condition produced the exit.
        kind: ExitKind,
        /// Whether the exit waited for the current burst (`end_nicely`).
        nice: bool,
    },
    /// Periodic scheduler tick.
    Timer,
}

impl EventKind {
    /// The task this event targets, if any.
    pub fn task(&self) -> Option<TaskId> {
        match *self {
            EventKind::Fork(t) | EventKind::Enqueue(t) | EventKind::Block(t) => Some(t),
            EventKind::Exit { task, .. } => Some(task),
            EventKind::SimStart | EventKind::SimStop | EventKind::Timer => None,
        }
    }

    /// Short label for logs and the event trace.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SimStart => "sim_start",
            EventKind::SimStop => "sim_stop",
            EventKind::Fork(_) => "fork",
            EventKind::Enqueue(_) => "enqueue",
            EventKind::Block(_) => "block",
            EventKind::Exit { .. } => "exit",
            EventKind::Timer => "timer",
        }
    }
}

/// Which behaviour switch condition an exit event came from. The shape of
/// the exit (when it fires, what it replaces) depends on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Absolute simulation-time threshold.
    SimExec,
    /// Cumulative per-task execution threshold.
    ProcExec,
    /// Execution-count threshold.
    ExecCount,
}

/// A scheduled occurrence. `time` is when it fires; `set_on` is when it was
/// placed, kept for the event trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Scheduled instant.
    pub time: SimTime,
    /// Instant the event was inserted.
    pub set_on: SimTime,
    /// Payload.
    pub kind: EventKind,
}
