//! # Task Model
//!
//! A task is a synthetic process: identity, an owning scheduling class, a
//! behaviour program (run/block bursts with optional mid-life updates and an
//! optional final entry) and the bookkeeping the kernel maintains about it.
//!
//! State is four orthogonal booleans kept strictly consistent by the kernel:
//! `ALIVE` (between fork and exit), `RUNNABLE` (ready or running), `ON_RQ`
//! (stored in its policy's runqueue) and `WAITING` (counted toward latency).

pub mod behavior;

pub use behavior::{BehaviorChange, BehaviorEntry, CurrentBehavior, SwitchCond};

use serde::Serialize;

use crate::event::EventHandle;
use crate::time::{SimTime, TimeSpec};
use crate::{ClassId, TaskId};

/// Task state flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Task state flags
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct TaskFlags: u8 {
            /// Between fork and exit.
            const ALIVE = 1 << 0;
            /// Ready or running; not blocked, not exited.
            const RUNNABLE = 1 << 1;
            /// Currently stored in its policy's runqueue.
            const ON_RQ = 1 << 2;
            /// Counted toward its class's latency accumulation.
            const WAITING = 1 << 3;
        }
    }
}

pub use flags::TaskFlags;

/// One executed burst, for timeline reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecSpan {
    /// Instant the task was picked.
    pub start: SimTime,
    /// Instant it was descheduled.
    pub end: SimTime,
}

/// A simulated process.
///
/// Mutated exclusively by the kernel and by the owning policy; policies keep
/// their private per-task state (weights, slices, vruntimes) in their own
/// side tables, keyed by [`TaskId`].
#[derive(Debug)]
pub struct Task {
    /// Dense id; doubles as the pid.
    pub id: TaskId,
    /// Display name.
    pub pname: String,
    /// Owning scheduling class.
    pub class: ClassId,
    /// State flags.
    pub flags: TaskFlags,

    /// Spawn delay resolved at load; the `Fork` event fires here.
    pub spawned: SimTime,
    /// Exit instant, once dead.
    pub exited: Option<SimTime>,

    /// Last time the task joined a runqueue (or started waiting again).
    pub enqueued_at: SimTime,
    /// Last time the task was picked to run.
    pub picked_at: SimTime,
    /// Last time running time was charged to the task.
    pub updated_at: SimTime,

    /// Number of times the task has been picked.
    pub exec_count: u64,
    /// Total time spent running.
    pub exec_time: SimTime,
    /// Total time spent runnable-but-not-running.
    pub wait_time: SimTime,
    /// Unconsumed portion of the current burst; carried across preemptions.
    pub remaining_runtime: SimTime,

    /// Burst durations, one entry per deschedule.
    pub run_log: Vec<SimTime>,
    /// Wait durations, one entry per pick.
    pub latency_log: Vec<SimTime>,
    /// Executed spans, for the timeline.
    pub exec_log: Vec<ExecSpan>,

    /// Effective behaviour (first entry overlaid with fired updates).
    pub behavior: CurrentBehavior,
    /// Not-yet-fired update/final entries, in program order.
    pub pending: Vec<BehaviorEntry>,
    /// Index of the next entry in `pending` to consider at pick time.
    pub next_behavior_index: usize,

    /// Handle of the task's scheduled `Block`/`Exit`/`Enqueue` event.
    pub next_event: Option<EventHandle>,
    /// Handle of the unconditional strict `sim_exec` exit, when armed.
    pub strict_end_event: Option<EventHandle>,

    /// User-supplied opaque fields, echoed back in the report.
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Build a task in its pre-fork state.
    pub fn new(
        id: TaskId,
        pname: String,
        class: ClassId,
        spawned: SimTime,
        behavior: CurrentBehavior,
        pending: Vec<BehaviorEntry>,
        custom: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id,
            pname,
            class,
            flags: TaskFlags::empty(),
            spawned,
            exited: None,
            enqueued_at: 0,
            picked_at: 0,
            updated_at: 0,
            exec_count: 0,
            exec_time: 0,
            wait_time: 0,
            remaining_runtime: 0,
            run_log: Vec::new(),
            latency_log: Vec::new(),
            exec_log: Vec::new(),
            behavior,
            pending,
            next_behavior_index: 0,
            next_event: None,
            strict_end_event: None,
            custom,
        }
    }

    /// The always-alive, always-runnable idle task. Never on a runqueue.
    pub fn idle(class: ClassId) -> Self {
        let behavior = CurrentBehavior {
            priority: 0,
            run: TimeSpec::Fixed(0),
            block: TimeSpec::Fixed(0),
        };
        let mut task = Self::new(
            TaskId::idle(),
            "idle".to_string(),
            class,
            0,
            behavior,
            Vec::new(),
            serde_json::Map::new(),
        );
        task.flags = TaskFlags::ALIVE | TaskFlags::RUNNABLE;
        task
    }

    /// Whether the task is the idle task.
    pub fn is_idle(&self) -> bool {
        self.id == TaskId::idle()
    }

    /// Between fork and exit.
    pub fn alive(&self) -> bool {
        self.flags.contains(TaskFlags::ALIVE)
    }

    /// Ready or running.
    pub fn runnable(&self) -> bool {
        self.flags.contains(TaskFlags::RUNNABLE)
    }

    /// Stored in its policy's runqueue.
    pub fn on_rq(&self) -> bool {
        self.flags.contains(TaskFlags::ON_RQ)
    }

    /// Counted toward latency accumulation.
    pub fn waiting(&self) -> bool {
        self.flags.contains(TaskFlags::WAITING)
    }

    /// The behaviour entry the FSM will consider at the next pick.
    pub fn next_pending(&self) -> Option<&BehaviorEntry> {
        self.pending.get(self.next_behavior_index)
    }

    /// The pending final entry, if the FSM has advanced to one.
    pub fn pending_final(&self) -> Option<(&SwitchCond, bool)> {
        match self.next_pending() {
            Some(BehaviorEntry::Final { cond, end_nicely }) => Some((cond, *end_nicely)),
            _ => None,
        }
    }

    /// Turnaround time, once exited.
    pub fn turnaround(&self) -> Option<SimTime> {
        self.exited.map(|e| e - self.spawned)
    }
}

/// Dense table of all tasks in a run. Index 0 is the idle task.
#[derive(Debug)]
pub struct TaskTable {
    tasks: Vec<Task>,
}

impl TaskTable {
    /// Create a table containing only the idle task.
    pub fn new(idle_class: ClassId) -> Self {
        Self {
            tasks: vec![Task::idle(idle_class)],
        }
    }

    /// Register a task; ids are assigned densely in registration order.
    pub fn register(&mut self, build: impl FnOnce(TaskId) -> Task) -> TaskId {
        let id = TaskId::from_index(self.tasks.len());
        self.tasks.push(build(id));
        id
    }

    /// Number of tasks, idle included.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether only the idle task exists.
    pub fn is_empty(&self) -> bool {
        self.tasks.len() <= 1
    }

    /// All tasks, idle included.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// All real (non-idle) tasks.
    pub fn processes(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().skip(1)
    }
}

impl std::ops::Index<TaskId> for TaskTable {
    type Output = Task;

    fn index(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }
}

impl std::ops::IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.index()]
    }
}
