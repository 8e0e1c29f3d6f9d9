//! # Engine Errors
//!
//! Three fatal error shapes surface from the engine: configuration errors
//! (the run never starts), protocol violations (a policy or the kernel broke
//! the dispatch contract) and invariant violations (engine state is
//! corrupt). "No task runnable" is not an error; idle runs instead.

use thiserror::Error;

use crate::time::TimeError;
use crate::{SimTime, TaskId};

/// Engine result type.
pub type SimResult<T> = Result<T, SimError>;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed or inconsistent configuration; fatal at load.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The dispatch protocol was broken; indicates an engine or policy bug.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Engine state failed an internal consistency check.
    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantError),

    /// An engine method was called in the wrong lifecycle state.
    #[error("engine state: {0}")]
    State(&'static str),
}

/// Configuration-load errors. All are fatal for the whole load.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A time field failed to parse.
    #[error("field `{field}`: {source}")]
    Time {
        /// Dotted path of the offending field.
        field: String,
        /// Underlying parse failure.
        #[source]
        source: TimeError,
    },

    /// `timer_tick_len` must exceed one nanosecond.
    #[error("`timer_tick_len` must be > 1ns, got {0}ns")]
    TickTooShort(SimTime),

    /// A task or the top level referenced a policy that is not registered.
    #[error("unknown policy `{name}` (referenced by `{referrer}`)")]
    UnknownPolicy {
        /// The unresolved policy name.
        name: String,
        /// Task name or `config` for the top-level default.
        referrer: String,
    },

    /// A task has no policy and no top-level default exists.
    #[error("process `{0}` has no policy and no default `policy` is set")]
    NoPolicy(String),

    /// `processes` must be non-empty.
    #[error("`processes` must contain at least one entry")]
    NoProcesses,

    /// A `custom` key collided with a kernel-owned field name.
    #[error("process `{pname}`: custom key `{key}` is reserved")]
    ReservedKey {
        /// Offending process.
        pname: String,
        /// Reserved field name.
        key: String,
    },

    /// A behaviour list or entry is malformed.
    #[error("process `{pname}`, behavior[{index}]: {reason}")]
    BadBehavior {
        /// Offending process.
        pname: String,
        /// Index into the behaviour list.
        index: usize,
        /// Human-readable cause.
        reason: String,
    },

    /// A per-class parameter failed validation in the policy's `init`.
    #[error("class `{class}`, param `{param}`: {reason}")]
    BadClassParam {
        /// Policy name.
        class: String,
        /// Parameter name.
        param: String,
        /// Human-readable cause.
        reason: String,
    },

    /// A priority is outside the range accepted by the owning policy.
    #[error("process `{pname}`: priority {priority} out of range for `{class}`")]
    PriorityOutOfRange {
        /// Offending process.
        pname: String,
        /// Declared priority.
        priority: i64,
        /// Owning policy name.
        class: String,
    },

    /// The document itself failed to deserialize.
    #[error("malformed configuration document: {0}")]
    Malformed(String),
}

/// Dispatch-contract violations. Fatal; abort the run.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An event was inserted behind the simulation clock.
    #[error("event scheduled at {time}ns, but now is {now}ns")]
    EventInPast {
        /// Requested event time.
        time: SimTime,
        /// Current simulation time.
        now: SimTime,
    },

    /// `enqueue` was called for a task already on a runqueue.
    #[error("policy `{policy}`: task {task:?} is already queued")]
    AlreadyQueued {
        /// Owning policy name.
        policy: &'static str,
        /// Offending task.
        task: TaskId,
    },

    /// `dequeue` was called for a task not on the runqueue.
    #[error("policy `{policy}`: task {task:?} is not queued")]
    NotQueued {
        /// Owning policy name.
        policy: &'static str,
        /// Offending task.
        task: TaskId,
    },

    /// The event queue ran dry during a run (a `SimStop` must always be
    /// pending while a run is in progress).
    #[error("event queue empty at {now}ns with the run still in progress")]
    QueueExhausted {
        /// Current simulation time.
        now: SimTime,
    },

    /// A stale or foreign handle was passed to the event queue.
    #[error("stale event handle (slot {slot}, generation {generation})")]
    StaleHandle {
        /// Arena slot of the handle.
        slot: usize,
        /// Generation the handle was minted with.
        generation: u64,
    },
}

/// Internal consistency failures. Fatal; indicate a kernel or policy bug.
#[derive(Debug, Error)]
pub enum InvariantError {
    /// An ordered-map runqueue's key disagreed with the stored task.
    #[error("policy `{policy}`: task {task:?} not found under key {key}")]
    RunqueueKeyMismatch {
        /// Owning policy name.
        policy: &'static str,
        /// Missing task.
        task: TaskId,
        /// Key the task was expected under.
        key: u64,
    },

    /// A task reached a preemption path with nothing left to run.
    #[error("task {task:?}: remaining_runtime is 0 on a preemption path at {now}ns")]
    ZeroRemaining {
        /// Offending task.
        task: TaskId,
        /// Current simulation time.
        now: SimTime,
    },

    /// Task state flags are mutually inconsistent.
    #[error("task {task:?}: {detail}")]
    TaskState {
        /// Offending task.
        task: TaskId,
        /// Which flag combination failed.
        detail: String,
    },
}
