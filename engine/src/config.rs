//! # Configuration
//!
//! The engine consumes a structured document (typically JSON): a simulation
//! length, an optional default policy, per-class parameters and a non-empty
//! list of process specs, each with a spawn delay and a behaviour program.
//!
//! Parsing and validation happen in one pass at load; any failure is fatal
//! for the whole load and the engine refuses to start.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::rng::RngMode;
use crate::task::{BehaviorChange, BehaviorEntry, CurrentBehavior, SwitchCond};
use crate::time::{RawTime, SimTime, TimeSpec, MILLIS};

/// Task field names owned by the kernel or by policies; user `custom` maps
/// may not shadow them.
pub const RESERVED_FIELDS: &[&str] = &[
    "pid", "pname", "policy", "class", "alive", "runnable", "on_rq", "waiting",
    "current", "spawn", "spawned", "exited", "enqueued_at", "picked_at",
    "updated_at", "exec_count", "exec_time", "wait_time", "remaining_runtime",
    "run_log", "latency_log", "exec_log", "behavior", "current_behavior",
    "next_behavior_index", "next_event", "strict_end_event", "weight",
    "vruntime", "prev_sum_exec", "time_slice", "q_values",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    name: String,
    sim_len: RawTime,
    timer_tick_len: Option<RawTime>,
    policy: Option<String>,
    #[serde(default)]
    class_prio: Vec<String>,
    #[serde(default)]
    class_params: HashMap<String, Value>,
    processes: Vec<RawProcess>,
    #[serde(default)]
    seed: u64,
    #[serde(default)]
    rng_mode: RngMode,
    preemption: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProcess {
    pname: Option<String>,
    spawn: RawTime,
    policy: Option<String>,
    #[serde(default)]
    custom: serde_json::Map<String, Value>,
    behavior: Vec<Value>,
}

/// A validated process spec.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Display name; auto-generated from the pid when absent.
    pub pname: Option<String>,
    /// Spawn delay.
    pub spawn: TimeSpec,
    /// Owning policy name; falls back to the config default.
    pub policy: Option<String>,
    /// Opaque user fields, echoed in the report.
    pub custom: serde_json::Map<String, Value>,
    /// Initial behaviour.
    pub initial: CurrentBehavior,
    /// Update/final entries in program order.
    pub entries: Vec<BehaviorEntry>,
}

/// A validated simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Configuration name, echoed in the report.
    pub name: String,
    /// Total simulated time.
    pub sim_len: SimTime,
    /// Scheduler tick period.
    pub timer_tick_len: SimTime,
    /// Default policy for tasks that do not name one.
    pub default_policy: Option<String>,
    /// Policies promoted to the top of the priority order, in order.
    pub class_prio: Vec<String>,
    /// Per-policy parameter objects, validated by each policy's `init`.
    pub class_params: HashMap<String, Value>,
    /// Process specs, in pid order.
    pub processes: Vec<ProcessSpec>,
    /// RNG seed.
    pub seed: u64,
    /// Multi-run RNG treatment.
    pub rng_mode: RngMode,
    /// Whether the periodic tick drives `task_tick`.
    pub preemption: bool,
}

impl SimConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed document.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        // A zero sim_len yields an empty-but-valid run.
        let sim_len = resolve_fixed(&raw.sim_len, "sim_len")?;

        let timer_tick_len = match &raw.timer_tick_len {
            Some(t) => resolve_fixed(t, "timer_tick_len")?,
            None => MILLIS,
        };
        if timer_tick_len <= 1 {
            return Err(ConfigError::TickTooShort(timer_tick_len));
        }

        if raw.processes.is_empty() {
            return Err(ConfigError::NoProcesses);
        }

        let mut processes = Vec::with_capacity(raw.processes.len());
        for (i, proc) in raw.processes.iter().enumerate() {
            let pname = proc
                .pname
                .clone()
                .unwrap_or_else(|| format!("proc{}", i + 1));

            if proc.policy.is_none() && raw.policy.is_none() {
                return Err(ConfigError::NoPolicy(pname));
            }

            for key in proc.custom.keys() {
                if RESERVED_FIELDS.contains(&key.as_str()) {
                    return Err(ConfigError::ReservedKey {
                        pname,
                        key: key.clone(),
                    });
                }
            }

            let spawn = proc.spawn.resolve(1).map_err(|source| ConfigError::Time {
                field: format!("processes[{i}].spawn"),
                source,
            })?;

            let (initial, entries) = parse_behavior(&pname, &proc.behavior)?;

            processes.push(ProcessSpec {
                pname: proc.pname.clone(),
                spawn,
                policy: proc.policy.clone(),
                custom: proc.custom.clone(),
                initial,
                entries,
            });
        }

        Ok(Self {
            name: raw.name,
            sim_len,
            timer_tick_len,
            default_policy: raw.policy,
            class_prio: raw.class_prio,
            class_params: raw.class_params,
            processes,
            seed: raw.seed,
            rng_mode: raw.rng_mode,
            preemption: raw.preemption.unwrap_or(true),
        })
    }
}

fn resolve_fixed(raw: &RawTime, field: &str) -> Result<SimTime, ConfigError> {
    match raw.resolve(1) {
        Ok(TimeSpec::Fixed(t)) => Ok(t),
        Ok(TimeSpec::Between(..)) => Err(ConfigError::Time {
            field: field.to_string(),
            source: crate::time::TimeError::BadInterval("interval not allowed here".into()),
        }),
        Err(source) => Err(ConfigError::Time {
            field: field.to_string(),
            source,
        }),
    }
}

fn bad(pname: &str, index: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::BadBehavior {
        pname: pname.to_string(),
        index,
        reason: reason.into(),
    }
}

fn entry_time(
    pname: &str,
    index: usize,
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<TimeSpec>, ConfigError> {
    let Some(v) = map.get(key) else {
        return Ok(None);
    };
    let raw: RawTime = serde_json::from_value(v.clone())
        .map_err(|_| bad(pname, index, format!("`{key}` is not a time value")))?;
    let spec = raw
        .resolve(1)
        .map_err(|e| bad(pname, index, format!("`{key}`: {e}")))?;
    Ok(Some(spec))
}

/// Validate a behaviour list: entry 0 fixes `{priority, run, block}`, later
/// entries are updates (at least one of the three, exactly one switch
/// condition) or finals (`final: true`, exactly one switch condition).
fn parse_behavior(
    pname: &str,
    list: &[Value],
) -> Result<(CurrentBehavior, Vec<BehaviorEntry>), ConfigError> {
    if list.is_empty() {
        return Err(bad(pname, 0, "behavior list is empty"));
    }

    let first = list[0]
        .as_object()
        .ok_or_else(|| bad(pname, 0, "entry is not an object"))?;
    let priority = first
        .get("priority")
        .and_then(Value::as_i64)
        .ok_or_else(|| bad(pname, 0, "`priority` missing or not an integer"))?;
    let run = entry_time(pname, 0, first, "run")?
        .ok_or_else(|| bad(pname, 0, "`run` missing"))?;
    let block = entry_time(pname, 0, first, "block")?
        .ok_or_else(|| bad(pname, 0, "`block` missing"))?;
    for key in first.keys() {
        if !matches!(key.as_str(), "priority" | "run" | "block") {
            return Err(bad(pname, 0, format!("unexpected field `{key}`")));
        }
    }

    let initial = CurrentBehavior {
        priority,
        run,
        block,
    };

    let mut entries = Vec::with_capacity(list.len() - 1);
    let mut saw_final = false;
    for (offset, value) in list[1..].iter().enumerate() {
        let index = offset + 1;
        let map = value
            .as_object()
            .ok_or_else(|| bad(pname, index, "entry is not an object"))?;
        if saw_final {
            return Err(bad(pname, index, "entries after a final entry"));
        }

        let cond = parse_switch(pname, index, map)?;
        let is_final = map.get("final").and_then(Value::as_bool).unwrap_or(false);

        if is_final {
            for key in map.keys() {
                if !matches!(
                    key.as_str(),
                    "final" | "end_nicely" | "sim_exec" | "proc_exec" | "exec_count"
                ) {
                    return Err(bad(pname, index, format!("unexpected field `{key}` in final entry")));
                }
            }
            let end_nicely = map.get("end_nicely").and_then(Value::as_bool).unwrap_or(true);
            entries.push(BehaviorEntry::Final { cond, end_nicely });
            saw_final = true;
        } else {
            let change = BehaviorChange {
                priority: match map.get("priority") {
                    Some(v) => Some(v.as_i64().ok_or_else(|| {
                        bad(pname, index, "`priority` is not an integer")
                    })?),
                    None => None,
                },
                run: entry_time(pname, index, map, "run")?,
                block: entry_time(pname, index, map, "block")?,
            };
            if change.priority.is_none() && change.run.is_none() && change.block.is_none() {
                return Err(bad(pname, index, "update changes none of priority/run/block"));
            }
            for key in map.keys() {
                if !matches!(
                    key.as_str(),
                    "priority" | "run" | "block" | "sim_exec" | "proc_exec" | "exec_count"
                ) {
                    return Err(bad(pname, index, format!("unexpected field `{key}`")));
                }
            }
            entries.push(BehaviorEntry::Update { cond, change });
        }
    }

    Ok((initial, entries))
}

/// Exactly one of `sim_exec` / `proc_exec` / `exec_count`.
fn parse_switch(
    pname: &str,
    index: usize,
    map: &serde_json::Map<String, Value>,
) -> Result<SwitchCond, ConfigError> {
    let mut conds = Vec::new();
    if let Some(spec) = entry_time(pname, index, map, "sim_exec")? {
        match spec {
            TimeSpec::Fixed(t) => conds.push(SwitchCond::SimExec(t)),
            TimeSpec::Between(..) => {
                return Err(bad(pname, index, "`sim_exec` cannot be an interval"))
            }
        }
    }
    if let Some(spec) = entry_time(pname, index, map, "proc_exec")? {
        match spec {
            TimeSpec::Fixed(t) => conds.push(SwitchCond::ProcExec(t)),
            TimeSpec::Between(..) => {
                return Err(bad(pname, index, "`proc_exec` cannot be an interval"))
            }
        }
    }
    if let Some(v) = map.get("exec_count") {
        let n = v
            .as_u64()
            .ok_or_else(|| bad(pname, index, "`exec_count` is not a non-negative integer"))?;
        conds.push(SwitchCond::ExecCount(n));
    }

    if conds.len() > 1 {
        return Err(bad(pname, index, "more than one switch condition"));
    }
    conds
        .pop()
        .ok_or_else(|| bad(pname, index, "missing switch condition"))
}
