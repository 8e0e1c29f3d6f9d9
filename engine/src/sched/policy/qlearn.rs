//! # Q-Learning Prototype
//!
//! Experimental: picks among queued tasks with an epsilon-greedy policy
//! over per-task Q-values, rewarded by (negative) observed waiting time.
//! Semantics are deliberately minimal; compiled only with the `qlearn`
//! feature and excluded from the scenario suite.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, ProtocolError, SimResult};
use crate::sched::queue::FifoQueue;
use crate::sched::traits::{parse_params, ExtraStat, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::TaskId;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct QParams {
    alpha: f64,
    epsilon: f64,
}

impl Default for QParams {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            epsilon: 0.1,
        }
    }
}

/// Q-learning policy state.
#[derive(Debug, Default)]
pub struct QLearnPolicy {
    queue: FifoQueue,
    q_values: HashMap<TaskId, f64>,
    alpha: f64,
    epsilon: f64,
}

impl QLearnPolicy {
    /// New policy with default learning parameters.
    pub fn new() -> Self {
        Self {
            alpha: 0.1,
            epsilon: 0.1,
            ..Self::default()
        }
    }
}

impl SchedPolicy for QLearnPolicy {
    fn name(&self) -> &'static str {
        "qlearn"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        _tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: QParams = parse_params(self.name(), params)?;
        for (name, v) in [("alpha", params.alpha), ("epsilon", params.epsilon)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::BadClassParam {
                    class: self.name().to_string(),
                    param: name.to_string(),
                    reason: "must be in [0, 1]".to_string(),
                });
            }
        }
        self.alpha = params.alpha;
        self.epsilon = params.epsilon;
        self.queue.clear();
        self.q_values = members.iter().map(|&t| (t, 0.0)).collect();
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
        if self.queue.is_empty() {
            return None;
        }
        let explore = ctx.rng.unit() < self.epsilon;
        let next = if explore {
            let i = ctx.rng.uniform(0, self.queue.len() as u64 - 1) as usize;
            self.queue.iter().nth(i)?
        } else {
            self.queue.iter().max_by(|&a, &b| {
                let qa = self.q_values.get(&a).copied().unwrap_or(0.0);
                let qb = self.q_values.get(&b).copied().unwrap_or(0.0);
                qa.total_cmp(&qb)
            })?
        };
        self.queue.remove(next);
        ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);

        // Reward the choice by how little it had to wait.
        let reward = -((ctx.now - ctx.tasks[next].enqueued_at) as f64);
        let q = self.q_values.entry(next).or_insert(0.0);
        *q = (1.0 - self.alpha) * *q + self.alpha * reward;

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

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}

    fn class_stats(&self) -> Vec<ExtraStat> {
        let best = self
            .q_values
            .values()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        if best.is_finite() {
            vec![("best_q", best)]
        } else {
            Vec::new()
        }
    }
}
