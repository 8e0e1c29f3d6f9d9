//! # Linux O(1)
//!
//! Two sets of 140 FIFO lists (priorities `-120..=19`, real-time below
//! `-20`) with a presence bitmap over each. Selection scans the active
//! bitmap for the lowest set index; when the active set drains, the two
//! sets swap. Slice-exhausted tasks reset their slice and move to the
//! expired set.

use std::collections::{HashMap, VecDeque};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, InvariantError, ProtocolError, SimResult};
use crate::sched::traits::{parse_params, ExtraStat, PolicyCtx, SchedPolicy};
use crate::task::{TaskFlags, TaskTable};
use crate::time::SimTime;
use crate::TaskId;

/// 140 priority levels: 100 real-time + 40 standard.
const NR_PRIO: usize = 140;
const BITMAP_WORDS: usize = 3;

static_assertions::const_assert!(BITMAP_WORDS * 64 >= NR_PRIO);

fn default_time_scale() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinuxO1Params {
    #[serde(default = "default_time_scale")]
    time_scale: u64,
}

impl Default for LinuxO1Params {
    fn default() -> Self {
        Self { time_scale: default_time_scale() }
    }
}

/// One set of 140 FIFO lists with a presence bitmap.
#[derive(Debug)]
struct PrioArray {
    lists: Vec<VecDeque<TaskId>>,
    bitmap: [u64; BITMAP_WORDS],
    count: usize,
}

impl PrioArray {
    fn new() -> Self {
        Self {
            lists: (0..NR_PRIO).map(|_| VecDeque::new()).collect(),
            bitmap: [0; BITMAP_WORDS],
            count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn enqueue(&mut self, index: usize, task: TaskId) {
        self.lists[index].push_back(task);
        self.bitmap[index / 64] |= 1 << (index % 64);
        self.count += 1;
    }

    fn remove(&mut self, index: usize, task: TaskId) -> bool {
        let list = &mut self.lists[index];
        let Some(pos) = list.iter().position(|&t| t == task) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.bitmap[index / 64] &= !(1 << (index % 64));
        }
        self.count -= 1;
        true
    }

    /// Lowest set index (highest priority).
    fn first_set(&self) -> Option<usize> {
        for (word_idx, &word) in self.bitmap.iter().enumerate() {
            if word != 0 {
                return Some(word_idx * 64 + word.trailing_zeros() as usize);
            }
        }
        None
    }

    fn pop_first(&mut self) -> Option<(usize, TaskId)> {
        let index = self.first_set()?;
        let task = self.lists[index].pop_front().expect("set bit implies non-empty list");
        if self.lists[index].is_empty() {
            self.bitmap[index / 64] &= !(1 << (index % 64));
        }
        self.count -= 1;
        Some((index, task))
    }

    fn clear(&mut self) {
        for list in &mut self.lists {
            list.clear();
        }
        self.bitmap = [0; BITMAP_WORDS];
        self.count = 0;
    }
}

/// Linux O(1) policy state.
#[derive(Debug)]
pub struct LinuxO1Policy {
    /// The two sets; `active` indexes into this.
    arrays: [PrioArray; 2],
    active: usize,
    time_scale: u64,
    /// Remaining slice per owned task.
    slices: HashMap<TaskId, i64>,
    /// `exec_time` snapshot at pick.
    picked_exec: HashMap<TaskId, SimTime>,
    /// `(array, list index)` of every queued task.
    where_queued: HashMap<TaskId, (usize, usize)>,
    /// Active/expired swaps performed.
    swaps: u64,
}

fn prio_index(priority: i64) -> usize {
    (priority + 120) as usize
}

impl LinuxO1Policy {
    /// New, empty policy.
    pub fn new() -> Self {
        Self {
            arrays: [PrioArray::new(), PrioArray::new()],
            active: 0,
            time_scale: default_time_scale(),
            slices: HashMap::new(),
            picked_exec: HashMap::new(),
            where_queued: HashMap::new(),
            swaps: 0,
        }
    }

    /// Real-time priorities get a fixed slice; standard ones scale down
    /// with niceness.
    fn base_slice(&self, priority: i64) -> i64 {
        let ts = self.time_scale as i64;
        if priority < -20 {
            900 * ts
        } else {
            ((19 - priority) as f64 * 20.4 + 5.0).round() as i64 * ts
        }
    }

    fn push(&mut self, array: usize, task: TaskId, priority: i64) {
        let index = prio_index(priority);
        self.arrays[array].enqueue(index, task);
        self.where_queued.insert(task, (array, index));
    }
}

impl Default for LinuxO1Policy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for LinuxO1Policy {
    fn name(&self) -> &'static str {
        "linux_o1"
    }

    fn init(
        &mut self,
        params: Option<&Value>,
        tasks: &TaskTable,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: LinuxO1Params = parse_params(self.name(), params)?;
        if params.time_scale == 0 {
            return Err(ConfigError::BadClassParam {
                class: self.name().to_string(),
                param: "time_scale".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        self.time_scale = params.time_scale;
        self.arrays[0].clear();
        self.arrays[1].clear();
        self.active = 0;
        self.picked_exec.clear();
        self.where_queued.clear();
        self.swaps = 0;
        self.slices.clear();
        for &t in members {
            let priority = tasks[t].behavior.priority;
            if !(-120..=19).contains(&priority) {
                return Err(ConfigError::PriorityOutOfRange {
                    pname: tasks[t].pname.clone(),
                    priority,
                    class: self.name().to_string(),
                });
            }
            self.slices.insert(t, self.base_slice(priority));
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        if self.where_queued.contains_key(&task) {
            return Err(ProtocolError::AlreadyQueued { policy: self.name(), task }.into());
        }
        let priority = ctx.tasks[task].behavior.priority;
        let base = self.base_slice(priority);
        let slice = self.slices.entry(task).or_insert(base);
        if *slice <= 0 {
            *slice = base;
        }
        self.push(self.active, task, priority);
        ctx.tasks[task].flags.insert(TaskFlags::ON_RQ);
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> SimResult<()> {
        let (array, index) = self
            .where_queued
            .remove(&task)
            .ok_or(ProtocolError::NotQueued { policy: self.name(), task })?;
        if !self.arrays[array].remove(index, task) {
            return Err(InvariantError::RunqueueKeyMismatch {
                policy: self.name(),
                task,
                key: index as u64,
            }
            .into());
        }
        ctx.tasks[task].flags.remove(TaskFlags::ON_RQ);
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>) -> Option<TaskId> {
        if self.arrays[self.active].is_empty() {
            if self.arrays[1 - self.active].is_empty() {
                return None;
            }
            self.active = 1 - self.active;
            self.swaps += 1;
        }
        let (_, next) = self.arrays[self.active].pop_first()?;
        self.where_queued.remove(&next);
        self.picked_exec.insert(next, ctx.tasks[next].exec_time);
        ctx.tasks[next].flags.remove(TaskFlags::ON_RQ);
        Some(next)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> SimResult<()> {
        if let Some(start) = self.picked_exec.remove(&prev) {
            let elapsed = (ctx.tasks[prev].exec_time - start) as i64;
            *self.slices.entry(prev).or_insert(0) -= elapsed;
        }
        let task = &mut ctx.tasks[prev];
        if task.runnable() && !task.on_rq() {
            task.flags.insert(TaskFlags::ON_RQ);
            let priority = task.behavior.priority;
            let base = self.base_slice(priority);
            let slice = self.slices.entry(prev).or_insert(base);
            if *slice <= 0 {
                // Slice spent: reset and park in the expired set.
                *slice = base;
                self.push(1 - self.active, prev, priority);
            } else {
                self.push(self.active, prev, priority);
            }
        }
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        if ctx.tasks[task].behavior.priority < ctx.tasks[ctx.current].behavior.priority {
            *ctx.resched = true;
        }
    }

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        let current = ctx.current;
        let (Some(&slice), Some(&start)) =
            (self.slices.get(&current), self.picked_exec.get(&current))
        else {
            return;
        };
        let elapsed = (ctx.tasks[current].exec_time - start) as i64;
        if slice - elapsed <= 0 {
            *ctx.resched = true;
        }
    }

    fn class_stats(&self) -> Vec<ExtraStat> {
        vec![("array_swaps", self.swaps as f64)]
    }
}
