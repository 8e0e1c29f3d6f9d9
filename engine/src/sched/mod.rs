//! # Scheduler Kernel
//!
//! The event loop that drives a run: it owns the clock, the event queue,
//! the task table, the policy registry and the idle fallback, and it
//! mediates every call between tasks and policies.
//!
//! Dispatch contract highlights:
//! - Events at distinct times process in time order; co-time events in
//!   insertion order.
//! - Latency counters flush before every state change that affects them.
//! - `put_prev` runs on the previous task's policy exactly once per
//!   dispatch iff a task was picked (idle counts) and the winner is not the
//!   previous task itself.
//! - `check_preempt` and `task_tick` request a reschedule via a flag; the
//!   kernel performs it after the current event finishes dispatching.

pub mod metrics;
pub mod policy;
pub mod queue;
pub mod traits;

#[cfg(test)]
mod kernel_tests;

use std::time::Instant;

use crate::config::SimConfig;
use crate::error::{ConfigError, InvariantError, ProtocolError, SimError, SimResult};
use crate::event::{Event, EventKind, EventQueue, ExitKind};
use crate::report::{
    ClassLatency, ClassStatsEntry, EventRecord, LatencyReport, MultiRunReport, ProcessInfo,
    ProcessStats, SimReport, TurnaroundReport,
};
use crate::rng::{RngMode, SimRng};
use crate::stats::{ClassCounters, Stats};
use crate::task::behavior::{plan_exit, ExitPlan};
use crate::task::{BehaviorEntry, SwitchCond, Task, TaskFlags, TaskTable};
use crate::time::SimTime;
use crate::{ClassId, TaskId};

use self::metrics::KernelMetrics;
use self::policy::{builtin_policies, IdlePolicy};
use self::traits::{PolicyCtx, SchedPolicy};

/// A registered policy.
#[derive(Debug)]
struct PolicySlot {
    name: &'static str,
    policy: Box<dyn SchedPolicy>,
}

/// How far `advance` should take the run.
#[derive(Debug, Clone, Copy)]
enum RunMode {
    ToCompletion,
    Until(SimTime),
    Steps(u64),
}

/// Mutable state of one run.
#[derive(Debug)]
struct RunState {
    config: SimConfig,
    now: SimTime,
    current: TaskId,
    tasks: TaskTable,
    queue: EventQueue,
    rng: SimRng,
    metrics: KernelMetrics,
    /// Parallel to the registry.
    counters: Vec<ClassCounters>,
    /// Registry indices of active classes, priority high-to-low.
    active_order: Vec<usize>,
    sim_events: Vec<EventRecord>,
    live_count: usize,
    need_resched: bool,
    tick_len: SimTime,
    preemption: bool,
    finished: bool,
    started: Instant,
}

impl RunState {
    /// Policy-call context over this run's state.
    fn ctx(&mut self) -> PolicyCtx<'_> {
        PolicyCtx {
            now: self.now,
            tasks: &mut self.tasks,
            rng: &mut self.rng,
            current: self.current,
            resched: &mut self.need_resched,
            tick_len: self.tick_len,
        }
    }
}

/// The simulation engine: policy registry plus at most one prepared run.
///
/// Nothing survives between runs except the registered policy set and its
/// priority ordering.
#[derive(Debug)]
pub struct Engine {
    slots: Vec<PolicySlot>,
    /// Priority order over registry indices, highest first.
    registered_order: Vec<usize>,
    idle: IdlePolicy,
    run: Option<RunState>,
}

impl Engine {
    /// Engine with the built-in policy set registered.
    pub fn new() -> Self {
        let mut engine = Self {
            slots: Vec::new(),
            registered_order: Vec::new(),
            idle: IdlePolicy::new(),
            run: None,
        };
        for policy in builtin_policies() {
            engine.register_policy(policy);
        }
        engine
    }

    /// Register a policy. New policies join the tail of the registered
    /// priority order.
    pub fn register_policy(&mut self, policy: Box<dyn SchedPolicy>) -> ClassId {
        let index = self.slots.len();
        self.slots.push(PolicySlot {
            name: policy.name(),
            policy,
        });
        self.registered_order.push(index);
        ClassId(index)
    }

    /// Registered policy names, in priority order.
    pub fn registered_names(&self) -> Vec<&'static str> {
        self.registered_order
            .iter()
            .map(|&i| self.slots[i].name)
            .collect()
    }

    /// Permute the registered priority order: `new[i] = old[perm[i]]`.
    pub fn reorder_registered(&mut self, perm: &[usize]) -> SimResult<()> {
        self.registered_order = permute(&self.registered_order, perm)?;
        Ok(())
    }

    /// Permute the active priority order of the prepared run.
    pub fn reorder_active(&mut self, perm: &[usize]) -> SimResult<()> {
        let run = self.run.as_mut().ok_or(SimError::State("no run prepared"))?;
        run.active_order = permute(&run.active_order, perm)?;
        Ok(())
    }

    /// Prepare a run. Replaces any prior run state.
    pub fn init(&mut self, config: SimConfig) -> SimResult<()> {
        let rng = SimRng::from_seed(config.seed);
        self.init_with_rng(config, rng)
    }

    fn init_with_rng(&mut self, config: SimConfig, mut rng: SimRng) -> SimResult<()> {
        self.run = None;

        let default_class = match &config.default_policy {
            Some(name) => Some(self.resolve_class(name, "config")?),
            None => None,
        };

        // Register tasks and sample their spawn delays.
        let mut tasks = TaskTable::new(ClassId::idle());
        for spec in &config.processes {
            let class = match &spec.policy {
                Some(name) => {
                    let referrer = spec.pname.clone().unwrap_or_else(|| "process".into());
                    self.resolve_class(name, &referrer)?
                }
                // Config validation guarantees a default exists.
                None => default_class.ok_or(ConfigError::NoPolicy("process".into()))?,
            };
            let spawned = spec.spawn.sample(&mut rng);
            let pname = spec.pname.clone();
            let initial = spec.initial.clone();
            let entries = spec.entries.clone();
            let custom = spec.custom.clone();
            tasks.register(|id| {
                let pname = pname.unwrap_or_else(|| format!("proc{}", id.as_u32()));
                Task::new(id, pname, ClassId(class), spawned, initial, entries, custom)
            });
        }

        // Priority order: `class_prio` entries first, then the registered
        // order; active classes are those with at least one task.
        let mut effective: Vec<usize> = Vec::new();
        for name in &config.class_prio {
            let index = self.resolve_class(name, "class_prio")?;
            if !effective.contains(&index) {
                effective.push(index);
            }
        }
        for &index in &self.registered_order {
            if !effective.contains(&index) {
                effective.push(index);
            }
        }
        let active_order: Vec<usize> = effective
            .into_iter()
            .filter(|&i| tasks.processes().any(|t| t.class.0 == i))
            .collect();

        // Policy init, in registered priority order.
        let registered = self.registered_order.clone();
        for index in registered {
            if !active_order.contains(&index) {
                continue;
            }
            let members: Vec<TaskId> = tasks
                .processes()
                .filter(|t| t.class.0 == index)
                .map(|t| t.id)
                .collect();
            let slot = &mut self.slots[index];
            let params = config.class_params.get(slot.name);
            slot.policy.init(params, &tasks, &members)?;
            log::debug!("initialized policy `{}` with {} tasks", slot.name, members.len());
        }

        // Seed the queue: start, stop, first tick, one fork per task.
        let mut queue = EventQueue::new();
        let ev = |time, kind| Event { time, set_on: 0, kind };
        queue.insert(ev(0, EventKind::SimStart))?;
        queue.insert(ev(config.sim_len, EventKind::SimStop))?;
        queue.insert(ev(config.timer_tick_len, EventKind::Timer))?;
        for task in tasks.processes() {
            queue.insert(ev(task.spawned, EventKind::Fork(task.id)))?;
        }

        log::info!(
            "prepared `{}`: {} processes, {} active classes, sim_len {}ns",
            config.name,
            tasks.processes().count(),
            active_order.len(),
            config.sim_len
        );

        let tick_len = config.timer_tick_len;
        let preemption = config.preemption;
        self.run = Some(RunState {
            config,
            now: 0,
            current: TaskId::idle(),
            tasks,
            queue,
            rng,
            metrics: KernelMetrics::new(),
            counters: (0..self.slots.len()).map(|_| ClassCounters::default()).collect(),
            active_order,
            sim_events: Vec::new(),
            live_count: 0,
            need_resched: false,
            tick_len,
            preemption,
            finished: false,
            started: Instant::now(),
        });
        Ok(())
    }

    fn resolve_class(&self, name: &str, referrer: &str) -> Result<usize, ConfigError> {
        self.slots
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownPolicy {
                name: name.to_string(),
                referrer: referrer.to_string(),
            })
    }

    /// Execute to completion.
    pub fn run(&mut self) -> SimResult<SimReport> {
        self.advance(RunMode::ToCompletion)
    }

    /// Execute until simulated time `t` (inclusive of events at `t`).
    pub fn run_until(&mut self, t: SimTime) -> SimResult<SimReport> {
        self.advance(RunMode::Until(t))
    }

    /// Execute `n` steps; a step consumes all events at one timestamp.
    pub fn step(&mut self, n: u64) -> SimResult<SimReport> {
        self.advance(RunMode::Steps(n))
    }

    /// Abort an in-progress run, preserving the partial trace, and return
    /// to the "no run" state.
    pub fn break_run(&mut self) -> SimResult<SimReport> {
        let report = {
            let run = self.run.as_ref().ok_or(SimError::State("no run prepared"))?;
            build_report(&self.slots, run)
        };
        self.run = None;
        Ok(report)
    }

    /// Execute `n` independent runs of `config` and reduce the aggregates.
    pub fn multi_run(&mut self, config: SimConfig, n: usize) -> SimResult<MultiRunReport> {
        let mut reports = Vec::with_capacity(n);
        let mut carried: Option<SimRng> = None;
        for i in 0..n {
            let mut cfg = config.clone();
            match cfg.rng_mode {
                RngMode::ReseedPerRun => {
                    cfg.seed = config.seed.wrapping_add(i as u64);
                    self.init(cfg)?;
                }
                RngMode::ContinueStream => {
                    let rng = carried
                        .take()
                        .unwrap_or_else(|| SimRng::from_seed(config.seed));
                    self.init_with_rng(cfg, rng)?;
                }
            }
            reports.push(self.run()?);
            if config.rng_mode == RngMode::ContinueStream {
                if let Some(run) = self.run.as_mut() {
                    carried = Some(std::mem::replace(&mut run.rng, SimRng::from_seed(0)));
                }
            }
        }
        self.run = None;
        Ok(MultiRunReport::reduce(reports))
    }

    fn advance(&mut self, mode: RunMode) -> SimResult<SimReport> {
        {
            let run = self.run.as_ref().ok_or(SimError::State("no run prepared"))?;
            if run.finished {
                return Err(SimError::State("run already finished"));
            }
        }

        let mut steps_done = 0u64;
        let mut step_time: Option<SimTime> = None;
        loop {
            #[cfg(debug_assertions)]
            self.assert_invariants();

            let run = self.run.as_mut().expect("checked above");
            let Some(next) = run.queue.peek_next() else {
                return Err(ProtocolError::QueueExhausted { now: run.now }.into());
            };
            let ev_time = next.time;

            match mode {
                RunMode::Until(t) if ev_time > t => {
                    if t > run.now {
                        charge_clock(run, t);
                    }
                    break;
                }
                RunMode::Steps(n) => {
                    if step_time != Some(ev_time) {
                        if steps_done == n {
                            break;
                        }
                        steps_done += 1;
                        step_time = Some(ev_time);
                    }
                }
                _ => {}
            }

            let event = run.queue.pop_next().expect("peeked above");
            charge_clock(run, event.time);
            record_event(run, &event);

            let mut kernel = Kernel {
                slots: &mut self.slots,
                idle: &mut self.idle,
                run,
            };
            kernel.dispatch_event(event)?;
            if kernel.run.need_resched {
                kernel.run.need_resched = false;
                kernel.dispatch_pick()?;
            }
            if kernel.run.finished {
                break;
            }
        }

        let run = self.run.as_ref().expect("still present");
        Ok(build_report(&self.slots, run))
    }

    /// Flag-consistency and counter checks at event-loop boundaries.
    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        let Some(run) = self.run.as_ref() else { return };
        for task in run.tasks.iter() {
            if !task.alive() {
                debug_assert!(
                    !task.runnable() && !task.on_rq() && !task.waiting(),
                    "dead task {:?} holds state flags",
                    task.id
                );
            }
            if task.is_idle() {
                debug_assert!(task.alive() && task.runnable() && !task.on_rq());
            }
        }
        for &class in &run.active_order {
            let running = run
                .tasks
                .processes()
                .filter(|t| t.class.0 == class && t.alive() && t.runnable())
                .count();
            let counters = &run.counters[class];
            debug_assert_eq!(counters.nr_running, running, "nr_running of class {class}");
            let current_here = run.current != TaskId::idle()
                && run.tasks[run.current].class.0 == class;
            debug_assert_eq!(
                counters.nr_waiting as i64,
                running as i64 - i64::from(current_here),
                "nr_waiting of class {class}"
            );
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate and apply a permutation.
fn permute(order: &[usize], perm: &[usize]) -> SimResult<Vec<usize>> {
    let mut seen = vec![false; perm.len()];
    let valid = perm.len() == order.len()
        && perm
            .iter()
            .all(|&p| p < perm.len() && !std::mem::replace(&mut seen[p], true));
    if !valid {
        return Err(SimError::State("not a permutation of the priority order"));
    }
    Ok(perm.iter().map(|&p| order[p]).collect())
}

/// Advance the clock, charging the elapsed span to the current task (or to
/// idle time).
fn charge_clock(run: &mut RunState, t: SimTime) {
    let current = run.current;
    let task = &mut run.tasks[current];
    if t > task.updated_at {
        let delta = t - task.updated_at;
        task.updated_at = t;
        if task.is_idle() {
            run.metrics.idle_time += delta;
        } else {
            task.exec_time += delta;
            task.remaining_runtime = task.remaining_runtime.saturating_sub(delta);
            run.metrics.busy_time += delta;
        }
    }
    run.now = t;
}

fn record_event(run: &mut RunState, event: &Event) {
    run.sim_events.push(EventRecord {
        time: event.time,
        set_on: event.set_on,
        kind: event.kind.label(),
        pid: event.kind.task().map(TaskId::as_u32),
    });
}

/// One dispatch's view over the engine: registry, idle fallback and the
/// run being driven.
struct Kernel<'a> {
    slots: &'a mut [PolicySlot],
    idle: &'a mut IdlePolicy,
    run: &'a mut RunState,
}

impl Kernel<'_> {
    fn dispatch_event(&mut self, event: Event) -> SimResult<()> {
        log::trace!("{}ns: {}", event.time, event.kind.label());
        match event.kind {
            EventKind::SimStart => self.dispatch_pick(),
            EventKind::Fork(task) => self.handle_wake(task, true),
            EventKind::Enqueue(task) => self.handle_wake(task, false),
            EventKind::Block(task) => self.handle_block(task),
            EventKind::Exit { task, kind, nice } => self.handle_exit(task, kind, nice),
            EventKind::Timer => self.handle_timer(),
            EventKind::SimStop => {
                self.run.finished = true;
                for class in self.run.active_order.clone() {
                    self.run.counters[class].sync(self.run.now);
                }
                log::info!("run finished at {}ns", self.run.now);
                Ok(())
            }
        }
    }

    /// The pending count-based final entry of a task, if any: `(threshold,
    /// end_nicely)`.
    fn pending_count_final(&self, task: TaskId) -> Option<(u64, bool)> {
        match self.run.tasks[task].pending_final() {
            Some((&SwitchCond::ExecCount(n), nice)) => Some((n, nice)),
            _ => None,
        }
    }

    /// Fork and wake share a shape: the task becomes runnable and waiting,
    /// joins its runqueue, then gets a preemption check.
    fn handle_wake(&mut self, task: TaskId, fork: bool) -> SimResult<()> {
        let now = self.run.now;
        let class = self.run.tasks[task].class.0;

        if fork {
            self.run.tasks[task].flags.insert(TaskFlags::ALIVE);
            self.run.live_count += 1;
            self.arm_strict_exit(task)?;
        }
        self.run.tasks[task].next_event = None;

        self.run.counters[class].sync(now);
        let t = &mut self.run.tasks[task];
        t.flags.insert(TaskFlags::RUNNABLE | TaskFlags::WAITING);
        t.enqueued_at = now;
        self.run.counters[class].nr_running += 1;
        self.run.counters[class].nr_waiting += 1;

        let mut ctx = self.run.ctx();
        self.slots[class].policy.enqueue(&mut ctx, task)?;

        self.check_preempt(task);
        Ok(())
    }

    /// The running task's burst ended: it leaves the CPU and sleeps for a
    /// sampled block interval. A satisfied count-based final entry turns
    /// the block into the exit.
    fn handle_block(&mut self, task: TaskId) -> SimResult<()> {
        let now = self.run.now;

        if let Some((n, nice)) = self.pending_count_final(task) {
            if self.run.tasks[task].exec_count >= n {
                return self.handle_exit(task, ExitKind::ExecCount, nice);
            }
        }

        let was_current = self.run.current == task;
        if was_current {
            self.deschedule_log(task);
        }

        let class = self.run.tasks[task].class.0;
        self.run.counters[class].sync(now);
        let t = &mut self.run.tasks[task];
        t.remaining_runtime = 0;
        if t.waiting() {
            t.flags.remove(TaskFlags::WAITING);
            self.run.counters[class].nr_waiting -= 1;
        }
        t.flags.remove(TaskFlags::RUNNABLE);
        self.run.counters[class].nr_running -= 1;

        if self.run.tasks[task].on_rq() {
            let mut ctx = self.run.ctx();
            self.slots[class].policy.dequeue(&mut ctx, task)?;
        }

        let block = self.run.tasks[task].behavior.block;
        let delay = block.sample(&mut self.run.rng);
        let handle = self.run.queue.insert(Event {
            time: now + delay,
            set_on: now,
            kind: EventKind::Enqueue(task),
        })?;
        self.run.tasks[task].next_event = Some(handle);

        if was_current {
            self.dispatch_pick()?;
        }
        Ok(())
    }

    fn handle_exit(&mut self, task: TaskId, kind: ExitKind, nice: bool) -> SimResult<()> {
        let now = self.run.now;
        let was_current = self.run.current == task;
        if was_current {
            self.deschedule_log(task);
        }

        let class = self.run.tasks[task].class.0;
        self.run.counters[class].sync(now);
        let t = &mut self.run.tasks[task];
        if t.waiting() {
            t.flags.remove(TaskFlags::WAITING);
            self.run.counters[class].nr_waiting -= 1;
        }
        if t.runnable() {
            t.flags.remove(TaskFlags::RUNNABLE);
            self.run.counters[class].nr_running -= 1;
        }
        if self.run.tasks[task].on_rq() {
            let mut ctx = self.run.ctx();
            self.slots[class].policy.dequeue(&mut ctx, task)?;
        }

        // The fired event's own handle is already stale; any other pending
        // event for this task gets cancelled.
        let t = &mut self.run.tasks[task];
        let pending = [t.next_event.take(), t.strict_end_event.take()];
        t.flags.remove(TaskFlags::ALIVE);
        t.exited = Some(now);
        for handle in pending.into_iter().flatten() {
            self.run.queue.delete(handle);
        }
        self.run.live_count -= 1;
        log::debug!(
            "{}ns: task {} exits ({:?}, nice={})",
            now,
            self.run.tasks[task].pname,
            kind,
            nice
        );

        if was_current {
            self.dispatch_pick()?;
        }
        Ok(())
    }

    fn handle_timer(&mut self) -> SimResult<()> {
        if !self.run.preemption {
            return Ok(());
        }
        self.run.metrics.ticks += 1;
        let current = self.run.current;
        if current != TaskId::idle() {
            let class = self.run.tasks[current].class.0;
            let mut ctx = self.run.ctx();
            self.slots[class].policy.task_tick(&mut ctx);
        }
        let now = self.run.now;
        let tick = self.run.tick_len;
        self.run.queue.insert(Event {
            time: now + tick,
            set_on: now,
            kind: EventKind::Timer,
        })?;
        Ok(())
    }

    /// Kernel-side dispatch: deschedule the previous task (or process its
    /// due event inline), ask the classes in priority order, install the
    /// winner and schedule its next event.
    fn dispatch_pick(&mut self) -> SimResult<()> {
        let now = self.run.now;
        self.run.need_resched = false;
        let prev = self.run.current;

        if prev != TaskId::idle() && self.run.tasks[prev].runnable() {
            // The clock charge already decremented `remaining_runtime`; if
            // the task's own event is due at this very instant, it wins
            // over the preemption and is processed inline.
            let due = self.run.tasks[prev]
                .next_event
                .and_then(|h| self.run.queue.get(h))
                .map(|e| e.time == now)
                .unwrap_or(false);
            if due {
                let handle = self.run.tasks[prev].next_event.take().expect("checked");
                let event = self.run.queue.delete(handle).expect("handle checked");
                record_event(self.run, &event);
                return self.dispatch_event(event);
            }
            if self.run.tasks[prev].remaining_runtime == 0 {
                return Err(InvariantError::ZeroRemaining { task: prev, now }.into());
            }

            // Cancel the pending block; the armed strict exit survives.
            if let Some(handle) = self.run.tasks[prev].next_event.take() {
                if self.run.tasks[prev].strict_end_event != Some(handle) {
                    self.run.queue.delete(handle);
                }
            }

            // A strict count-based final replaces the cancelled block with
            // an exit right here.
            if let Some((n, false)) = self.pending_count_final(prev) {
                if self.run.tasks[prev].exec_count >= n {
                    let event = Event {
                        time: now,
                        set_on: now,
                        kind: EventKind::Exit {
                            task: prev,
                            kind: ExitKind::ExecCount,
                            nice: false,
                        },
                    };
                    record_event(self.run, &event);
                    return self.dispatch_event(event);
                }
            }

            // Ordinary preemption: the task goes back to waiting.
            self.deschedule_log(prev);
            let class = self.run.tasks[prev].class.0;
            self.run.counters[class].sync(now);
            self.run.tasks[prev].flags.insert(TaskFlags::WAITING);
            self.run.tasks[prev].enqueued_at = now;
            self.run.counters[class].nr_waiting += 1;
            self.run.metrics.preemptions += 1;
            self.run.sim_events.push(EventRecord {
                time: now,
                set_on: now,
                kind: "preempt",
                pid: Some(prev.as_u32()),
            });
        }

        // Ask each class, high to low; every asked class flushes latency.
        let order = self.run.active_order.clone();
        let mut winner = None;
        for &class in &order {
            self.run.counters[class].flush(now);
            if winner.is_none() {
                let mut ctx = self.run.ctx();
                winner = self.slots[class].policy.pick_next(&mut ctx);
            }
        }
        let picked = match winner {
            Some(task) => task,
            // No class offered anything, but the descheduled task can still
            // run: keep it. Idle must never run ahead of a runnable task.
            None if prev != TaskId::idle() && self.run.tasks[prev].runnable() => prev,
            None => {
                let mut ctx = self.run.ctx();
                self.idle.pick_next(&mut ctx).expect("idle always offers")
            }
        };

        // put_prev exactly once iff a task was picked (idle included), and
        // never for a re-pick of the same task.
        if prev != picked && prev != TaskId::idle() {
            let class = self.run.tasks[prev].class.0;
            let mut ctx = self.run.ctx();
            self.slots[class].policy.put_prev(&mut ctx, prev)?;
        }

        self.run.metrics.picks += 1;
        if picked != prev {
            self.run.metrics.context_switches += 1;
        }
        self.run.sim_events.push(EventRecord {
            time: now,
            set_on: now,
            kind: "pick",
            pid: Some(picked.as_u32()),
        });
        self.run.current = picked;
        self.run.tasks[picked].updated_at = now;

        if picked == TaskId::idle() {
            log::trace!("{now}ns: idle");
            return Ok(());
        }

        // Behaviour FSM: at most one update fires per pick, then the final
        // entry (if reached) shapes the task's next event.
        let t = &mut self.run.tasks[picked];
        let update = match t.next_pending() {
            Some(BehaviorEntry::Update { cond, change })
                if cond.satisfied(now, t.exec_time, t.exec_count) =>
            {
                Some(*change)
            }
            _ => None,
        };
        if let Some(change) = update {
            t.behavior.apply(&change);
            t.next_behavior_index += 1;
        }
        self.arm_strict_exit(picked)?;

        let burst = {
            let t = &mut self.run.tasks[picked];
            if t.remaining_runtime > 0 {
                // Carried across preemptions until consumed.
                t.remaining_runtime
            } else {
                let sampled = t.behavior.run.sample(&mut self.run.rng).max(1);
                self.run.tasks[picked].remaining_runtime = sampled;
                sampled
            }
        };

        let strict_at = self.run.tasks[picked]
            .strict_end_event
            .and_then(|h| self.run.queue.get(h))
            .map(|e| e.time);
        let plan = {
            let t = &self.run.tasks[picked];
            plan_exit(t.pending_final(), now, burst, t.exec_time, strict_at)
        };
        match plan {
            ExitPlan::None => {
                let handle = self.run.queue.insert(Event {
                    time: now + burst,
                    set_on: now,
                    kind: EventKind::Block(picked),
                })?;
                self.run.tasks[picked].next_event = Some(handle);
            }
            ExitPlan::ExitAt { at, kind, nice } => {
                let handle = self.run.queue.insert(Event {
                    time: at,
                    set_on: now,
                    kind: EventKind::Exit { task: picked, kind, nice },
                })?;
                self.run.tasks[picked].next_event = Some(handle);
            }
            ExitPlan::AliasStrict => {
                let t = &mut self.run.tasks[picked];
                t.next_event = t.strict_end_event;
            }
        }

        // Latency sample and waiting-state clear for the picked task.
        let class = self.run.tasks[picked].class.0;
        let t = &mut self.run.tasks[picked];
        let waited = now - t.enqueued_at;
        t.latency_log.push(waited);
        t.wait_time += waited;
        if t.waiting() {
            t.flags.remove(TaskFlags::WAITING);
            self.run.counters[class].nr_waiting -= 1;
        }
        t.picked_at = now;
        t.exec_count += 1;
        log::trace!("{}ns: pick {} (burst {}ns)", now, self.run.tasks[picked].pname, burst);
        Ok(())
    }

    /// Class-priority preemption walk: a task of a higher class always
    /// preempts; the same class decides for itself; lower classes never
    /// preempt.
    fn check_preempt(&mut self, new_task: TaskId) {
        let current = self.run.current;
        if current == TaskId::idle() {
            self.run.need_resched = true;
            return;
        }
        let current_class = self.run.tasks[current].class.0;
        let new_class = self.run.tasks[new_task].class.0;
        if current_class == new_class {
            let mut ctx = self.run.ctx();
            self.slots[new_class].policy.check_preempt(&mut ctx, new_task);
            return;
        }
        for &class in &self.run.active_order {
            if class == new_class {
                self.run.need_resched = true;
                return;
            }
            if class == current_class {
                return;
            }
        }
    }

    /// Arm the unconditional `sim_exec` strict exit once the FSM points at
    /// it, wherever the task currently is.
    fn arm_strict_exit(&mut self, task: TaskId) -> SimResult<()> {
        let now = self.run.now;
        let threshold = {
            let t = &self.run.tasks[task];
            if t.strict_end_event.is_some() {
                return Ok(());
            }
            match t.pending_final() {
                Some((&SwitchCond::SimExec(threshold), false)) => threshold,
                _ => return Ok(()),
            }
        };
        let handle = self.run.queue.insert(Event {
            time: threshold.max(now),
            set_on: now,
            kind: EventKind::Exit {
                task,
                kind: ExitKind::SimExec,
                nice: false,
            },
        })?;
        self.run.tasks[task].strict_end_event = Some(handle);
        Ok(())
    }

    /// Record the burst that just ended on the descheduled task.
    fn deschedule_log(&mut self, task: TaskId) {
        let now = self.run.now;
        let t = &mut self.run.tasks[task];
        if now > t.picked_at {
            t.run_log.push(now - t.picked_at);
            t.exec_log.push(crate::task::ExecSpan {
                start: t.picked_at,
                end: now,
            });
        }
    }
}

/// Assemble the result object from the run's state. Aggregates only appear
/// on finished runs.
fn build_report(slots: &[PolicySlot], run: &RunState) -> SimReport {
    let class_name = |class: ClassId| -> String {
        slots
            .get(class.0)
            .map(|s| s.name.to_string())
            .unwrap_or_else(|| "idle".to_string())
    };

    let process_list: Vec<ProcessInfo> = run
        .tasks
        .processes()
        .map(|t| ProcessInfo {
            pid: t.id.as_u32(),
            pname: t.pname.clone(),
            class: class_name(t.class),
            spawned: t.spawned,
            exited: t.exited,
            exec_log: t.exec_log.clone(),
            custom: t.custom.clone(),
        })
        .collect();

    let active_classes: Vec<String> = run
        .active_order
        .iter()
        .map(|&i| slots[i].name.to_string())
        .collect();

    let (average_latency, average_turnaround, class_stats, process_stats) = if run.finished {
        let by_class: Vec<ClassLatency> = run
            .active_order
            .iter()
            .map(|&i| ClassLatency {
                class: slots[i].name.to_string(),
                latency: run.counters[i].latency_stats(),
            })
            .collect();
        let pooled: Vec<u64> = run
            .active_order
            .iter()
            .flat_map(|&i| run.counters[i].latency_log.iter().copied())
            .collect();
        let latency = LatencyReport {
            general: Stats::of(&pooled),
            by_class,
        };

        let turnarounds: Vec<u64> = run
            .tasks
            .processes()
            .filter_map(Task::turnaround)
            .collect();
        let turnaround_stats = Stats::of(&turnarounds);
        let turnaround = TurnaroundReport {
            avg: turnaround_stats.avg,
            dev: turnaround_stats.dev,
            exited: turnarounds.len(),
            running: run.live_count,
        };

        let class_stats: Vec<ClassStatsEntry> = run
            .active_order
            .iter()
            .map(|&i| ClassStatsEntry {
                class: slots[i].name.to_string(),
                latency: run.counters[i].latency_stats(),
                nr_running: run.counters[i].nr_running,
                extra: slots[i]
                    .policy
                    .class_stats()
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            })
            .collect();

        let process_stats: Vec<ProcessStats> = run
            .tasks
            .processes()
            .map(|t| ProcessStats {
                pid: t.id.as_u32(),
                pname: t.pname.clone(),
                exec_time: t.exec_time,
                wait_time: t.wait_time,
                exec_count: t.exec_count,
                run: Stats::of(&t.run_log),
                latency: Stats::of(&t.latency_log),
                turnaround: t.turnaround(),
            })
            .collect();

        (Some(latency), Some(turnaround), class_stats, process_stats)
    } else {
        (None, None, Vec::new(), Vec::new())
    };

    SimReport {
        name: run.config.name.clone(),
        duration_ms: run.started.elapsed().as_secs_f64() * 1_000.0,
        finished: run.finished,
        run_time: run.now,
        length: run.config.sim_len,
        context_switches: run.metrics.context_switches,
        process_list,
        sim_events: run.sim_events.clone(),
        average_load: run.metrics.load(),
        average_latency,
        average_turnaround,
        active_classes,
        class_stats,
        process_stats,
    }
}
